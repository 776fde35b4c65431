use actix_web::http::header;
use actix_web::{web, HttpResponse};
use mime_guess::from_path;
use rust_embed::RustEmbed;

use crate::core::errors::{ApiError, ApiResult};

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

/// `GET /static/{path}`
pub async fn serve_static(path: web::Path<String>) -> ApiResult {
    let file_path = path.into_inner();
    let file = Assets::get(&file_path).ok_or_else(|| ApiError::NotFound(format!("static file {}", file_path)))?;

    let mime = from_path(&file_path).first_or_octet_stream();

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, mime.as_ref()))
        .insert_header((header::CACHE_CONTROL, "public, max-age=3600"))
        .body(file.data.into_owned()))
}
