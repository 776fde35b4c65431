//! One-shot messages carried across a redirect in a short-lived cookie.

use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse};

use crate::config::FLASH_COOKIE;

pub fn cookie(messages: &[String]) -> Option<Cookie<'static>> {
    let encoded = serde_json::to_string(messages).ok()?;
    Some(
        Cookie::build(FLASH_COOKIE, urlencoding::encode(&encoded).into_owned())
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(Duration::minutes(5))
            .finish(),
    )
}

pub fn clear_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build(FLASH_COOKIE, "").path("/").finish();
    cookie.make_removal();
    cookie
}

/// Messages waiting for this request. The caller clears the cookie.
pub fn peek(req: &HttpRequest) -> Vec<String> {
    req.cookie(FLASH_COOKIE)
        .and_then(|cookie| {
            let decoded = urlencoding::decode(cookie.value()).ok()?;
            serde_json::from_str::<Vec<String>>(&decoded).ok()
        })
        .unwrap_or_default()
}

/// `302 Found` to `location`, leaving `message` for the next page.
pub fn redirect(location: &str, message: Option<&str>) -> HttpResponse {
    let mut builder = HttpResponse::Found();
    builder.insert_header((header::LOCATION, location.to_string()));
    if let Some(cookie) = message.and_then(|m| cookie(&[m.to_string()])) {
        builder.cookie(cookie);
    }
    builder.finish()
}
