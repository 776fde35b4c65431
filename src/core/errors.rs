use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::config::LOGIN_MESSAGE;
use crate::core::flash;
use crate::search::SearchError;
use crate::templates;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// Login required; carries the path to come back to.
    #[error("Unauthorized")]
    Unauthorized { next: String },

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Internal Error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn login_required(next: impl Into<String>) -> Self {
        ApiError::Unauthorized { next: next.into() }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::FOUND,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::Unauthorized { next } => {
                let location = format!("/login?next={}", urlencoding::encode(next));
                let mut response = HttpResponse::Found()
                    .insert_header((header::LOCATION, location))
                    .finish();
                if let Some(cookie) = flash::cookie(&[LOGIN_MESSAGE.to_string()]) {
                    if let Err(err) = response.add_cookie(&cookie) {
                        tracing::warn!(error = %err, "failed to set login flash cookie");
                    }
                }
                response
            }
            ApiError::InternalError(msg) => {
                tracing::error!(error = %msg, "request failed");
                templates::error_page(self.status_code(), "errors/500.html")
            }
            ApiError::NotFound(_) => templates::error_page(self.status_code(), "errors/404.html"),
            ApiError::BadRequest(msg) => {
                tracing::warn!(error = %msg, "bad request");
                templates::error_page(self.status_code(), "errors/400.html")
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("row not found".to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<tera::Error> for ApiError {
    fn from(err: tera::Error) -> Self {
        ApiError::InternalError(format!("template error: {:?}", err))
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

pub type ApiResult = Result<HttpResponse, ApiError>;
