//! Double-submit CSRF protection.
//!
//! Pages with forms make sure the browser holds a random `csrf_token`
//! cookie and embed the same value in a hidden field; a submission is
//! accepted only when both match.

use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;

use crate::config::CSRF_COOKIE;
use crate::core::errors::ApiError;
use crate::core::helpers::new_token;

pub const HEADER: &str = "X-CSRFToken";

/// The token for this browser, plus the cookie to set when it is new.
pub fn token(req: &HttpRequest) -> (String, Option<Cookie<'static>>) {
    if let Some(existing) = req.cookie(CSRF_COOKIE) {
        if !existing.value().is_empty() {
            return (existing.value().to_string(), None);
        }
    }
    let token = new_token();
    let cookie = Cookie::build(CSRF_COOKIE, token.clone())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();
    (token, Some(cookie))
}

pub fn verify(req: &HttpRequest, submitted: &str) -> Result<(), ApiError> {
    match req.cookie(CSRF_COOKIE) {
        Some(cookie) if !submitted.is_empty() && cookie.value() == submitted => Ok(()),
        _ => Err(ApiError::BadRequest("The CSRF token is missing or invalid.".to_string())),
    }
}

/// For JSON endpoints the token travels in the `X-CSRFToken` header.
pub fn verify_header(req: &HttpRequest) -> Result<(), ApiError> {
    let submitted = req
        .headers()
        .get(HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    verify(req, submitted)
}
