//! Cookie sessions backed by the `sessions` table.

use std::future::{ready, Ready};

use actix_web::body::MessageBody;
use actix_web::cookie::{time::Duration, Cookie, CookieJar, Key, SameSite};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, FromRequest, HttpMessage, HttpRequest};
use chrono::Duration as ChronoDuration;
use sha2::{Digest, Sha512};
use sqlx::SqlitePool;

use crate::config::SESSION_COOKIE;
use crate::core::errors::ApiError;
use crate::core::helpers::{new_token, now};
use crate::models::{SessionRecord, User};
use crate::AppState;

/// Cookie signing key derived from `SECRET_KEY`.
pub fn cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(&digest[..])
}

fn sign(key: &Key, cookie: Cookie<'static>) -> Option<Cookie<'static>> {
    let name = cookie.name().to_string();
    let mut jar = CookieJar::new();
    jar.signed_mut(key).add(cookie);
    jar.get(&name).cloned()
}

fn verify(key: &Key, cookie: Cookie<'static>) -> Option<String> {
    let name = cookie.name().to_string();
    let mut jar = CookieJar::new();
    jar.add_original(cookie);
    jar.signed(key).get(&name).map(|c| c.value().to_string())
}

pub async fn create_session(pool: &SqlitePool, user_id: i64, remember: bool) -> Result<String, sqlx::Error> {
    let token = new_token();
    sqlx::query("INSERT INTO sessions (token, user_id, remember, created_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(remember)
        .bind(now())
        .execute(pool)
        .await?;
    Ok(token)
}

pub async fn delete_session(pool: &SqlitePool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Looks up a live session, stamps the user's `last_seen` and returns the
/// user. Expired sessions are deleted on sight.
pub async fn resolve_session(
    pool: &SqlitePool,
    token: &str,
    expiration_hours: i64,
) -> Result<Option<User>, sqlx::Error> {
    let record = sqlx::query_as::<_, SessionRecord>(
        "SELECT token, user_id, remember, created_at FROM sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    let Some(record) = record else {
        return Ok(None);
    };

    if now() - record.created_at > ChronoDuration::hours(expiration_hours) {
        delete_session(pool, &record.token).await?;
        return Ok(None);
    }

    let seen = now();
    sqlx::query("UPDATE users SET last_seen = ? WHERE id = ?")
        .bind(seen)
        .bind(record.user_id)
        .execute(pool)
        .await?;

    sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, about_me, last_seen FROM users WHERE id = ?",
    )
    .bind(record.user_id)
    .fetch_optional(pool)
    .await
}

pub fn session_token(req: &HttpRequest, key: &Key) -> Option<String> {
    req.cookie(SESSION_COOKIE).and_then(|cookie| verify(key, cookie))
}

/// Signed session cookie. Without `remember` it lasts until the browser
/// closes; with it, as long as the session row does.
pub fn session_cookie(key: &Key, token: &str, remember: bool, expiration_hours: i64) -> Option<Cookie<'static>> {
    let mut cookie = Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();
    if remember {
        cookie.set_max_age(Duration::hours(expiration_hours));
    }
    sign(key, cookie)
}

pub fn clear_session_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    cookie.make_removal();
    cookie
}

/// Runs before every request: resolves the session cookie, stamps
/// `last_seen` and leaves the user in the request extensions.
pub async fn load_current_user(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    if let Some(state) = req.app_data::<web::Data<AppState>>().cloned() {
        if let Some(token) = session_token(req.request(), &state.cookie_key) {
            match resolve_session(&state.pool, &token, state.config.session_expiration_hours).await {
                Ok(Some(user)) => {
                    req.extensions_mut().insert(CurrentUser(user));
                }
                Ok(None) => {}
                Err(err) => tracing::error!(error = %err, "failed to resolve session"),
            }
        }
    }
    next.call(req).await
}

/// The logged-in user; anonymous requests are sent to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequest for CurrentUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let result = req
            .extensions()
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::login_required(requested_path(req)));
        ready(result)
    }
}

/// The logged-in user if there is one.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl FromRequest for MaybeUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(MaybeUser(current_user(req))))
    }
}

pub fn current_user(req: &HttpRequest) -> Option<User> {
    req.extensions().get::<CurrentUser>().map(|u| u.0.clone())
}

fn requested_path(req: &HttpRequest) -> String {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_cookie_verifies_with_the_same_key_only() {
        let key = cookie_key("secret");
        let cookie = session_cookie(&key, "token-1", false, 24).unwrap();
        assert_ne!(cookie.value(), "token-1");
        assert_eq!(verify(&key, cookie.clone()).as_deref(), Some("token-1"));
        assert_eq!(verify(&cookie_key("other"), cookie), None);
    }

    #[test]
    fn remember_sets_max_age() {
        let key = cookie_key("secret");
        assert!(session_cookie(&key, "t", false, 24).unwrap().max_age().is_none());
        assert_eq!(
            session_cookie(&key, "t", true, 24).unwrap().max_age(),
            Some(Duration::hours(24))
        );
    }
}
