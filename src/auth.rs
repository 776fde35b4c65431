use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tera::Context;

use crate::config::{
    MAX_EMAIL_LENGTH, MAX_PASSWORD_LENGTH, MAX_USERNAME_LENGTH, MIN_PASSWORD_LENGTH, MIN_USERNAME_LENGTH,
};
use crate::core::errors::{ApiError, ApiResult};
use crate::core::forms::FormErrors;
use crate::core::helpers::{hash_password, is_safe_next, new_token, now, validate_token_format, verify_login};
use crate::core::query_params::NextQuery;
use crate::core::session::{self, MaybeUser};
use crate::core::{csrf, flash};
use crate::mail::Email;
use crate::models::{PasswordResetToken, User};
use crate::{templates, users, AppState};

pub const INVALID_CREDENTIALS: &str = "Invalid username or password";
pub const RESET_REQUESTED: &str = "Check your email for the instructions to reset your password";
pub const RESET_SUBJECT: &str = "[Microblog] Reset Your Password";

fn already_signed_in(user: &MaybeUser) -> Option<HttpResponse> {
    user.0.as_ref().map(|_| flash::redirect("/index", None))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    #[serde(skip_serializing)]
    pub csrf_token: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub remember_me: Option<String>,
}

fn render_login(req: &HttpRequest, form: &LoginForm, errors: &FormErrors, next: Option<&str>) -> ApiResult {
    let mut context = Context::new();
    context.insert("form", form);
    context.insert("errors", errors);
    context.insert("next", &next);
    templates::render(req, "auth/login.html", "Sign In", context)
}

/// `GET /login`
pub async fn login_form(req: HttpRequest, user: MaybeUser, query: web::Query<NextQuery>) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    render_login(&req, &LoginForm::default(), &FormErrors::default(), query.next.as_deref())
}

/// `POST /login`
pub async fn login_user(
    req: HttpRequest,
    user: MaybeUser,
    state: web::Data<AppState>,
    query: web::Query<NextQuery>,
    form: web::Form<LoginForm>,
) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    csrf::verify(&req, &form.csrf_token)?;
    let form = form.into_inner();
    let next = query.next.as_deref();

    let mut errors = FormErrors::default();
    errors.required("username", &form.username);
    errors.required("password", &form.password);
    if !errors.is_empty() {
        return render_login(&req, &form, &errors, next);
    }

    // Same answer for an unknown user and a wrong password
    let found = users::find_by_username(&state.pool, form.username.trim()).await?;
    let verified = verify_login(&form.password, found.as_ref().map(|u| u.password_hash.as_str()));
    let Some(found) = found.filter(|_| verified) else {
        tracing::info!(username = %form.username, "failed login");
        let back = match next {
            Some(next) => format!("/login?next={}", urlencoding::encode(next)),
            None => "/login".to_string(),
        };
        return Ok(flash::redirect(&back, Some(INVALID_CREDENTIALS)));
    };

    let remember = form.remember_me.is_some();
    let token = session::create_session(&state.pool, found.id, remember).await?;
    let cookie = session::session_cookie(&state.cookie_key, &token, remember, state.config.session_expiration_hours)
        .ok_or_else(|| ApiError::InternalError("failed to sign session cookie".to_string()))?;

    let target = next.filter(|n| is_safe_next(n)).unwrap_or("/index");
    tracing::info!(user_id = found.id, remember, "logged in");

    let mut response = flash::redirect(target, None);
    response
        .add_cookie(&cookie)
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(response)
}

/// `GET /logout`
pub async fn logout_user(req: HttpRequest, state: web::Data<AppState>) -> ApiResult {
    if let Some(token) = session::session_token(&req, &state.cookie_key) {
        session::delete_session(&state.pool, &token).await?;
    }
    let mut response = flash::redirect("/index", None);
    response
        .add_cookie(&session::clear_session_cookie())
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(response)
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationForm {
    #[serde(skip_serializing)]
    pub csrf_token: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_serializing)]
    pub password2: String,
}

impl RegistrationForm {
    fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        if errors.required("username", &self.username) {
            errors.length("username", self.username.trim(), MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH);
        }
        if errors.required("email", &self.email) {
            errors.email("email", self.email.trim());
            errors.length("email", self.email.trim(), 1, MAX_EMAIL_LENGTH);
        }
        if errors.required("password", &self.password) {
            errors.length("password", &self.password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH);
        }
        if errors.required("password2", &self.password2) {
            errors.equal_to("password2", &self.password2, &self.password, "password");
        }
        errors
    }
}

fn render_register(req: &HttpRequest, form: &RegistrationForm, errors: &FormErrors) -> ApiResult {
    let mut context = Context::new();
    context.insert("form", form);
    context.insert("errors", errors);
    templates::render(req, "auth/register.html", "Register", context)
}

/// `GET /register`
pub async fn register_form(req: HttpRequest, user: MaybeUser) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    render_register(&req, &RegistrationForm::default(), &FormErrors::default())
}

/// `POST /register`
pub async fn register_user(
    req: HttpRequest,
    user: MaybeUser,
    state: web::Data<AppState>,
    form: web::Form<RegistrationForm>,
) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    csrf::verify(&req, &form.csrf_token)?;
    let form = form.into_inner();
    let mut errors = form.validate();
    let username = form.username.trim();
    let email = form.email.trim();

    // Check duplicates
    if !username.is_empty() && users::find_by_username(&state.pool, username).await?.is_some() {
        errors.add("username", "Please use a different username.");
    }
    if !email.is_empty() && users::find_by_email(&state.pool, email).await?.is_some() {
        errors.add("email", "Please use a different email address.");
    }
    if !errors.is_empty() {
        return render_register(&req, &form, &errors);
    }

    let password_hash = hash_password(&form.password)?;
    let created = match users::create_user(&state.pool, username, email, &password_hash).await {
        Ok(created) => created,
        // Lost a race against a concurrent registration
        Err(err) if users::is_unique_violation(&err) => {
            errors.add("username", "Please use a different username.");
            return render_register(&req, &form, &errors);
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(user_id = created.id, username = %created.username, "user registered");
    Ok(flash::redirect(
        "/login",
        Some("Congratulations, you are now a registered user!"),
    ))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetRequestForm {
    #[serde(skip_serializing)]
    pub csrf_token: String,
    pub email: String,
}

fn render_reset_request(req: &HttpRequest, form: &ResetRequestForm, errors: &FormErrors) -> ApiResult {
    let mut context = Context::new();
    context.insert("form", form);
    context.insert("errors", errors);
    templates::render(req, "auth/reset_password_request.html", "Reset Password", context)
}

/// `GET /reset_password_request`
pub async fn reset_password_request_form(req: HttpRequest, user: MaybeUser) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    render_reset_request(&req, &ResetRequestForm::default(), &FormErrors::default())
}

pub async fn create_reset_token(state: &AppState, user_id: i64) -> Result<String, sqlx::Error> {
    let token = new_token();
    let expires_at = now() + Duration::seconds(state.config.reset_token_expires_secs);
    sqlx::query("INSERT INTO password_reset_tokens (token, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&state.pool)
        .await?;
    Ok(token)
}

/// The user a reset token belongs to, if it exists and has not expired.
pub async fn verify_reset_token(state: &AppState, token: &str) -> Result<Option<User>, sqlx::Error> {
    if !validate_token_format(token) {
        return Ok(None);
    }
    let record = sqlx::query_as::<_, PasswordResetToken>(
        "SELECT token, user_id, expires_at FROM password_reset_tokens WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(&state.pool)
    .await?;

    match record {
        Some(record) if record.expires_at > now() => users::find_by_id(&state.pool, record.user_id).await,
        _ => Ok(None),
    }
}

fn reset_email(state: &AppState, user: &User, reset_url: &str) -> Result<Email, ApiError> {
    let mut context = Context::new();
    context.insert("user", user);
    context.insert("reset_url", reset_url);
    Ok(Email {
        from: state.config.sender_email.clone(),
        to: vec![user.email.clone()],
        subject: RESET_SUBJECT.to_string(),
        text_body: templates::render_plain("email/reset_password.txt", &context)?,
        html_body: templates::render_plain("email/reset_password.html", &context)?,
    })
}

/// `POST /reset_password_request`
pub async fn reset_password_request(
    req: HttpRequest,
    user: MaybeUser,
    state: web::Data<AppState>,
    form: web::Form<ResetRequestForm>,
) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    csrf::verify(&req, &form.csrf_token)?;
    let form = form.into_inner();

    let mut errors = FormErrors::default();
    if errors.required("email", &form.email) {
        errors.email("email", form.email.trim());
    }
    if !errors.is_empty() {
        return render_reset_request(&req, &form, &errors);
    }

    // Unknown addresses get the same answer
    if let Some(found) = users::find_by_email(&state.pool, form.email.trim()).await? {
        let token = create_reset_token(&state, found.id).await?;
        let reset_url = format!("{}/reset_password/{}", state.config.server_url, token);
        let email = reset_email(&state, &found, &reset_url)?;
        state.mail.dispatch(email);
        tracing::info!(user_id = found.id, "password reset requested");
    }

    Ok(flash::redirect("/login", Some(RESET_REQUESTED)))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetPasswordForm {
    #[serde(skip_serializing)]
    pub csrf_token: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_serializing)]
    pub password2: String,
}

fn render_reset(req: &HttpRequest, token: &str, errors: &FormErrors) -> ApiResult {
    let mut context = Context::new();
    context.insert("token", token);
    context.insert("errors", errors);
    templates::render(req, "auth/reset_password.html", "Reset Your Password", context)
}

fn invalid_reset_link() -> HttpResponse {
    flash::redirect("/", Some("The password reset link is invalid or has expired."))
}

/// `GET /reset_password/{token}`
pub async fn reset_password_form(
    req: HttpRequest,
    user: MaybeUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    let token = path.into_inner();
    if verify_reset_token(&state, &token).await?.is_none() {
        return Ok(invalid_reset_link());
    }
    render_reset(&req, &token, &FormErrors::default())
}

/// `POST /reset_password/{token}`
pub async fn reset_password(
    req: HttpRequest,
    user: MaybeUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<ResetPasswordForm>,
) -> ApiResult {
    if let Some(redirect) = already_signed_in(&user) {
        return Ok(redirect);
    }
    csrf::verify(&req, &form.csrf_token)?;
    let token = path.into_inner();
    let Some(owner) = verify_reset_token(&state, &token).await? else {
        return Ok(invalid_reset_link());
    };

    let mut errors = FormErrors::default();
    if errors.required("password", &form.password) {
        errors.length("password", &form.password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH);
    }
    if errors.required("password2", &form.password2) {
        errors.equal_to("password2", &form.password2, &form.password, "password");
    }
    if !errors.is_empty() {
        return render_reset(&req, &token, &errors);
    }

    let password_hash = hash_password(&form.password)?;
    let mut tx = state.pool.begin().await?;
    users::set_password(&mut *tx, owner.id, &password_hash).await?;
    // Every outstanding token of this user is spent
    sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = ?")
        .bind(owner.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(user_id = owner.id, "password reset");
    Ok(flash::redirect("/login", Some("Your password has been reset.")))
}
