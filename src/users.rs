use actix_web::{web, HttpRequest};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};
use tera::Context;

use crate::config::{MAX_ABOUT_ME_LENGTH, MAX_USERNAME_LENGTH, MIN_USERNAME_LENGTH};
use crate::core::errors::ApiResult;
use crate::core::forms::FormErrors;
use crate::core::helpers::now;
use crate::core::query_params::PageQuery;
use crate::core::session::CurrentUser;
use crate::core::{csrf, flash};
use crate::models::User;
use crate::{follow, posts, templates, AppState};

const USER_COLUMNS: &str = "SELECT id, username, email, password_hash, about_me, last_seen FROM users";

pub async fn find_by_id<'e, E>(db: E, id: i64) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, User>(&format!("{} WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_by_username<'e, E>(db: E, username: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, User>(&format!("{} WHERE username = ?", USER_COLUMNS))
        .bind(username)
        .fetch_optional(db)
        .await
}

pub async fn find_by_email<'e, E>(db: E, email: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, User>(&format!("{} WHERE email = ?", USER_COLUMNS))
        .bind(email)
        .fetch_optional(db)
        .await
}

pub async fn create_user<'e, E>(
    db: E,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, password_hash, last_seen) VALUES (?, ?, ?, ?) \
         RETURNING id, username, email, password_hash, about_me, last_seen",
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(now())
    .fetch_one(db)
    .await
}

pub async fn set_password<'e, E>(db: E, user_id: i64, password_hash: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(password_hash)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn update_profile<'e, E>(
    db: E,
    user_id: i64,
    username: &str,
    about_me: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE users SET username = ?, about_me = ? WHERE id = ?")
        .bind(username)
        .bind(about_me)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}

/// `GET /users/{username}`
pub async fn user_profile(
    req: HttpRequest,
    current: CurrentUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> ApiResult {
    let username = path.into_inner();
    let Some(user) = find_by_username(&state.pool, &username).await? else {
        return Ok(flash::redirect("/index", Some("User not found.")));
    };

    let base = format!("/users/{}", urlencoding::encode(&user.username));
    let page = posts::user_posts(&state.pool, user.id, query.page(), state.config.posts_per_page, &base).await?;

    let mut context = Context::new();
    context.insert("avatar", &user.avatar(128));
    context.insert("followers_count", &follow::followers_count(&state.pool, user.id).await?);
    context.insert("following_count", &follow::following_count(&state.pool, user.id).await?);
    context.insert("is_following", &follow::is_following(&state.pool, current.0.id, user.id).await?);
    context.insert("user", &user);
    context.insert("posts", &page);
    templates::render(&req, "user.html", "User", context)
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditProfileForm {
    #[serde(skip_serializing)]
    pub csrf_token: String,
    pub username: String,
    pub about_me: String,
}

impl EditProfileForm {
    fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        if errors.required("username", &self.username) {
            errors.length("username", self.username.trim(), MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH);
        }
        errors.length("about_me", &self.about_me, 0, MAX_ABOUT_ME_LENGTH);
        errors
    }
}

fn render_edit_profile(req: &HttpRequest, form: &EditProfileForm, errors: &FormErrors) -> ApiResult {
    let mut context = Context::new();
    context.insert("form", form);
    context.insert("errors", errors);
    templates::render(req, "edit_profile.html", "Edit Profile", context)
}

/// `GET /edit_profile`
pub async fn edit_profile_form(req: HttpRequest, user: CurrentUser) -> ApiResult {
    let form = EditProfileForm {
        csrf_token: String::new(),
        username: user.0.username.clone(),
        about_me: user.0.about_me.clone().unwrap_or_default(),
    };
    render_edit_profile(&req, &form, &FormErrors::default())
}

/// `POST /edit_profile`
pub async fn edit_profile(
    req: HttpRequest,
    user: CurrentUser,
    state: web::Data<AppState>,
    form: web::Form<EditProfileForm>,
) -> ApiResult {
    csrf::verify(&req, &form.csrf_token)?;
    let form = form.into_inner();
    let mut errors = form.validate();
    let username = form.username.trim();

    // Renaming to a name someone else holds
    if errors.is_empty()
        && username != user.0.username
        && find_by_username(&state.pool, username).await?.is_some()
    {
        errors.add("username", "Please use a different username.");
    }
    if !errors.is_empty() {
        return render_edit_profile(&req, &form, &errors);
    }

    let about_me = Some(form.about_me.trim()).filter(|s| !s.is_empty());
    match update_profile(&state.pool, user.0.id, username, about_me).await {
        Ok(()) => {}
        Err(err) if is_unique_violation(&err) => {
            errors.add("username", "Please use a different username.");
            return render_edit_profile(&req, &form, &errors);
        }
        Err(err) => return Err(err.into()),
    }

    tracing::info!(user_id = user.0.id, "profile updated");
    Ok(flash::redirect("/edit_profile", Some("Your changes have been saved.")))
}
