pub mod auth;
pub mod config;
pub mod core;
pub mod follow;
pub mod i18n;
pub mod logging;
pub mod mail;
pub mod models;
pub mod posts;
pub mod search;
pub mod static_server;
pub mod templates;
pub mod translate;
pub mod users;

use std::sync::Arc;

use actix_web::cookie::Key;
use actix_web::{web, HttpRequest};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::core::errors::{ApiError, ApiResult};
use crate::mail::{MailDispatcher, Mailer};
use crate::search::SearchMirror;
use crate::translate::Translator;

/// Everything handlers share, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub mirror: SearchMirror,
    pub mail: MailDispatcher,
    pub translator: Arc<Translator>,
    pub cookie_key: Key,
}

impl AppState {
    /// Must run inside a Tokio runtime: it starts the mail worker.
    pub fn new(
        config: Config,
        pool: SqlitePool,
        mirror: SearchMirror,
        mailer: Arc<dyn Mailer>,
        translator: Translator,
    ) -> Self {
        let cookie_key = core::session::cookie_key(&config.secret_key);
        let mail = MailDispatcher::start(mailer, config.mail_queue_capacity);
        Self {
            config: Arc::new(config),
            pool,
            mirror,
            mail,
            translator: Arc::new(translator),
            cookie_key,
        }
    }

    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let pool = core::db::connect(&config.database_url).await?;
        core::db::migrate(&pool).await?;
        let mirror = SearchMirror::from_config(&config)?;
        let mailer = mail::mailer_from_config(&config);
        let translator = Translator::from_config(&config);
        Ok(Self::new(config, pool, mirror, mailer, translator))
    }
}

async fn not_found(_req: HttpRequest) -> ApiResult {
    Err(ApiError::NotFound("no route".to_string()))
}

/// Registers every route of the application.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(["/", "/index"])
            .route(web::get().to(posts::index))
            .route(web::post().to(posts::create_post)),
    )
    .route("/explore", web::get().to(posts::explore_page))
    .route("/search", web::get().to(posts::search))
    .route("/users/{username}", web::get().to(users::user_profile))
    .service(
        web::resource("/edit_profile")
            .route(web::get().to(users::edit_profile_form))
            .route(web::post().to(users::edit_profile)),
    )
    .route("/follow/{username}", web::post().to(follow::follow_user))
    .route("/unfollow/{username}", web::post().to(follow::unfollow_user))
    .route("/translate", web::post().to(translate::translate_text))
    .service(
        web::resource("/login")
            .route(web::get().to(auth::login_form))
            .route(web::post().to(auth::login_user)),
    )
    .route("/logout", web::get().to(auth::logout_user))
    .service(
        web::resource("/register")
            .route(web::get().to(auth::register_form))
            .route(web::post().to(auth::register_user)),
    )
    .service(
        web::resource("/reset_password_request")
            .route(web::get().to(auth::reset_password_request_form))
            .route(web::post().to(auth::reset_password_request)),
    )
    .service(
        web::resource("/reset_password/{token}")
            .route(web::get().to(auth::reset_password_form))
            .route(web::post().to(auth::reset_password)),
    )
    .route("/static/{path:.*}", web::get().to(static_server::serve_static))
    .default_service(web::route().to(not_found));
}
