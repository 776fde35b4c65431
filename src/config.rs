use std::env;

pub const MIN_USERNAME_LENGTH: usize = 2;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MAX_EMAIL_LENGTH: usize = 120;
pub const MIN_PASSWORD_LENGTH: usize = 2;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MAX_POST_LENGTH: usize = 140;
pub const MAX_ABOUT_ME_LENGTH: usize = 140;
pub const REINDEX_CHUNK_SIZE: usize = 1000;
/// Larger `?page=` values are treated as this page.
pub const MAX_PAGE: usize = 100_000;
pub const MAX_SESSION_EXPIRATION_HOURS: i64 = 24 * 365;
pub const MAX_RESET_TOKEN_EXPIRES_SECS: i64 = 7 * 24 * 60 * 60;

pub const SESSION_COOKIE: &str = "session";
pub const CSRF_COOKIE: &str = "csrf_token";
pub const FLASH_COOKIE: &str = "flash";
pub const LOGIN_MESSAGE: &str = "Please log in to access this page.";

/// Runtime configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub secret_key: String,
    pub database_url: String,
    pub bind_address: String,
    /// Public origin used in links sent by email.
    pub server_url: String,
    pub mail_server: Option<String>,
    pub mail_port: Option<u16>,
    pub sender_email: String,
    pub mail_queue_capacity: usize,
    pub translator_key: Option<String>,
    pub translator_region: Option<String>,
    pub elasticsearch_url: Option<String>,
    pub search_backend: Option<String>,
    pub languages: Vec<String>,
    pub posts_per_page: usize,
    pub session_expiration_hours: i64,
    pub reset_token_expires_secs: i64,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            secret_key: "you-will-never-guess".to_string(),
            database_url: "sqlite://app.db".to_string(),
            bind_address: "0.0.0.0:8000".to_string(),
            server_url: "http://localhost:8000".to_string(),
            mail_server: None,
            mail_port: None,
            sender_email: "noreply@example.com".to_string(),
            mail_queue_capacity: 64,
            translator_key: None,
            translator_region: None,
            elasticsearch_url: None,
            search_backend: None,
            languages: vec!["en".to_string(), "uk".to_string()],
            posts_per_page: 3,
            session_expiration_hours: 24,
            reset_token_expires_secs: 600,
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret_key: env_string("SECRET_KEY").unwrap_or(defaults.secret_key),
            database_url: env_string("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_address: env_string("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            server_url: env_string("SERVER_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .unwrap_or(defaults.server_url),
            mail_server: env_string("MAIL_SERVER"),
            mail_port: env_parse("MAIL_PORT"),
            sender_email: env_string("SENDER_EMAIL").unwrap_or(defaults.sender_email),
            mail_queue_capacity: env_parse("MAIL_QUEUE_CAPACITY")
                .unwrap_or(defaults.mail_queue_capacity)
                .max(1),
            translator_key: env_string("MS_TRANSLATOR_KEY"),
            translator_region: env_string("MS_TRANSLATOR_REGION"),
            elasticsearch_url: env_string("ELASTICSEARCH_URL"),
            search_backend: env_string("SEARCH_BACKEND"),
            languages: env_string("LANGUAGES")
                .map(|v| parse_languages(&v))
                .filter(|langs| !langs.is_empty())
                .unwrap_or(defaults.languages),
            posts_per_page: env_parse("POSTS_PER_PAGE")
                .unwrap_or(defaults.posts_per_page)
                .max(1),
            session_expiration_hours: env_parse("SESSION_EXPIRATION_HOURS")
                .unwrap_or(defaults.session_expiration_hours)
                .clamp(1, MAX_SESSION_EXPIRATION_HOURS),
            reset_token_expires_secs: env_parse("RESET_TOKEN_EXPIRES_SECS")
                .unwrap_or(defaults.reset_token_expires_secs)
                .clamp(1, MAX_RESET_TOKEN_EXPIRES_SECS),
            log_format: env_string("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    pub fn default_language(&self) -> &str {
        self.languages.first().map(String::as_str).unwrap_or("en")
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_languages(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|lang| lang.trim().to_lowercase())
        .filter(|lang| !lang.is_empty())
        .collect()
}
