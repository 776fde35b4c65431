#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::cookie::Cookie;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::{header, StatusCode};
use actix_web::test::{self, TestRequest};

use microblog::config::{Config, CSRF_COOKIE};
use microblog::core::db::connect_in_memory;
use microblog::mail::{Email, MemoryMailer};
use microblog::search::{MemorySearchBackend, SearchMirror};
use microblog::translate::Translator;
use microblog::AppState;

/// Builds the full application around a state, the way the binary does.
#[macro_export]
macro_rules! init_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($state.clone()))
                .wrap(actix_web::middleware::from_fn(
                    microblog::core::session::load_current_user,
                ))
                .configure(microblog::configure),
        )
        .await
    };
}

pub struct Harness {
    pub state: AppState,
    pub mailer: MemoryMailer,
    pub backend: Arc<MemorySearchBackend>,
}

pub async fn harness() -> Harness {
    let pool = connect_in_memory().await.unwrap();
    let backend = Arc::new(MemorySearchBackend::new());
    let mirror = SearchMirror::new(backend.clone());
    mirror.create_index("posts").await.unwrap();
    let mailer = MemoryMailer::new();
    let config = Config {
        posts_per_page: 3,
        ..Config::default()
    };
    let state = AppState::new(
        config,
        pool,
        mirror,
        Arc::new(mailer.clone()),
        Translator::new(None, None),
    );
    Harness {
        state,
        mailer,
        backend,
    }
}

/// Response boiled down to what the tests look at.
#[derive(Debug)]
pub struct Page {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: String,
}

impl Page {
    pub fn is_redirect_to(&self, location: &str) -> bool {
        self.status == StatusCode::FOUND && self.location.as_deref() == Some(location)
    }
}

/// A cookie jar that follows what the server sets.
#[derive(Debug, Default, Clone)]
pub struct Browser {
    cookies: HashMap<String, String>,
    language: Option<String>,
}

impl Browser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speaking(language: &str) -> Self {
        Self {
            language: Some(language.to_string()),
            ..Self::default()
        }
    }

    pub fn csrf(&self) -> String {
        self.cookies.get(CSRF_COOKIE).cloned().unwrap_or_default()
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    pub fn attach(&self, mut req: TestRequest) -> TestRequest {
        for (name, value) in &self.cookies {
            req = req.cookie(Cookie::new(name.clone(), value.clone()));
        }
        if let Some(language) = &self.language {
            req = req.insert_header((header::ACCEPT_LANGUAGE, language.clone()));
        }
        req
    }

    pub fn get(&self, uri: &str) -> TestRequest {
        self.attach(TestRequest::get().uri(uri))
    }

    /// Form POST carrying the CSRF token the browser was given.
    pub fn post(&self, uri: &str, fields: &[(&str, &str)]) -> TestRequest {
        let mut form: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        form.push(("csrf_token".to_string(), self.csrf()));
        self.attach(TestRequest::post().uri(uri)).set_form(form)
    }

    /// Form POST with exactly the given fields.
    pub fn post_raw(&self, uri: &str, fields: &[(&str, &str)]) -> TestRequest {
        self.attach(TestRequest::post().uri(uri)).set_form(fields.to_vec())
    }

    pub fn absorb<B>(&mut self, resp: &ServiceResponse<B>) {
        for cookie in resp.response().cookies() {
            let expired = cookie.max_age().map(|age| age.is_zero()).unwrap_or(false);
            if expired || cookie.value().is_empty() {
                self.cookies.remove(cookie.name());
            } else {
                self.cookies
                    .insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
    }
}

pub async fn exchange<S, R, B>(app: &S, browser: &mut Browser, req: R) -> Page
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    browser.absorb(&resp);
    let status = resp.status();
    let location = resp
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = test::read_body(resp).await;
    Page {
        status,
        location,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

pub async fn visit<S, B>(app: &S, browser: &mut Browser, uri: &str) -> Page
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let req = browser.get(uri).to_request();
    exchange(app, browser, req).await
}

pub async fn submit<S, B>(app: &S, browser: &mut Browser, uri: &str, fields: &[(&str, &str)]) -> Page
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let req = browser.post(uri, fields).to_request();
    exchange(app, browser, req).await
}

pub async fn register<S, B>(app: &S, browser: &mut Browser, username: &str, email: &str, password: &str) -> Page
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    visit(app, browser, "/register").await;
    submit(
        app,
        browser,
        "/register",
        &[
            ("username", username),
            ("email", email),
            ("password", password),
            ("password2", password),
        ],
    )
    .await
}

pub async fn login<S, B>(app: &S, browser: &mut Browser, username: &str, password: &str) -> Page
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    visit(app, browser, "/login").await;
    submit(
        app,
        browser,
        "/login",
        &[("username", username), ("password", password), ("remember_me", "y")],
    )
    .await
}

/// Registers and signs in a fresh browser.
pub async fn signed_in<S, B>(app: &S, username: &str) -> Browser
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let mut browser = Browser::new();
    let email = format!("{}@example.com", username);
    let page = register(app, &mut browser, username, &email, "cat").await;
    assert!(page.is_redirect_to("/login"), "registration failed: {:?}", page);
    let page = login(app, &mut browser, username, "cat").await;
    assert!(page.is_redirect_to("/index"), "login failed: {:?}", page);
    browser
}

/// Mail leaves through a background task; give it a moment.
pub async fn wait_for_mail(mailer: &MemoryMailer, count: usize) -> Vec<Email> {
    for _ in 0..200 {
        let sent = mailer.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    mailer.sent()
}
