use std::collections::HashMap;
use std::sync::OnceLock;

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use ammonia::Builder;
use html_escape::{decode_html_entities, encode_double_quoted_attribute};
use regex::Regex;
use rust_embed::RustEmbed;
use serde_json::Value;
use tera::{Context, Tera};

use crate::core::errors::{ApiError, ApiResult};
use crate::core::{csrf, flash, session};
use crate::i18n;
use crate::AppState;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

fn load() -> Result<Tera, String> {
    let mut sources = Vec::new();
    for name in Templates::iter() {
        let file = Templates::get(&name).ok_or_else(|| format!("template {} vanished", name))?;
        let source = String::from_utf8(file.data.into_owned())
            .map_err(|e| format!("template {} is not UTF-8: {}", name, e))?;
        sources.push((name.into_owned(), source));
    }

    let mut tera = Tera::default();
    tera.register_filter("linkify", linkify);
    tera.register_function("t", i18n::tera_gettext);
    tera.add_raw_templates(sources).map_err(|e| format!("{:?}", e))?;
    Ok(tera)
}

pub fn tera() -> Result<&'static Tera, ApiError> {
    static TERA: OnceLock<Result<Tera, String>> = OnceLock::new();
    TERA.get_or_init(load)
        .as_ref()
        .map_err(|e| ApiError::InternalError(format!("templates failed to load: {}", e)))
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://[^\s<]+").expect("Regex should compile"))
}

/// Post body as safe HTML: markup is stripped, bare URLs become links.
pub fn linkify_text(text: &str) -> String {
    let clean = Builder::default()
        .tags(std::collections::HashSet::new())
        .clean(text)
        .to_string();

    url_regex()
        .replace_all(&clean, |caps: &regex::Captures| {
            let shown = &caps[0];
            let href = encode_double_quoted_attribute(&decode_html_entities(shown)).into_owned();
            format!(
                r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
                href, shown
            )
        })
        .to_string()
}

fn linkify(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("linkify expects a string"))?;
    Ok(Value::String(linkify_text(text)))
}

/// Context every page extending `base.html` relies on.
fn base_context(lang: &str) -> Context {
    let mut context = Context::new();
    context.insert("lang", lang);
    context.insert("title", "");
    context.insert("current_user", &Value::Null);
    context.insert("flashes", &Vec::<String>::new());
    context.insert("csrf_token", "");
    context.insert("search_enabled", &false);
    context.insert("search_query", "");
    context
}

/// Renders a full page for `req`: the signed-in user, the locale, pending
/// flash messages and the CSRF token are filled in around `context`.
pub fn render(req: &HttpRequest, template: &str, title: &str, context: Context) -> ApiResult {
    render_with_status(req, StatusCode::OK, template, title, context)
}

pub fn render_with_status(
    req: &HttpRequest,
    status: StatusCode,
    template: &str,
    title: &str,
    context: Context,
) -> ApiResult {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::InternalError("application state missing".to_string()))?;
    let lang = i18n::request_locale(req, &state.config.languages);

    let mut page = base_context(&lang);
    page.insert("title", &i18n::gettext(&lang, title));
    page.insert("search_enabled", &state.mirror.is_enabled());
    if let Some(user) = session::current_user(req) {
        page.insert("current_user", &user);
    }
    let flashes = flash::peek(req);
    page.insert("flashes", &flashes);
    let (token, csrf_cookie) = csrf::token(req);
    page.insert("csrf_token", &token);
    page.extend(context);

    let html = tera()?.render(template, &page)?;

    let mut response = HttpResponse::build(status);
    response.insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"));
    if let Some(cookie) = csrf_cookie {
        response.cookie(cookie);
    }
    if !flashes.is_empty() {
        response.cookie(flash::clear_cookie());
    }
    Ok(response.body(html))
}

/// Error pages are rendered without the request, so they show the
/// anonymous layout in the default language.
pub fn error_page(status: StatusCode, template: &str) -> HttpResponse {
    let rendered = tera().and_then(|tera| {
        tera.render(template, &base_context("en"))
            .map_err(ApiError::from)
    });
    match rendered {
        Ok(html) => HttpResponse::build(status)
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .body(html),
        Err(err) => {
            tracing::error!(template, error = %err, "failed to render error page");
            HttpResponse::build(status)
                .insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"))
                .body(status.canonical_reason().unwrap_or("Error"))
        }
    }
}

/// Renders a template outside any request, as emails are.
pub fn render_plain(template: &str, context: &Context) -> Result<String, ApiError> {
    Ok(tera()?.render(template, context)?)
}
