//! Locale negotiation, the UI message catalog and a rough language guess
//! for post bodies.

use std::collections::HashMap;
use std::sync::OnceLock;

use actix_web::http::header;
use actix_web::HttpRequest;
use rust_embed::RustEmbed;
use serde_json::Value;

#[derive(RustEmbed)]
#[folder = "translations"]
struct Catalogs;

type Catalog = HashMap<String, String>;

fn catalogs() -> &'static HashMap<String, Catalog> {
    static CATALOGS: OnceLock<HashMap<String, Catalog>> = OnceLock::new();
    CATALOGS.get_or_init(|| {
        let mut all = HashMap::new();
        for file in Catalogs::iter() {
            let Some(lang) = file.strip_suffix(".json") else {
                continue;
            };
            let Some(content) = Catalogs::get(&file) else {
                continue;
            };
            match serde_json::from_slice::<Catalog>(&content.data) {
                Ok(catalog) => {
                    all.insert(lang.to_string(), catalog);
                }
                Err(err) => tracing::error!(lang, error = %err, "invalid message catalog"),
            }
        }
        all
    })
}

/// Translated `msgid`, or `msgid` itself when there is no translation.
pub fn gettext<'a>(locale: &str, msgid: &'a str) -> std::borrow::Cow<'a, str> {
    catalogs()
        .get(locale)
        .and_then(|catalog| catalog.get(msgid))
        .filter(|msgstr| !msgstr.is_empty())
        .map(|msgstr| std::borrow::Cow::Owned(msgstr.clone()))
        .unwrap_or(std::borrow::Cow::Borrowed(msgid))
}

/// Tera function `t(key=..., lang=...)`.
pub fn tera_gettext(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = args
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("t() needs a `key` argument"))?;
    let lang = args.get("lang").and_then(Value::as_str).unwrap_or("en");
    Ok(Value::String(gettext(lang, key).into_owned()))
}

/// Best supported match for an `Accept-Language` header, falling back to
/// the first supported language.
pub fn select_locale(accept_language: Option<&str>, supported: &[String]) -> String {
    let fallback = supported.first().cloned().unwrap_or_else(|| "en".to_string());
    let Some(header) = accept_language else {
        return fallback;
    };

    let mut candidates: Vec<(f32, usize, String)> = header
        .split(',')
        .enumerate()
        .filter_map(|(position, part)| {
            let mut pieces = part.trim().split(';');
            let tag = pieces.next()?.trim().to_lowercase();
            if tag.is_empty() {
                return None;
            }
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((quality, position, tag))
        })
        .filter(|(quality, _, _)| *quality > 0.0)
        .collect();
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    for (_, _, tag) in candidates {
        if tag == "*" {
            return fallback;
        }
        let primary = tag.split('-').next().unwrap_or(&tag);
        if let Some(found) = supported.iter().find(|lang| lang.as_str() == tag || lang.as_str() == primary) {
            return found.clone();
        }
    }
    fallback
}

pub fn request_locale(req: &HttpRequest, supported: &[String]) -> String {
    let accept = req
        .headers()
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok());
    select_locale(accept, supported)
}

fn is_cyrillic(c: char) -> bool {
    ('\u{0400}'..='\u{04FF}').contains(&c)
}

/// Guesses the language of a short text from its script. Cyrillic text with
/// Ukrainian-only letters is `uk`, other Cyrillic is `ru`, Latin is `en`.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let mut cyrillic = 0usize;
    let mut latin = 0usize;
    let mut ukrainian = false;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        if is_cyrillic(c) {
            cyrillic += 1;
            if matches!(c.to_lowercase().next(), Some('і' | 'ї' | 'є' | 'ґ')) {
                ukrainian = true;
            }
        } else if c.is_ascii_alphabetic() || ('\u{00C0}'..='\u{024F}').contains(&c) {
            latin += 1;
        }
    }
    if cyrillic + latin < 3 {
        return None;
    }
    if cyrillic > latin {
        Some(if ukrainian { "uk" } else { "ru" })
    } else {
        Some("en")
    }
}
