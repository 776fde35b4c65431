//! Post translation through the Microsoft Translator v3 API.

use std::num::NonZeroUsize;

use actix_web::{web, HttpRequest, HttpResponse};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::csrf;
use crate::core::errors::ApiResult;
use crate::core::session::CurrentUser;
use crate::AppState;

pub const DEFAULT_ENDPOINT: &str = "https://api.cognitive.microsofttranslator.com/translate";
pub const NOT_CONFIGURED: &str = "Error: the translation service is not configured.";
pub const FAILED: &str = "Error: the translation service failed.";

const CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(512) {
    Some(size) => size,
    None => unreachable!(),
};

type CacheKey = (String, String, String);

pub struct Translator {
    client: reqwest::Client,
    endpoint: String,
    key: Option<String>,
    region: Option<String>,
    cache: Mutex<LruCache<CacheKey, String>>,
}

#[derive(Deserialize)]
struct TranslationResult {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

impl Translator {
    pub fn new(key: Option<String>, region: Option<String>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, key, region)
    }

    pub fn with_endpoint(endpoint: &str, key: Option<String>, region: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            key,
            region,
            cache: Mutex::new(LruCache::new(CACHE_SIZE)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.translator_key.clone(), config.translator_region.clone())
    }

    /// Translated text, or a user-facing error message. Only successful
    /// translations are cached.
    pub async fn translate(&self, text: &str, source: &str, dest: &str) -> String {
        let (Some(key), Some(region)) = (&self.key, &self.region) else {
            return NOT_CONFIGURED.to_string();
        };

        let cache_key = (text.to_string(), source.to_string(), dest.to_string());
        if let Some(hit) = self.cache.lock().get(&cache_key) {
            return hit.clone();
        }

        match self.request(key, region, text, source, dest).await {
            Ok(translated) => {
                self.cache.lock().put(cache_key, translated.clone());
                translated
            }
            Err(err) => {
                tracing::error!(source, dest, error = %err, "translation failed");
                FAILED.to_string()
            }
        }
    }

    async fn request(
        &self,
        key: &str,
        region: &str,
        text: &str,
        source: &str,
        dest: &str,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("api-version", "3.0"), ("from", source), ("to", dest)])
            .header("Ocp-Apim-Subscription-Key", key)
            .header("Ocp-Apim-Subscription-Region", region)
            .json(&[serde_json::json!({ "Text": text })])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("translator returned {}", status);
        }

        let results: Vec<TranslationResult> = response.json().await?;
        results
            .into_iter()
            .next()
            .and_then(|result| result.translations.into_iter().next())
            .map(|translation| translation.text)
            .ok_or_else(|| anyhow::anyhow!("translator returned no translations"))
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_language: String,
    pub dest_language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub text: String,
}

/// `POST /translate`
pub async fn translate_text(
    req: HttpRequest,
    _user: CurrentUser,
    state: web::Data<AppState>,
    body: web::Json<TranslateRequest>,
) -> ApiResult {
    csrf::verify_header(&req)?;
    let text = state
        .translator
        .translate(&body.text, &body.source_language, &body.dest_language)
        .await;
    Ok(HttpResponse::Ok().json(TranslateResponse { text }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn translator(server: &MockServer) -> Translator {
        Translator::with_endpoint(
            &format!("{}/translate", server.uri()),
            Some("key".to_string()),
            Some("westeurope".to_string()),
        )
    }

    #[tokio::test]
    async fn missing_credentials_are_reported() {
        let translator = Translator::new(Some("key".to_string()), None);
        assert_eq!(translator.translate("hi", "en", "uk").await, NOT_CONFIGURED);
    }

    #[tokio::test]
    async fn successes_are_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("api-version", "3.0"))
            .and(query_param("from", "en"))
            .and(query_param("to", "uk"))
            .and(header("Ocp-Apim-Subscription-Key", "key"))
            .and(header("Ocp-Apim-Subscription-Region", "westeurope"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "translations": [{ "text": "Привіт", "to": "uk" }] }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let translator = translator(&server);
        assert_eq!(translator.translate("Hello", "en", "uk").await, "Привіт");
        assert_eq!(translator.translate("Hello", "en", "uk").await, "Привіт");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let translator = translator(&server);
        assert_eq!(translator.translate("Hello", "en", "uk").await, FAILED);
        assert_eq!(translator.translate("Hello", "en", "uk").await, FAILED);
    }

    #[tokio::test]
    async fn malformed_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "unexpected": true })))
            .mount(&server)
            .await;

        assert_eq!(translator(&server).translate("Hello", "en", "uk").await, FAILED);
    }
}
