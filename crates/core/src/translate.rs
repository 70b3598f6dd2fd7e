//! Machine Translation
//!
//! The relays only ever need "put this text into language X". The source
//! language is always auto-detected by the service; the identity rule for
//! same-language pairs is applied here, before any request is made.

use crate::error::TranslateError;
use crate::model::LanguageCode;
use async_trait::async_trait;
use serde_json::Value;

const GOOGLE_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";

/// Defines the contract for any translation backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates `text` (source language auto-detected) into `target`.
    async fn translate(&self, text: &str, target: &LanguageCode) -> Result<String, TranslateError>;
}

/// Translates `text` from `source` into `target`.
///
/// Returns the input untouched, without calling the backend, when the two
/// languages are the same.
pub async fn translate_between(
    translator: &dyn Translator,
    text: &str,
    source: &LanguageCode,
    target: &LanguageCode,
) -> Result<String, TranslateError> {
    if source == target {
        return Ok(text.to_string());
    }
    translator.translate(text, target).await
}

/// A `Translator` backed by Google's public translate endpoint.
pub struct GoogleTranslator {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for GoogleTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleTranslator {
    pub fn new() -> Self {
        Self::with_endpoint(GOOGLE_TRANSLATE_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

/// Joins the translated segments of a `translate_a/single` response.
///
/// The body looks like `[[["hola","hello",null,null,10], ...], null, "en", ...]`.
fn parse_segments(body: &Value) -> Result<String, TranslateError> {
    let segments = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslateError::Malformed(body.to_string()))?;
    let text: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(TranslateError::Malformed(body.to_string()));
    }
    Ok(text)
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, target: &LanguageCode) -> Result<String, TranslateError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TranslateError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;
        parse_segments(&body)
    }
}
