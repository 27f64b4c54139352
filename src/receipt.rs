//! Receipt text extraction. The recognised text only pre-fills a draft on the
//! client; nothing here is persisted or trusted as expense data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no OCR service configured")]
    NotConfigured,
    #[error("OCR service failed: {0}")]
    Upstream(String),
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: Vec<u8>, content_type: &str) -> Result<String, ExtractError>;
}

/// Used when no OCR endpoint is configured.
pub struct NoExtractor;

#[async_trait]
impl TextExtractor for NoExtractor {
    async fn extract(&self, _image: Vec<u8>, _content_type: &str) -> Result<String, ExtractError> {
        Err(ExtractError::NotConfigured)
    }
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
}

/// Posts the raw image to an OCR service answering `{"text": "..."}`.
pub struct HttpTextExtractor {
    client: reqwest::Client,
    url: String,
}

impl HttpTextExtractor {
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ExtractError::Upstream(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    async fn extract(&self, image: Vec<u8>, content_type: &str) -> Result<String, ExtractError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(image)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ExtractError::Upstream(err.to_string()))?;
        let body: OcrResponse = response
            .json()
            .await
            .map_err(|err| ExtractError::Upstream(err.to_string()))?;
        Ok(body.text)
    }
}

/// Advisory draft values guessed from receipt text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DraftHint {
    pub title: Option<String>,
    /// Minor units.
    pub amount: Option<i64>,
}

/// Title is the first non-empty line; amount is the last figure on the last
/// line mentioning a total.
pub fn suggest_draft(text: &str) -> DraftHint {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let title = lines.first().map(|line| line.chars().take(80).collect());
    let amount = lines
        .iter()
        .rev()
        .find(|line| line.to_lowercase().contains("total"))
        .and_then(|line| line.split_whitespace().rev().find_map(parse_amount));
    DraftHint { title, amount }
}

/// `12.50`, `$1,234.56` and `12,50` all parse; anything else is ignored.
fn parse_amount(token: &str) -> Option<i64> {
    let token = token.trim_matches(|c: char| !c.is_ascii_digit());
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }
    let separator = token.rfind(['.', ',']);
    let (whole, fraction) = match separator {
        Some(index) if token.len() - index - 1 == 2 => (&token[..index], &token[index + 1..]),
        _ => (token, ""),
    };
    let whole: String = whole.chars().filter(char::is_ascii_digit).collect();
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: i64 = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };
    whole.checked_mul(100)?.checked_add(fraction)
}
