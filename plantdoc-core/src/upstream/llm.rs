//! Generative text (Gemini `generateContent`).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;

use super::{http_client, read_json, transport_error};
use crate::config::LlmConfig;
use crate::error::{Error, Result};

const SERVICE: &str = "llm";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, with all its parts joined.
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// HTTP client for Gemini
pub struct GeminiClient {
    url: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            Error::Config("llm.api_key (or GEMINI_API_KEY) is required".to_string())
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&api_key)
                .map_err(|e| Error::Config(format!("invalid llm api key header: {}", e)))?,
        );

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            urlencoding::encode(&config.model)
        );

        Ok(Self {
            url,
            http: http_client(SERVICE, config.timeout_secs, headers)?,
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let started = std::time::Instant::now();
        let response = self
            .http
            .post(&self.url)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
            }))
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let body: GenerateResponse = read_json(SERVICE, response).await?;
        let text = body.into_text().ok_or_else(|| Error::Upstream {
            service: SERVICE,
            status: None,
            message: "response contained no text".to_string(),
        })?;

        tracing::debug!(
            prompt_chars = prompt.len(),
            response_chars = text.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Text generated"
        );
        Ok(text)
    }
}
