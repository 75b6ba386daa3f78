//! Generator calling the Anthropic Messages API over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use super::{GenerationError, GenerationRequest, TextGenerator};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// HTTP adapter for the Messages API.
pub struct AnthropicGenerator {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl std::fmt::Debug for AnthropicGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGenerator")
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl AnthropicGenerator {
    /// Build an adapter reading its key from the environment variable
    /// `key_env` (usually `ANTHROPIC_API_KEY`).
    pub fn from_env(key_env: &str) -> Self {
        let api_key = std::env::var(key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = key_env, "anthropic generator created without an API key");
        }
        Self::new(api_key)
    }

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn request_body(request: &GenerationRequest) -> Value {
    json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "messages": [{ "role": "user", "content": request.prompt }],
    })
}

/// Concatenate the text blocks of a Messages API response.
fn parse_response(body: &Value) -> Result<String, GenerationError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerationError::Failed("response has no content array".to_string()))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    if text.trim().is_empty() {
        return Err(GenerationError::Failed("response contained no text".to_string()));
    }
    Ok(text)
}

/// Map a non-success HTTP status to a generation error.
fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> GenerationError {
    match status.as_u16() {
        429 => GenerationError::RateLimited { retry_after },
        529 | 500..=599 => GenerationError::Unavailable(format!("{status}: {body}")),
        _ => GenerationError::Failed(format!("{status}: {body}")),
    }
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GenerationError::Unavailable("no Anthropic API key configured".into()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    GenerationError::Unavailable(e.to_string())
                } else {
                    GenerationError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, model = %request.model, "anthropic request failed");
            return Err(status_error(status, retry_after, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Failed(format!("invalid response body: {e}")))?;
        parse_response(&body)
    }
}
