//! OpenAI-compatible generation client.
//!
//! Requests go to `{base_url}/responses` in JSON mode. The output text is taken
//! from the first `message` entry of `output[]`, falling back to the chat
//! completions shape (`choices[0].message.content`) and finally to the raw body.
//!
//! ## Error classification
//!
//! | Condition                          | Result                                    |
//! |------------------------------------|-------------------------------------------|
//! | 408, 409, 429, 5xx                 | `Transient` (with `Retry-After` if sent)  |
//! | other non-2xx                      | `Permanent`                               |
//! | connect / timeout / send failure   | `Transient`                               |
//! | undecodable success body           | `Permanent`                               |
//! | cancellation token fired           | `Cancelled`                               |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::GenerationError;
use crate::generator::TextGenerator;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for [`OpenAiClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4o".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(90),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Generation client for the OpenAI Responses API.
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::permanent(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, instructions: &str, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.config.model,
            "instructions": instructions,
            "input": prompt,
            "text": { "format": { "type": "json_object" } },
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "generation API error");
            return Err(classify_status(status, text, retry_after));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::permanent(format!("undecodable response: {e}")))?;

        Ok(extract_output_text(&payload))
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(
        &self,
        instructions: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.send(instructions, prompt) => result,
        }
    }
}

fn classify_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> GenerationError {
    let message = format!("status {}: {}", status.as_u16(), body);
    let transient = status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
        || status.is_server_error();
    if transient {
        GenerationError::Transient {
            message,
            retry_after,
        }
    } else {
        GenerationError::Permanent(message)
    }
}

/// Only the delta-seconds form is understood; HTTP dates are ignored.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let seconds: f64 = raw.parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

fn extract_output_text(payload: &Value) -> String {
    if let Some(items) = payload.get("output").and_then(Value::as_array) {
        let message_text = items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
            .find_map(|item| item.pointer("/content/0/text").and_then(Value::as_str));
        if let Some(text) = message_text {
            return text.to_owned();
        }
    }

    if let Some(content) = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return content.to_owned();
    }

    warn!("could not locate output text in generation response, returning full body");
    payload.to_string()
}
