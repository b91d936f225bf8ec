//! Upstream model client.
//!
//! The orchestrator talks to the classification service through the
//! [`ModelClient`] trait so tests can substitute a scripted mock. The
//! production implementation, [`HttpModelClient`], targets an
//! OpenAI-compatible chat-completions endpoint and relies only on the
//! `choices[0].message.content` shape of the response.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors from a single upstream call.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport-level failure (connect, TLS, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status other than 429.
    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },

    /// Upstream signalled rate limiting (HTTP 429).
    #[error("upstream rate limited")]
    RateLimited { retry_after: Option<u64> },

    /// The attempt exceeded its deadline.
    #[error("upstream call timed out")]
    Timeout,

    /// The response parsed but carried no usable content.
    #[error("upstream response contained no content")]
    EmptyResponse,
}

/// One message in the outbound conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// A chat-completion request in the upstream wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Hint that the response should be a JSON object.
    pub response_format: ResponseFormat,
}

/// Response-format hint sent upstream.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            format: "json_object",
        }
    }
}

/// The textual payload extracted from a completion response.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
}

/// Seam between orchestration and the external service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Performs one bounded completion call.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelError>;
}

/// reqwest-backed client for an OpenAI-compatible endpoint.
pub struct HttpModelClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    /// Creates a client with the given per-attempt timeout.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ModelError> {
        let mut req = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Http(e)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ModelError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or(ModelError::EmptyResponse)?;

        if content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(Completion {
            content: content.to_string(),
        })
    }
}
