//! Completion Gateway seam.
//!
//! The gateway accepts a transcript and returns the raw response body as a
//! stream of byte chunks; framing and parsing happen in
//! [`crate::core::chat_stream`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest};
use crate::utils::auth::add_auth_headers;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("failed to reach completion endpoint: {0}")]
    Connection(String),

    #[error("completion endpoint returned HTTP {status}\n{message}")]
    Status { status: u16, message: String },

    #[error("completion response has no body")]
    NoBody,

    #[error("stream read failed: {0}")]
    Read(String),

    #[error("{0}")]
    Api(String),

    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Errors raised before the first byte of the body was read.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StreamError::Connection(_) | StreamError::Status { .. } | StreamError::NoBody
        )
    }
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Opens one completion request. Fails before yielding any bytes when the
    /// endpoint cannot be reached or answers with a non-success status.
    async fn open_stream(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, StreamError>;
}

#[derive(Clone)]
pub struct HttpCompletionGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl HttpCompletionGateway {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model,
        }
    }

    pub fn build_client(connect_timeout: Option<Duration>) -> Result<reqwest::Client, StreamError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder
            .build()
            .map_err(|err| StreamError::Connection(err.to_string()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionGateway for HttpCompletionGateway {
    async fn open_stream(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, StreamError> {
        let request = ChatRequest::new(messages, self.model.clone());
        let http_request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");
        let http_request = match self.api_key.as_deref() {
            Some(key) => add_auth_headers(http_request, key),
            None => http_request,
        };

        debug!(endpoint = %self.endpoint, turns = request.messages.len(), "opening completion stream");

        let response = http_request
            .json(&request)
            .send()
            .await
            .map_err(|err| StreamError::Connection(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(StreamError::Status {
                status: status.as_u16(),
                message: format_api_error(&error_text),
            });
        }

        if response.content_length() == Some(0) {
            return Err(StreamError::NoBody);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| StreamError::Read(err.to_string())));
        Ok(Box::pin(stream))
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Renders an error body for display: JSON is pretty-printed behind a one-line
/// summary when one can be found, XML and plain text are fenced as-is.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}
