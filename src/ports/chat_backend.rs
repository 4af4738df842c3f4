//! Chat Backend Port - the single call contract with the AI backend.
//!
//! The backend receives the user's text plus prior history and answers either
//! with one JSON reply or with a chunked stream of `data: <json>` records.
//! Which model sits behind it is not this crate's concern.
//!
//! # Example
//!
//! ```ignore
//! let request = ChatRequest::new("Hi", conversation.history());
//! let reply = backend.send(&request).await?;
//! println!("{}", reply.response);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::domain::conversation::{Message, Source};

/// Raw transport reads of a streaming reply.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// Port for talking to the chat backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Sends a message and waits for one complete reply.
    ///
    /// # Errors
    ///
    /// Returns `BackendError`; see [`BackendError::is_retryable`] for which
    /// kinds are worth another attempt.
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, BackendError>;

    /// Sends a message and returns the reply as a byte stream.
    ///
    /// Errors raised while opening the stream come back here; errors after
    /// that arrive as items of the stream.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError>;
}

/// Request body shared by both delivery modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<Message>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            message: message.into(),
            history,
        }
    }
}

/// Atomic reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatReply {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            sources: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }
}

/// Backend call failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Connection, DNS or mid-transfer failure.
    #[error("network error: {0}")]
    Network(String),

    /// 5xx response.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// 4xx response other than 429.
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    /// 429 response.
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The reply body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// The call or the overall send deadline expired.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Maps an HTTP error status to its error kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }

    /// Returns true for transient failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Network(_)
                | BackendError::Server { .. }
                | BackendError::RateLimited { .. }
                | BackendError::Timeout { .. }
        )
    }

    /// Short machine-readable name, used in logs and send outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Network(_) => "network",
            BackendError::Server { .. } => "server",
            BackendError::Client { .. } => "client",
            BackendError::RateLimited { .. } => "rate_limited",
            BackendError::Parse(_) => "parse",
            BackendError::Timeout { .. } => "timeout",
            BackendError::InvalidRequest(_) => "invalid_request",
        }
    }
}
