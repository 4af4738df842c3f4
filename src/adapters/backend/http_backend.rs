//! HTTP Chat Backend - ChatBackend over a single JSON POST endpoint.
//!
//! # Configuration
//!
//! ```ignore
//! let config = HttpBackendConfig::new("http://localhost:8000/api/chat")
//!     .with_api_key("secret")
//!     .with_timeout(Duration::from_secs(30));
//!
//! let backend = HttpChatBackend::new(config)?;
//! ```
//!
//! # Streaming
//!
//! Streaming requests set `"stream": true` in the body and ask for
//! `text/event-stream`. The response body is handed back as raw bytes; the
//! `StreamDecoder` turns them into records.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use std::time::Duration;

use crate::ports::{BackendError, ByteStream, ChatBackend, ChatReply, ChatRequest};

/// Configuration for the HTTP backend.
#[derive(Debug)]
pub struct HttpBackendConfig {
    /// Chat endpoint URL.
    pub endpoint: String,
    /// Optional bearer token.
    api_key: Option<Secret<String>>,
    /// Per-request timeout for atomic calls; connect timeout for streams.
    pub timeout: Duration,
}

impl HttpBackendConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(Secret::new(api_key.into()));
        self
    }

    pub fn with_secret_api_key(mut self, api_key: Option<Secret<String>>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret().as_str())
    }
}

/// HTTP implementation of [`ChatBackend`].
pub struct HttpChatBackend {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpChatBackend {
    /// Creates a backend with its own connection pool.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the endpoint is empty or the client cannot be built
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        if config.endpoint.trim().is_empty() {
            return Err(BackendError::InvalidRequest("endpoint is empty".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::InvalidRequest(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn post(&self, body: &WireRequest<'_>) -> RequestBuilder {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = self.config.api_key() {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn map_send_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            }
        } else if err.is_connect() {
            BackendError::network(format!("Connection failed: {}", err))
        } else {
            BackendError::network(err.to_string())
        }
    }

    /// Passes successful responses through; turns error statuses into errors.
    async fn check_status(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Err(match BackendError::from_status(status.as_u16(), body) {
            BackendError::RateLimited { .. } => BackendError::RateLimited { retry_after_secs },
            other => other,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, BackendError> {
        let response = self
            .post(&WireRequest::atomic(request))
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response).await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        serde_json::from_slice::<ChatReply>(&body)
            .map_err(|e| BackendError::parse(format!("Failed to parse reply: {}", e)))
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError> {
        let response = self
            .post(&WireRequest::streaming(request))
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response).await?;

        tracing::debug!(endpoint = %self.config.endpoint, "stream opened");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| BackendError::network(format!("Stream error: {}", e))));
        Ok(Box::pin(stream))
    }
}

// ----- Wire types -----

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    #[serde(flatten)]
    request: &'a ChatRequest,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl<'a> WireRequest<'a> {
    fn atomic(request: &'a ChatRequest) -> Self {
        Self {
            request,
            stream: false,
        }
    }

    fn streaming(request: &'a ChatRequest) -> Self {
        Self {
            request,
            stream: true,
        }
    }
}
