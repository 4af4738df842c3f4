//! Chat backend configuration

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::backend::HttpBackendConfig;

/// Chat backend configuration
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Chat endpoint URL
    #[serde(default)]
    pub endpoint: String,

    /// Bearer token sent with every request
    pub api_key: Option<Secret<String>>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Stream replies unless told otherwise
    #[serde(default = "default_stream_by_default")]
    pub stream_by_default: bool,
}

impl BackendConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check if an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }

    /// Builds the HTTP adapter configuration.
    pub fn to_http_config(&self) -> HttpBackendConfig {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|_| self.has_api_key())
            .map(|k| Secret::new(k.expose_secret().clone()));

        HttpBackendConfig::new(self.endpoint.clone())
            .with_secret_api_key(api_key)
            .with_timeout(self.request_timeout())
    }

    /// Validate backend configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ValidationError::MissingRequired("COLLOQUY__BACKEND__ENDPOINT"));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ValidationError::InvalidEndpoint);
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 600 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            stream_by_default: default_stream_by_default(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_stream_by_default() -> bool {
    true
}
