//! Application configuration module
//!
//! Configuration is read from environment variables (and a `.env` file when
//! present) using the `config` and `dotenvy` crates. Variables carry the
//! `COLLOQUY` prefix and nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use colloquy::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Talking to {}", config.backend.endpoint);
//! ```

mod backend;
mod error;
mod logging;
mod retry;
mod storage;

pub use backend::BackendConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::{Environment, LoggingConfig};
pub use retry::RetryConfig;
pub use storage::StorageConfig;

use serde::Deserialize;

use crate::application::DEFAULT_FALLBACK_MESSAGE;

/// Root application configuration
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Chat backend (endpoint, credentials, timeouts)
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Assistant text stored when the backend cannot answer
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Environment Variable Format
    ///
    /// - `COLLOQUY__BACKEND__ENDPOINT=...` -> `backend.endpoint = ...`
    /// - `COLLOQUY__RETRY__MAX_ATTEMPTS=5` -> `retry.max_attempts = 5`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("COLLOQUY")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.backend.validate()?;
        self.retry.validate()?;
        self.storage.validate()?;
        if self.fallback_message.trim().is_empty() {
            return Err(ValidationError::EmptyFallbackMessage);
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.logging.is_production()
    }
}

fn default_fallback_message() -> String {
    DEFAULT_FALLBACK_MESSAGE.to_string()
}
