//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Backend endpoint must be an http(s) URL")]
    InvalidEndpoint,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Retry base delay exceeds max delay")]
    InvalidBackoff,

    #[error("Retry deadline must be positive")]
    InvalidDeadline,

    #[error("Storage data directory is empty")]
    InvalidDataDir,

    #[error("Fallback message is empty")]
    EmptyFallbackMessage,
}
