//! Export formats, options and the produced document.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Output formats the exporter can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Json,
    Markdown,
    Text,
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Json,
        ExportFormat::Markdown,
        ExportFormat::Text,
        ExportFormat::Csv,
    ];

    /// MIME type of the produced content.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::Text => "text/plain",
            ExportFormat::Csv => "text/csv",
        }
    }

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Text => "txt",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Markdown => write!(f, "markdown"),
            ExportFormat::Text => write!(f, "txt"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "txt" | "text" => Ok(ExportFormat::Text),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Independent toggles for optional export content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Conversation id, dates, counts and topics.
    pub include_metadata: bool,
    /// Source lists attached to assistant messages.
    pub include_sources: bool,
    /// Per-message timestamps.
    pub include_timestamps: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            include_sources: true,
            include_timestamps: true,
        }
    }
}

impl ExportOptions {
    /// Only the transcript text.
    pub fn minimal() -> Self {
        Self {
            include_metadata: false,
            include_sources: false,
            include_timestamps: false,
        }
    }
}

/// A rendered export ready to be written or downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedDocument {
    pub content: String,
    pub filename: String,
    pub mime_type: String,
    pub format: ExportFormat,
}

impl ExportedDocument {
    pub(crate) fn new(content: String, format: ExportFormat, base_filename: &str) -> Self {
        Self {
            content,
            filename: format!("{}.{}", base_filename, format.extension()),
            mime_type: format.mime_type().to_string(),
            format,
        }
    }
}

/// Errors raised by export and import.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportError {
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to serialize export: {0}")]
    Serialization(String),

    #[error("Failed to import conversations: {0}")]
    Import(String),
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}
