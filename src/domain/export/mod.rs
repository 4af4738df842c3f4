//! Conversation export and JSON import.

mod csv;
mod exporter;
mod format;

pub use exporter::ConversationExporter;
pub use format::{ExportError, ExportFormat, ExportOptions, ExportedDocument};
