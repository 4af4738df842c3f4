//! Wire records carried by the streaming transport.

use serde::{Deserialize, Serialize};

use crate::domain::conversation::Source;

/// One `data: <json>` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// An incremental text fragment.
    Chunk { content: String },
    /// Retrieval sources for the message being streamed.
    Sources { sources: Vec<Source> },
    /// End of the reply.
    Done,
    /// The backend gave up mid-stream.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl StreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: Some(message.into()),
        }
    }

    /// Renders the record as one transport line, newline included.
    pub fn to_line(&self) -> String {
        // Infallible for this type.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {}\n", json)
    }
}
