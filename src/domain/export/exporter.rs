//! ConversationExporter - renders conversations as JSON, Markdown, text or CSV.
//!
//! Rendering is pure: the same conversation and options always produce the
//! same bytes. Nothing here reads the clock.

use serde_json::Value;

use super::csv;
use super::{ExportError, ExportFormat, ExportOptions, ExportedDocument};
use crate::domain::conversation::{Conversation, Message, MessageKind};

const BANNER_WIDTH: usize = 60;

/// Stateless renderer for conversation exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationExporter;

impl ConversationExporter {
    pub fn new() -> Self {
        Self
    }

    /// Renders one conversation.
    ///
    /// # Errors
    ///
    /// - `Serialization` if the JSON encoder fails
    pub fn export(
        &self,
        conversation: &Conversation,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<ExportedDocument, ExportError> {
        let content = match format {
            ExportFormat::Json => {
                serde_json::to_string_pretty(&json_value(conversation, options)?)?
            }
            ExportFormat::Markdown => markdown(conversation, options, 1),
            ExportFormat::Text => text(conversation, options),
            ExportFormat::Csv => {
                let mut out = csv::record(csv_header(options, false));
                for message in conversation.messages() {
                    out.push('\n');
                    out.push_str(&csv::record(csv_row(message, options, None)));
                }
                out.push('\n');
                out
            }
        };

        Ok(ExportedDocument::new(content, format, &base_filename(conversation)))
    }

    /// Renders several conversations into one document.
    pub fn export_batch(
        &self,
        conversations: &[Conversation],
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<ExportedDocument, ExportError> {
        let content = match format {
            ExportFormat::Json => {
                let values = conversations
                    .iter()
                    .map(|c| json_value(c, options))
                    .collect::<Result<Vec<_>, _>>()?;
                serde_json::to_string_pretty(&Value::Array(values))?
            }
            ExportFormat::Markdown => {
                let mut out = format!("# Conversations Export ({})\n", conversations.len());
                for conversation in conversations {
                    out.push('\n');
                    out.push_str(&markdown(conversation, options, 2));
                }
                out
            }
            ExportFormat::Text => {
                let mut out = banner(&format!("CONVERSATIONS EXPORT ({})", conversations.len()), '#');
                for conversation in conversations {
                    out.push('\n');
                    out.push_str(&text(conversation, options));
                }
                out
            }
            ExportFormat::Csv => {
                let mut out = csv::record(csv_header(options, true));
                for conversation in conversations {
                    let id = conversation.id().to_string();
                    for message in conversation.messages() {
                        out.push('\n');
                        out.push_str(&csv::record(csv_row(message, options, Some(&id))));
                    }
                }
                out.push('\n');
                out
            }
        };

        let base = format!("conversations-{}", conversations.len());
        Ok(ExportedDocument::new(content, format, &base))
    }

    /// Parses a JSON export (single object or batch array) back into
    /// conversations.
    ///
    /// # Errors
    ///
    /// - `Import` if the content is not JSON or lacks persisted fields,
    ///   which is the case for exports made with options turned off
    pub fn import_json(&self, content: &str) -> Result<Vec<Conversation>, ExportError> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| ExportError::Import(e.to_string()))?;

        let items = match value {
            Value::Array(items) => items,
            single @ Value::Object(_) => vec![single],
            other => {
                return Err(ExportError::Import(format!(
                    "expected an object or array, found {}",
                    json_kind(&other)
                )))
            }
        };

        items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<Conversation>(item)
                    .map_err(|e| ExportError::Import(e.to_string()))
            })
            .collect()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// JSON
// ════════════════════════════════════════════════════════════════════════════════

/// The persisted record, trimmed per options.
fn json_value(conversation: &Conversation, options: &ExportOptions) -> Result<Value, ExportError> {
    let mut value = serde_json::to_value(conversation)?;

    if let Value::Object(root) = &mut value {
        if !options.include_metadata {
            for key in ["createdAt", "updatedAt", "topicsExplored", "messageCount"] {
                root.remove(key);
            }
        }
        if let Some(Value::Array(messages)) = root.get_mut("messages") {
            for message in messages.iter_mut().filter_map(Value::as_object_mut) {
                if !options.include_sources {
                    message.remove("sources");
                }
                if !options.include_timestamps {
                    message.remove("timestamp");
                }
            }
        }
    }

    Ok(value)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Markdown
// ════════════════════════════════════════════════════════════════════════════════

/// `depth` is the heading level of the conversation title.
fn markdown(conversation: &Conversation, options: &ExportOptions, depth: usize) -> String {
    let h = |level: usize| "#".repeat(depth + level);
    let mut out = format!("{} {}\n\n", h(0), conversation.title());

    if options.include_metadata {
        let stats = conversation.stats();
        out.push_str(&format!("{} Metadata\n\n", h(1)));
        out.push_str(&format!("- **Conversation ID:** {}\n", conversation.id()));
        out.push_str(&format!(
            "- **Created:** {}\n",
            conversation.created_at().display_string()
        ));
        out.push_str(&format!(
            "- **Updated:** {}\n",
            conversation.updated_at().display_string()
        ));
        out.push_str(&format!(
            "- **Messages:** {} ({} user, {} assistant)\n",
            stats.total, stats.user_messages, stats.assistant_messages
        ));
        out.push_str(&format!("- **Topics:** {}\n\n", topic_list(conversation)));
    }

    out.push_str(&format!("{} Conversation\n\n", h(1)));

    for message in conversation.messages() {
        out.push_str(&format!("{} {}\n\n", h(2), message.sender_label()));
        if options.include_timestamps {
            out.push_str(&format!("*{}*\n\n", message.timestamp().display_string()));
        }
        out.push_str(message.text());
        out.push_str("\n\n");

        if options.include_sources {
            if let Some(sources) = message.sources().filter(|s| !s.is_empty()) {
                out.push_str("**Sources:**\n\n");
                for source in sources {
                    out.push_str(&format!(
                        "- *{}* ({:.2}): {}\n",
                        source.category, source.score, source.content
                    ));
                }
                out.push('\n');
            }
        }
    }

    out
}

// ════════════════════════════════════════════════════════════════════════════════
// Plain text
// ════════════════════════════════════════════════════════════════════════════════

fn banner(title: &str, rule: char) -> String {
    let line: String = std::iter::repeat(rule).take(BANNER_WIDTH).collect();
    format!("{line}\n{title}\n{line}\n")
}

fn text(conversation: &Conversation, options: &ExportOptions) -> String {
    let mut out = banner(&conversation.title().to_uppercase(), '=');

    if options.include_metadata {
        let stats = conversation.stats();
        out.push_str(&format!("Conversation ID: {}\n", conversation.id()));
        out.push_str(&format!(
            "Created: {}\n",
            conversation.created_at().display_string()
        ));
        out.push_str(&format!(
            "Updated: {}\n",
            conversation.updated_at().display_string()
        ));
        out.push_str(&format!(
            "Messages: {} ({} user, {} assistant)\n",
            stats.total, stats.user_messages, stats.assistant_messages
        ));
        out.push_str(&format!("Topics: {}\n", topic_list(conversation)));
        out.push_str(&"-".repeat(BANNER_WIDTH));
        out.push('\n');
    }

    for message in conversation.messages() {
        out.push('\n');
        if options.include_timestamps {
            out.push_str(&format!("[{}] ", message.timestamp().display_string()));
        }
        out.push_str(&format!("{}:\n{}\n", message.sender_label(), message.text()));

        if options.include_sources {
            if let Some(sources) = message.sources().filter(|s| !s.is_empty()) {
                out.push_str("  Sources:\n");
                for source in sources {
                    out.push_str(&format!(
                        "  - [{}] {} ({:.2})\n",
                        source.category, source.content, source.score
                    ));
                }
            }
        }
    }

    out
}

// ════════════════════════════════════════════════════════════════════════════════
// CSV
// ════════════════════════════════════════════════════════════════════════════════

fn csv_header(options: &ExportOptions, with_conversation: bool) -> Vec<&'static str> {
    let mut header = Vec::with_capacity(6);
    if with_conversation {
        header.push("conversation_id");
    }
    if options.include_timestamps {
        header.push("timestamp");
    }
    header.extend(["sender", "kind", "message"]);
    if options.include_sources {
        header.push("sources");
    }
    header
}

fn csv_row(message: &Message, options: &ExportOptions, conversation_id: Option<&str>) -> Vec<String> {
    let mut row = Vec::with_capacity(6);
    if let Some(id) = conversation_id {
        row.push(id.to_string());
    }
    if options.include_timestamps {
        row.push(message.timestamp().to_rfc3339());
    }
    row.push(message.sender_label().to_string());
    row.push(kind_label(message).to_string());
    row.push(message.text().to_string());
    if options.include_sources {
        let sources = message
            .sources()
            .unwrap_or_default()
            .iter()
            .map(|s| format!("{}: {}", s.category, s.content))
            .collect::<Vec<_>>()
            .join("; ");
        row.push(sources);
    }
    row
}

fn kind_label(message: &Message) -> &'static str {
    match message.kind() {
        MessageKind::Message => "message",
        MessageKind::Suggestions => "suggestions",
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════════════════

fn topic_list(conversation: &Conversation) -> String {
    if conversation.topics_explored().is_empty() {
        return "none".to_string();
    }
    conversation
        .topics_explored()
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn base_filename(conversation: &Conversation) -> String {
    format!(
        "{}-{}",
        slug(conversation.title()),
        conversation.created_at().date_string()
    )
}

/// Lowercase alphanumerics; every other run becomes a single `-`.
fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "conversation".to_string()
    } else {
        trimmed.to_string()
    }
}
