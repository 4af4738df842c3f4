//! Conversation aggregate - an ordered transcript plus its metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::{Message, MessageKind, Topic};
use crate::domain::foundation::{ConversationId, MessageId, Timestamp, ValidationError};

/// Title given to conversations created without one.
pub const DEFAULT_TITLE: &str = "New Conversation";

const MAX_DERIVED_TITLE_CHARS: usize = 50;

/// Errors raised when editing a conversation snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("Message {0} not found in conversation")]
    MessageNotFound(MessageId),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A persisted conversation.
///
/// Edits consume the snapshot and hand back a new one; the store replaces
/// whole records, never fields.
///
/// # Invariants
///
/// - messages are in insertion (chronological) order
/// - `updated_at >= created_at`
/// - `message_count == messages.len()` after every [`Conversation::stamped`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    id: ConversationId,
    title: String,
    messages: Vec<Message>,
    created_at: Timestamp,
    updated_at: Timestamp,
    #[serde(default)]
    topics_explored: BTreeSet<Topic>,
    #[serde(default)]
    message_count: usize,
}

/// Derived figures used by export metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStats {
    pub total: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub first_message_at: Option<Timestamp>,
    pub last_message_at: Option<Timestamp>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new(title: Option<String>) -> Self {
        let now = Timestamp::now();
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        Self {
            id: ConversationId::new(),
            title,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            topics_explored: BTreeSet::new(),
            message_count: 0,
        }
    }

    // === Accessors ===

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn topics_explored(&self) -> &BTreeSet<Topic> {
        &self.topics_explored
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    /// Messages suitable for sending to the backend as prior context.
    ///
    /// Suggestions and still-streaming placeholders are left out.
    pub fn history(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.kind() == MessageKind::Message && !m.is_streaming())
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> ConversationStats {
        let user_messages = self.messages.iter().filter(|m| m.is_user()).count();
        ConversationStats {
            total: self.messages.len(),
            user_messages,
            assistant_messages: self.messages.len() - user_messages,
            first_message_at: self.messages.first().map(Message::timestamp),
            last_message_at: self.messages.last().map(Message::timestamp),
        }
    }

    // === Snapshot edits ===

    /// Appends a message at the end of the transcript.
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self.message_count = self.messages.len();
        self
    }

    /// Records a topic as explored.
    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topics_explored.insert(topic);
        self
    }

    /// Replaces the message with the same id.
    ///
    /// # Errors
    ///
    /// - `MessageNotFound` if no message has that id
    pub fn with_replaced_message(mut self, message: Message) -> Result<Self, ConversationError> {
        let slot = self
            .messages
            .iter_mut()
            .find(|m| m.id() == message.id())
            .ok_or(ConversationError::MessageNotFound(message.id()))?;
        *slot = message;
        Ok(self)
    }

    /// Applies `edit` to the message with the given id.
    pub fn with_edited_message<F>(self, id: MessageId, edit: F) -> Result<Self, ConversationError>
    where
        F: FnOnce(&Message) -> Result<Message, ValidationError>,
    {
        let current = self.message(id).ok_or(ConversationError::MessageNotFound(id))?;
        let edited = edit(current)?;
        self.with_replaced_message(edited)
    }

    /// Prepares the snapshot for persistence.
    ///
    /// `updated_at` becomes the latest of `at`, the previous value and
    /// `created_at`; `message_count` is recomputed.
    pub fn stamped(mut self, at: Timestamp) -> Self {
        self.updated_at = at.max(self.updated_at).max(self.created_at);
        self.message_count = self.messages.len();
        self
    }

    // === Queries ===

    /// Case-insensitive match on title, any message text or any topic.
    ///
    /// `needle` must already be lowercased; an empty needle matches.
    pub fn matches_query(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(needle)
            || self
                .messages
                .iter()
                .any(|m| m.text().to_lowercase().contains(needle))
            || self.topics_explored.iter().any(|t| t.as_str().contains(needle))
    }

    pub fn has_topic(&self, topic: Topic) -> bool {
        self.topics_explored.contains(&topic)
    }

    /// Inclusive on both ends.
    pub fn created_between(&self, start: Timestamp, end: Timestamp) -> bool {
        !self.created_at.is_before(&start) && !self.created_at.is_after(&end)
    }
}

/// Title for an implicitly created conversation.
pub fn derive_title(text: &str) -> String {
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if trimmed.chars().count() <= MAX_DERIVED_TITLE_CHARS {
        return trimmed;
    }
    let cut: String = trimmed.chars().take(MAX_DERIVED_TITLE_CHARS).collect();
    format!("{}...", cut.trim_end())
}
