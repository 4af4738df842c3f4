//! Conversation Store Port - persistence for conversation transcripts.
//!
//! A store owns the persisted records outright. Callers read snapshots and
//! write whole snapshots back; there is no field-level update and no
//! locking inside the store.

use async_trait::async_trait;

use crate::domain::conversation::{Conversation, Topic};
use crate::domain::foundation::{ConversationId, Timestamp};

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to (de)serialize conversation: {0}")]
    Serialization(String),

    #[error("Store is closed")]
    Closed,
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Port for conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates and persists an empty conversation.
    ///
    /// `None` or a blank title yields the default title.
    async fn create(&self, title: Option<String>) -> Result<Conversation, StoreError>;

    /// Loads one conversation.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if no record has that id
    async fn get(&self, id: ConversationId) -> Result<Conversation, StoreError>;

    /// Replaces the stored record as one unit, creating it when absent.
    ///
    /// `updatedAt` is restamped (never earlier than the stored value) and
    /// `messageCount` recomputed; the stored snapshot is returned.
    async fn save(&self, conversation: Conversation) -> Result<Conversation, StoreError>;

    /// Removes a conversation.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if no record has that id
    async fn delete(&self, id: ConversationId) -> Result<(), StoreError>;

    /// All conversations, in no particular order.
    async fn list(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Removes every conversation.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Releases the store; later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError>;

    /// Case-insensitive match on title, message text or topic.
    /// An empty query returns everything.
    async fn search(&self, query: &str) -> Result<Vec<Conversation>, StoreError> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|c| c.matches_query(&needle))
            .collect())
    }

    async fn filter_by_topic(&self, topic: Topic) -> Result<Vec<Conversation>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|c| c.has_topic(topic))
            .collect())
    }

    /// Conversations whose `createdAt` lies in `[start, end]`.
    async fn filter_by_date_range(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Conversation>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|c| c.created_between(start, end))
            .collect())
    }
}

/// Stamps `conversation` for a save that replaces `previous`.
pub fn stamp_for_save(conversation: Conversation, previous: Option<&Conversation>) -> Conversation {
    let now = Timestamp::now();
    let at = previous.map_or(now, |p| now.max(p.updated_at()));
    conversation.stamped(at)
}
