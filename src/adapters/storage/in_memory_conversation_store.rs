//! In-Memory Conversation Store Adapter
//!
//! Keeps conversations in a map. Useful for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::conversation::Conversation;
use crate::domain::foundation::ConversationId;
use crate::ports::{stamp_for_save, ConversationStore, StoreError};

/// In-memory storage for conversations
#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<ConversationId, Conversation>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations
    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, title: Option<String>) -> Result<Conversation, StoreError> {
        self.ensure_open()?;
        let conversation = Conversation::new(title);
        self.conversations
            .write()
            .await
            .insert(conversation.id(), conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        self.ensure_open()?;
        self.conversations
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, conversation: Conversation) -> Result<Conversation, StoreError> {
        self.ensure_open()?;
        let mut conversations = self.conversations.write().await;
        let id = conversation.id();
        let stamped = stamp_for_save(conversation, conversations.get(&id));
        conversations.insert(id, stamped.clone());
        Ok(stamped)
    }

    async fn delete(&self, id: ConversationId) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conversations
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        self.ensure_open()?;
        Ok(self.conversations.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conversations.write().await.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conversation::{Message, Topic};
    use crate::domain::foundation::Timestamp;

    #[tokio::test]
    async fn create_get_roundtrip() {
        let store = InMemoryConversationStore::new();
        let conv = store.create(Some("Demo".into())).await.unwrap();

        assert_eq!(store.get(conv.id()).await.unwrap(), conv);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let store = InMemoryConversationStore::new();
        let id = ConversationId::new();

        assert_eq!(store.get(id).await, Err(StoreError::NotFound(id)));
        assert_eq!(store.delete(id).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn save_is_idempotent() {
        let store = InMemoryConversationStore::new();
        let conv = store
            .create(None)
            .await
            .unwrap()
            .with_message(Message::user("Hi").unwrap());

        let first = store.save(conv.clone()).await.unwrap();
        let second = store.save(conv).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.message_count(), 1);
        assert!(!second.updated_at().is_before(&first.updated_at()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn stale_snapshot_does_not_move_updated_at_back() {
        let store = InMemoryConversationStore::new();
        let stale = store.create(None).await.unwrap();
        let fresh = store
            .save(stale.clone().with_message(Message::assistant("x")))
            .await
            .unwrap();

        let resaved = store.save(stale).await.unwrap();
        assert!(!resaved.updated_at().is_before(&fresh.updated_at()));
    }

    #[tokio::test]
    async fn date_range_filter_is_inclusive() {
        let store = InMemoryConversationStore::new();
        let conv = store.create(None).await.unwrap();
        let at = conv.created_at();

        assert_eq!(store.filter_by_date_range(at, at).await.unwrap().len(), 1);
        let past = store
            .filter_by_date_range(Timestamp::from_unix_secs(0), Timestamp::from_unix_secs(60))
            .await
            .unwrap();
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn topic_filter_matches_explored_topics() {
        let store = InMemoryConversationStore::new();
        let conv = store.create(None).await.unwrap();
        store.save(conv.with_topic(Topic::Education)).await.unwrap();
        store.create(None).await.unwrap();

        assert_eq!(store.filter_by_topic(Topic::Education).await.unwrap().len(), 1);
        assert!(store.filter_by_topic(Topic::Contact).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_and_close() {
        let store = InMemoryConversationStore::new();
        store.create(None).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty().await);

        store.close().await.unwrap();
        assert_eq!(store.create(None).await, Err(StoreError::Closed));
    }
}
