//! ChatSession - the "current conversation" of one user-facing session.
//!
//! The session only remembers which conversation is current, by id. All
//! content lives in the store. Switching, starting a new conversation,
//! deleting the current one or abandoning the session makes any in-flight
//! stream stale so it stops touching session state.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::dispatcher::{DispatchError, MessageDispatcher, SendMode, SendOutcome};
use super::events::SessionEvent;
use super::liveness::Liveness;
use crate::domain::conversation::{derive_title, Conversation};
use crate::domain::foundation::ConversationId;
use crate::ports::{ConversationStore, StoreError};

pub struct ChatSession {
    dispatcher: Arc<MessageDispatcher>,
    current: RwLock<Option<ConversationId>>,
    liveness: Liveness,
    default_mode: SendMode,
}

impl ChatSession {
    pub fn new(dispatcher: Arc<MessageDispatcher>) -> Self {
        Self {
            dispatcher,
            current: RwLock::new(None),
            liveness: Liveness::new(),
            default_mode: SendMode::default(),
        }
    }

    pub fn with_default_mode(mut self, mode: SendMode) -> Self {
        self.default_mode = mode;
        self
    }

    fn store(&self) -> &Arc<dyn ConversationStore> {
        self.dispatcher.store()
    }

    pub async fn current_id(&self) -> Option<ConversationId> {
        *self.current.read().await
    }

    /// Loads the current conversation, if any.
    pub async fn current(&self) -> Result<Option<Conversation>, StoreError> {
        match self.current_id().await {
            Some(id) => self.store().get(id).await.map(Some),
            None => Ok(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.dispatcher.subscribe()
    }

    /// Creates a conversation and makes it current.
    pub async fn new_conversation(&self, title: Option<String>) -> Result<Conversation, StoreError> {
        let conversation = self.store().create(title).await?;
        self.set_current(Some(conversation.id())).await;
        Ok(conversation)
    }

    /// Makes an existing conversation current.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the id is unknown; the current
    /// conversation is left unchanged then.
    pub async fn switch_to(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        let conversation = self.store().get(id).await?;
        self.set_current(Some(id)).await;
        Ok(conversation)
    }

    /// Deletes a conversation, clearing the current reference if it pointed
    /// there. An in-flight send into it is abandoned and cannot write the
    /// record back.
    pub async fn delete(&self, id: ConversationId) -> Result<(), StoreError> {
        let mut current = self.current.write().await;
        if *current == Some(id) {
            self.liveness.invalidate();
            *current = None;
        }
        drop(current);
        self.dispatcher.delete(id).await
    }

    /// Stops every in-flight stream from touching session state.
    pub fn abandon(&self) {
        tracing::debug!(generation = self.liveness.generation(), "session abandoned");
        self.liveness.invalidate();
    }

    /// Sends with the session's default mode.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, DispatchError> {
        self.send_with_mode(text, self.default_mode).await
    }

    /// Sends into the current conversation, creating one titled after `text`
    /// when there is none.
    pub async fn send_with_mode(
        &self,
        text: &str,
        mode: SendMode,
    ) -> Result<SendOutcome, DispatchError> {
        if text.trim().is_empty() {
            return Err(DispatchError::EmptyMessage);
        }

        let id = match self.current_id().await {
            Some(id) => id,
            None => {
                let conversation = self.store().create(Some(derive_title(text))).await?;
                let mut current = self.current.write().await;
                // Another send may have created one meanwhile.
                match *current {
                    Some(existing) => {
                        drop(current);
                        self.dispatcher.delete(conversation.id()).await?;
                        existing
                    }
                    None => {
                        *current = Some(conversation.id());
                        conversation.id()
                    }
                }
            }
        };

        let token = self.liveness.token();
        self.dispatcher.send_with_liveness(id, text, mode, token).await
    }

    async fn set_current(&self, id: Option<ConversationId>) {
        let mut current = self.current.write().await;
        if *current != id {
            self.liveness.invalidate();
            *current = id;
        }
    }
}
