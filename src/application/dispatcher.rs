//! MessageDispatcher - runs one user send end to end.
//!
//! A send appends the user message, calls the backend (atomically or as a
//! stream) through the retry manager, and always leaves exactly one
//! assistant message behind: the reply, or the fallback text when anything
//! on the backend side fails.
//!
//! Every read-modify-write of a conversation goes through one commit lock so
//! overlapping sends cannot overwrite each other's snapshots. Streaming
//! placeholders are addressed by message id, never by position.

use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{timeout_at, Instant};

use super::events::SessionEvent;
use super::liveness::LivenessToken;
use super::retry::RetryManager;
use crate::domain::conversation::{
    Conversation, ConversationError, Message, SendPhase, TopicDetector,
};
use crate::domain::foundation::{ConversationId, MessageId, StateMachine};
use crate::domain::stream::{DecoderEvent, StreamDecoder};
use crate::ports::{BackendError, ChatBackend, ChatRequest, ConversationStore, StoreError};

/// Text of the assistant message produced when a send fails.
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "I'm sorry, I'm having trouble connecting right now. Please try again in a moment.";

const EVENT_CAPACITY: usize = 256;

/// How the reply is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    Atomic,
    #[default]
    Streaming,
}

/// Errors that abort a send. Backend failures never appear here; they are
/// turned into the fallback reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Message text is empty")]
    EmptyMessage,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

/// Why a send ended on the fallback path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFailure {
    #[error("backend call failed: {0}")]
    Backend(BackendError),

    #[error("stream ended with error: {0}")]
    Stream(String),

    #[error("send was abandoned")]
    Cancelled,
}

/// Result of one send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub conversation_id: ConversationId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    /// `Complete` or `Error`.
    pub phase: SendPhase,
    /// Set whenever the fallback path was taken.
    pub failure: Option<SendFailure>,
    /// Conversation as stored after the send.
    pub conversation: Conversation,
}

impl SendOutcome {
    pub fn assistant_message(&self) -> Option<&Message> {
        self.conversation.message(self.assistant_message_id)
    }
}

/// Orchestrates sends against a backend and a store.
pub struct MessageDispatcher {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ConversationStore>,
    retry: RetryManager,
    fallback_message: String,
    commit_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl MessageDispatcher {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn ConversationStore>,
        retry: RetryManager,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            store,
            retry,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            commit_lock: Mutex::new(()),
            events,
        }
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    pub fn fallback_message(&self) -> &str {
        &self.fallback_message
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Deletes a conversation. Runs under the commit lock so an in-flight
    /// commit cannot write the record back afterwards.
    pub async fn delete(&self, conversation_id: ConversationId) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock().await;
        self.store.delete(conversation_id).await
    }

    /// Receives events from every send started after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Sends `text` into an existing conversation.
    ///
    /// # Errors
    ///
    /// - `EmptyMessage` if `text` is blank
    /// - `Store` if the conversation cannot be read or written
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        text: &str,
        mode: SendMode,
    ) -> Result<SendOutcome, DispatchError> {
        self.send_with_liveness(conversation_id, text, mode, LivenessToken::detached())
            .await
    }

    /// Like [`send`](Self::send), but stops publishing events and stops
    /// reading the stream once `liveness` goes stale.
    pub async fn send_with_liveness(
        &self,
        conversation_id: ConversationId,
        text: &str,
        mode: SendMode,
        liveness: LivenessToken,
    ) -> Result<SendOutcome, DispatchError> {
        let user_message = Message::user(text).map_err(|_| DispatchError::EmptyMessage)?;
        let user_message_id = user_message.id();
        let deadline = self.retry.policy().deadline.map(|d| Instant::now() + d);

        let mut tracker = PhaseTracker::new(conversation_id, &self.events, &liveness);

        let topic = TopicDetector::detect(text);
        let mut history = Vec::new();
        self.commit(conversation_id, |conversation| {
            history = conversation.history();
            let conversation = conversation.with_message(user_message);
            Ok(match topic {
                Some(topic) => conversation.with_topic(topic),
                None => conversation,
            })
        })
        .await?;
        tracker.publish(SessionEvent::MessageAppended {
            conversation_id,
            message_id: user_message_id,
            is_user: true,
        });
        tracker.advance(SendPhase::Sending);

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %user_message_id,
            ?mode,
            ?topic,
            "sending message"
        );

        let request = ChatRequest::new(text, history);
        let (assistant_message_id, failure, conversation) = match mode {
            SendMode::Atomic => self.run_atomic(conversation_id, &request, &mut tracker).await?,
            SendMode::Streaming => {
                self.run_streaming(conversation_id, &request, deadline, &mut tracker)
                    .await?
            }
        };

        let final_phase = if failure.is_none() {
            SendPhase::Complete
        } else {
            SendPhase::Error
        };
        tracker.advance(final_phase);

        if let Some(failure) = &failure {
            tracing::warn!(
                conversation_id = %conversation_id,
                message_id = %assistant_message_id,
                error = %failure,
                "send fell back to the fallback reply"
            );
        }

        Ok(SendOutcome {
            conversation_id,
            user_message_id,
            assistant_message_id,
            phase: tracker.phase,
            failure,
            conversation,
        })
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Atomic delivery
    // ════════════════════════════════════════════════════════════════════════════

    async fn run_atomic(
        &self,
        conversation_id: ConversationId,
        request: &ChatRequest,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<(MessageId, Option<SendFailure>, Conversation), DispatchError> {
        let backend = &self.backend;
        let reply = self.retry.retry_fetch(|| backend.send(request)).await;

        let (assistant, failure) = match reply {
            Ok(reply) => {
                let message = Message::assistant(reply.response);
                let message = match reply.sources {
                    Some(sources) => message.with_sources(sources),
                    None => message,
                };
                (message, None)
            }
            Err(err) => (
                Message::assistant(self.fallback_message.clone()),
                Some(SendFailure::Backend(err)),
            ),
        };

        let assistant_id = assistant.id();
        let conversation = self
            .commit(conversation_id, |conversation| Ok(conversation.with_message(assistant)))
            .await?;
        tracker.publish(SessionEvent::MessageAppended {
            conversation_id,
            message_id: assistant_id,
            is_user: false,
        });

        let failure = match failure {
            None if !tracker.is_live() => Some(SendFailure::Cancelled),
            other => other,
        };
        Ok((assistant_id, failure, conversation))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Streaming delivery
    // ════════════════════════════════════════════════════════════════════════════

    async fn run_streaming(
        &self,
        conversation_id: ConversationId,
        request: &ChatRequest,
        deadline: Option<Instant>,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<(MessageId, Option<SendFailure>, Conversation), DispatchError> {
        let placeholder = Message::streaming_placeholder();
        let placeholder_id = placeholder.id();
        let mut conversation = self
            .commit(conversation_id, |conversation| Ok(conversation.with_message(placeholder)))
            .await?;
        tracker.publish(SessionEvent::MessageAppended {
            conversation_id,
            message_id: placeholder_id,
            is_user: false,
        });

        let streamed = self
            .stream_into(
                conversation_id,
                placeholder_id,
                request,
                deadline,
                tracker,
                &mut conversation,
            )
            .await;

        match streamed {
            Ok(failure) => Ok((placeholder_id, failure, conversation)),
            Err(DispatchError::Store(StoreError::NotFound(_))) if !tracker.is_live() => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    "conversation deleted while streaming"
                );
                Ok((placeholder_id, Some(SendFailure::Cancelled), conversation))
            }
            Err(err) => {
                self.seal_after_failure(conversation_id, placeholder_id, &err)
                    .await;
                Err(err)
            }
        }
    }

    /// Opens the stream and feeds it into the placeholder until the decoder
    /// finalizes or the send goes stale. `conversation` tracks the last
    /// committed snapshot.
    async fn stream_into(
        &self,
        conversation_id: ConversationId,
        placeholder_id: MessageId,
        request: &ChatRequest,
        deadline: Option<Instant>,
        tracker: &mut PhaseTracker<'_>,
        conversation: &mut Conversation,
    ) -> Result<Option<SendFailure>, DispatchError> {
        let backend = &self.backend;
        let mut stream = match self.retry.retry_fetch(|| backend.open_stream(request)).await {
            Ok(stream) => stream,
            Err(err) => {
                let mut decoder = StreamDecoder::new(self.fallback_message.clone());
                let events = decoder.fail(err.to_string());
                *conversation = self
                    .apply(conversation_id, placeholder_id, &events, tracker)
                    .await?;
                return Ok(Some(SendFailure::Backend(err)));
            }
        };
        tracker.advance(SendPhase::Streaming);

        let mut decoder = StreamDecoder::new(self.fallback_message.clone());
        let mut failure = None;

        loop {
            if !tracker.is_live() {
                break;
            }
            let next = async {
                match deadline {
                    Some(at) => timeout_at(at, stream.next()).await.ok(),
                    None => Some(stream.next().await),
                }
            };
            let read = tokio::select! {
                biased;
                _ = tracker.liveness.stale() => break,
                read = next => read,
            };
            let Some(read) = read else {
                let err = BackendError::Timeout {
                    timeout_ms: self
                        .retry
                        .policy()
                        .deadline
                        .map_or(0, |d| d.as_millis() as u64),
                };
                let events = decoder.fail(err.to_string());
                failure = Some(SendFailure::Backend(err));
                *conversation = self
                    .apply(conversation_id, placeholder_id, &events, tracker)
                    .await?;
                break;
            };
            if !tracker.is_live() {
                break;
            }

            let events = match read {
                Some(Ok(bytes)) => decoder.feed(&bytes),
                Some(Err(err)) => {
                    let events = decoder.fail(err.to_string());
                    failure = Some(SendFailure::Backend(err));
                    events
                }
                None => decoder.finish(),
            };
            if !events.is_empty() {
                *conversation = self
                    .apply(conversation_id, placeholder_id, &events, tracker)
                    .await?;
            }
            if failure.is_none() {
                failure = events.iter().find_map(|event| match event {
                    DecoderEvent::FinalizedWithError { reason, .. } => {
                        Some(SendFailure::Stream(reason.clone()))
                    }
                    _ => None,
                });
            }
            if decoder.is_terminal() {
                break;
            }
        }
        drop(stream);

        if !decoder.is_terminal() {
            tracing::info!(
                conversation_id = %conversation_id,
                message_id = %placeholder_id,
                "stream abandoned, sealing placeholder"
            );
            *conversation = self
                .seal_abandoned(conversation_id, placeholder_id, conversation.clone())
                .await?;
            failure = Some(SendFailure::Cancelled);
        } else if decoder.skipped_records() > 0 {
            tracing::debug!(
                message_id = %placeholder_id,
                skipped = decoder.skipped_records(),
                "stream finished with skipped records"
            );
        }

        Ok(failure)
    }

    /// Applies decoder events to the placeholder in one commit, then
    /// publishes them.
    async fn apply(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        events: &[DecoderEvent],
        tracker: &PhaseTracker<'_>,
    ) -> Result<Conversation, DispatchError> {
        let conversation = self
            .commit(conversation_id, |conversation| {
                conversation.with_edited_message(message_id, |message| {
                    events
                        .iter()
                        .try_fold(message.clone(), |message, event| event.apply_to(&message))
                })
            })
            .await?;

        for event in events {
            tracker.publish(match event {
                DecoderEvent::TextAppended(fragment) => SessionEvent::TextAppended {
                    conversation_id,
                    message_id,
                    fragment: fragment.clone(),
                },
                DecoderEvent::SourcesAttached(sources) => SessionEvent::SourcesAttached {
                    conversation_id,
                    message_id,
                    count: sources.len(),
                },
                DecoderEvent::Finalized => SessionEvent::MessageFinalized {
                    conversation_id,
                    message_id,
                    with_error: false,
                },
                DecoderEvent::FinalizedWithError { .. } => SessionEvent::MessageFinalized {
                    conversation_id,
                    message_id,
                    with_error: true,
                },
            });
        }
        Ok(conversation)
    }

    /// Seals a placeholder whose stream was dropped. A conversation deleted in
    /// the meantime is left alone.
    async fn seal_abandoned(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        last_seen: Conversation,
    ) -> Result<Conversation, DispatchError> {
        let fallback = self.fallback_message.clone();
        let sealed = self
            .commit(conversation_id, |conversation| {
                conversation.with_edited_message(message_id, |message| {
                    Ok(message.finalized(Some(fallback.as_str())))
                })
            })
            .await;
        match sealed {
            Ok(conversation) => Ok(conversation),
            Err(DispatchError::Store(StoreError::NotFound(_))) => {
                tracing::debug!(conversation_id = %conversation_id, "conversation gone before seal");
                Ok(last_seen)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort seal of a placeholder after a storage failure, so no
    /// record stays `isStreaming` forever. The original error still wins.
    async fn seal_after_failure(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        cause: &DispatchError,
    ) {
        let fallback = self.fallback_message.as_str();
        let sealed = self
            .commit(conversation_id, |conversation| {
                conversation.with_edited_message(message_id, |message| {
                    Ok(message.finalized(Some(fallback)))
                })
            })
            .await;
        match sealed {
            Ok(_) => tracing::warn!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                error = %cause,
                "placeholder sealed after storage failure"
            ),
            Err(e) => tracing::error!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                error = %e,
                cause = %cause,
                "could not seal placeholder after storage failure"
            ),
        }
    }

    /// Serialized read-modify-write of one conversation.
    async fn commit<F>(&self, id: ConversationId, edit: F) -> Result<Conversation, DispatchError>
    where
        F: FnOnce(Conversation) -> Result<Conversation, ConversationError>,
    {
        let _guard = self.commit_lock.lock().await;
        let current = self.store.get(id).await?;
        let next = edit(current)?;
        Ok(self.store.save(next).await?)
    }
}

/// Walks the send phase machine and gates event publication on liveness.
struct PhaseTracker<'a> {
    phase: SendPhase,
    conversation_id: ConversationId,
    events: &'a broadcast::Sender<SessionEvent>,
    liveness: &'a LivenessToken,
}

impl<'a> PhaseTracker<'a> {
    fn new(
        conversation_id: ConversationId,
        events: &'a broadcast::Sender<SessionEvent>,
        liveness: &'a LivenessToken,
    ) -> Self {
        Self {
            phase: SendPhase::Idle,
            conversation_id,
            events,
            liveness,
        }
    }

    fn is_live(&self) -> bool {
        self.liveness.is_live()
    }

    fn advance(&mut self, next: SendPhase) {
        match self.phase.transition_to(next) {
            Ok(phase) => {
                self.phase = phase;
                self.publish(SessionEvent::PhaseChanged {
                    conversation_id: self.conversation_id,
                    phase,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "invalid send phase transition");
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        if self.is_live() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}
