//! Mock Chat Backend for testing.
//!
//! Replies are scripted in a queue and consumed one per call, whichever
//! delivery mode the call uses. An atomic reply scripted for a streaming call
//! is streamed as one chunk followed by `done`.
//!
//! # Example
//!
//! ```ignore
//! let backend = MockChatBackend::new()
//!     .with_error(BackendError::from_status(503, "busy"))
//!     .with_reply("Hello!");
//!
//! let reply = backend.send(&request).await?;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::domain::stream::StreamEvent;
use crate::ports::{BackendError, ByteStream, ChatBackend, ChatReply, ChatRequest};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A complete atomic reply.
    Reply(ChatReply),
    /// A failure raised when the call is made.
    Error(BackendError),
    /// Raw transport reads. With `hang`, the stream never ends after them.
    Stream {
        reads: Vec<Result<Bytes, BackendError>>,
        hang: bool,
    },
}

/// Scriptable [`ChatBackend`] that records every request it receives.
#[derive(Debug, Clone, Default)]
pub struct MockChatBackend {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<Mutex<Vec<ChatRequest>>>,
    /// Latency before answering a call.
    delay: Duration,
    /// Pause before each streamed read.
    read_delay: Duration,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues any scripted answer.
    pub fn with(self, reply: MockReply) -> Self {
        locked(&self.replies).push_back(reply);
        self
    }

    pub fn with_reply(self, response: impl Into<String>) -> Self {
        self.with(MockReply::Reply(ChatReply::new(response)))
    }

    pub fn with_chat_reply(self, reply: ChatReply) -> Self {
        self.with(MockReply::Reply(reply))
    }

    pub fn with_error(self, error: BackendError) -> Self {
        self.with(MockReply::Error(error))
    }

    /// Queues a stream carrying one transport read per event.
    pub fn with_stream(self, events: Vec<StreamEvent>) -> Self {
        self.with(MockReply::Stream {
            reads: events_to_reads(&events),
            hang: false,
        })
    }

    /// Queues a stream of raw reads, split however the test likes.
    pub fn with_raw_stream(self, reads: Vec<&'static str>) -> Self {
        self.with(MockReply::Stream {
            reads: reads.into_iter().map(|r| Ok(Bytes::from_static(r.as_bytes()))).collect(),
            hang: false,
        })
    }

    /// Queues a stream that delivers `events` and then fails at the transport.
    pub fn with_broken_stream(self, events: Vec<StreamEvent>, error: BackendError) -> Self {
        let mut reads = events_to_reads(&events);
        reads.push(Err(error));
        self.with(MockReply::Stream { reads, hang: false })
    }

    /// Queues a stream that delivers `events` and then stays open forever.
    pub fn with_hanging_stream(self, events: Vec<StreamEvent>) -> Self {
        self.with(MockReply::Stream {
            reads: events_to_reads(&events),
            hang: true,
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        locked(&self.calls).len()
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        locked(&self.calls).clone()
    }

    /// Scripted answers not yet consumed.
    pub fn remaining(&self) -> usize {
        locked(&self.replies).len()
    }

    async fn next(&self, request: &ChatRequest) -> MockReply {
        locked(&self.calls).push(request.clone());
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        locked(&self.replies)
            .pop_front()
            .unwrap_or_else(|| MockReply::Reply(ChatReply::new("Mock response")))
    }
}

fn events_to_reads(events: &[StreamEvent]) -> Vec<Result<Bytes, BackendError>> {
    events.iter().map(|e| Ok(Bytes::from(e.to_line()))).collect()
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply, BackendError> {
        match self.next(request).await {
            MockReply::Reply(reply) => Ok(reply),
            MockReply::Error(err) => Err(err),
            MockReply::Stream { .. } => Err(BackendError::parse(
                "expected a JSON reply, got an event stream",
            )),
        }
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError> {
        let (reads, hang) = match self.next(request).await {
            MockReply::Error(err) => return Err(err),
            MockReply::Stream { reads, hang } => (reads, hang),
            MockReply::Reply(reply) => {
                let mut events = vec![StreamEvent::chunk(reply.response)];
                if let Some(sources) = reply.sources {
                    events.push(StreamEvent::Sources { sources });
                }
                events.push(StreamEvent::Done);
                (events_to_reads(&events), false)
            }
        };

        let read_delay = self.read_delay;
        let reads = stream::iter(reads).then(move |read| async move {
            if !read_delay.is_zero() {
                sleep(read_delay).await;
            }
            read
        });

        if hang {
            Ok(Box::pin(reads.chain(stream::pending())))
        } else {
            Ok(Box::pin(reads))
        }
    }
}
