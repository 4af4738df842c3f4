//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `ChatBackend` - the AI backend call contract (atomic or streamed reply)
//! - `ConversationStore` - persistence for conversation transcripts

mod chat_backend;
mod conversation_store;

pub use chat_backend::{BackendError, ByteStream, ChatBackend, ChatReply, ChatRequest};
pub use conversation_store::{stamp_for_save, ConversationStore, StoreError};
