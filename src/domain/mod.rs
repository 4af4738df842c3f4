//! Domain layer containing the conversation model and pure services.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (IDs, timestamps, errors, state machines)
//! - `conversation` - Conversations, messages, topics and the send lifecycle
//! - `stream` - Streaming reply records and the incremental decoder
//! - `export` - Multi-format export and JSON import

pub mod conversation;
pub mod export;
pub mod foundation;
pub mod stream;
