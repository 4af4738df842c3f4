//! Adapters - Implementations of port interfaces.
//!
//! - `backend` - ChatBackend over HTTP, plus a scriptable mock
//! - `storage` - ConversationStore on disk and in memory

pub mod backend;
pub mod storage;
