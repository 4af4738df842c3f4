//! Conversation module - transcripts, messages, topics and send lifecycle.

#[allow(clippy::module_inception)]
mod conversation;
mod message;
mod phase;
mod topic;

pub use conversation::{
    derive_title, Conversation, ConversationError, ConversationStats, DEFAULT_TITLE,
};
pub use message::{Message, MessageKind, Source};
pub use phase::SendPhase;
pub use topic::{Topic, TopicDetector};
