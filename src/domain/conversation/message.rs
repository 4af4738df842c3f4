//! Message entity for conversations.
//!
//! A message is a value: every change (a streamed fragment, attached
//! sources, finalization) produces a new `Message` rather than editing one
//! that somebody else may still be holding.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{MessageId, Timestamp, ValidationError};

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Ordinary dialogue text.
    #[default]
    Message,
    /// Follow-up prompt suggestions, one per line. Never sent as history.
    Suggestions,
}

/// A retrieved passage the assistant based its answer on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub content: String,
    pub category: String,
    pub score: f64,
}

impl Source {
    pub fn new(content: impl Into<String>, category: impl Into<String>, score: f64) -> Self {
        Self {
            content: content.into(),
            category: category.into(),
            score,
        }
    }
}

/// A single entry in a conversation transcript.
///
/// # Invariants
///
/// - `id` is globally unique
/// - while `is_streaming` is true, `streaming_complete` is false
/// - once `streaming_complete` is true the text never changes again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    text: String,
    is_user: bool,
    timestamp: Timestamp,
    #[serde(default)]
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    streaming_complete: Option<bool>,
}

impl Message {
    fn base(text: String, is_user: bool, kind: MessageKind) -> Self {
        Self {
            id: MessageId::new(),
            text,
            is_user,
            timestamp: Timestamp::now(),
            kind,
            sources: None,
            is_streaming: None,
            streaming_complete: None,
        }
    }

    /// Creates a user message.
    ///
    /// # Errors
    ///
    /// - `EmptyField` if the text is blank
    pub fn user(text: impl Into<String>) -> Result<Self, ValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::empty_field("text"));
        }
        Ok(Self::base(text, true, MessageKind::Message))
    }

    /// Creates a complete assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::base(text.into(), false, MessageKind::Message)
    }

    /// Creates an assistant message listing follow-up suggestions.
    pub fn suggestions<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = items
            .into_iter()
            .map(Into::into)
            .collect::<Vec<String>>()
            .join("\n");
        Self::base(text, false, MessageKind::Suggestions)
    }

    /// Creates an empty assistant placeholder that will receive streamed text.
    pub fn streaming_placeholder() -> Self {
        Self {
            is_streaming: Some(true),
            streaming_complete: Some(false),
            ..Self::base(String::new(), false, MessageKind::Message)
        }
    }

    /// Attaches sources, returning the new message.
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_user(&self) -> bool {
        self.is_user
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sources(&self) -> Option<&[Source]> {
        self.sources.as_deref()
    }

    /// True while fragments are still arriving.
    pub fn is_streaming(&self) -> bool {
        self.is_streaming == Some(true)
    }

    /// True once a streamed message has been sealed.
    pub fn is_streaming_complete(&self) -> bool {
        self.streaming_complete == Some(true)
    }

    /// True for messages that were delivered through the streaming transport.
    pub fn was_streamed(&self) -> bool {
        self.is_streaming.is_some()
    }

    /// Label used by exporters.
    pub fn sender_label(&self) -> &'static str {
        match (self.is_user, self.kind) {
            (true, _) => "User",
            (false, MessageKind::Suggestions) => "Suggestions",
            (false, MessageKind::Message) => "Assistant",
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Streaming transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns a copy with `fragment` appended.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the message is not currently streaming
    pub fn with_appended_text(&self, fragment: &str) -> Result<Self, ValidationError> {
        if !self.is_streaming() {
            return Err(ValidationError::invalid_transition("Finalized", "AppendText"));
        }
        let mut next = self.clone();
        next.text.push_str(fragment);
        Ok(next)
    }

    /// Returns a copy with its sources replaced, if still streaming.
    pub fn with_streamed_sources(&self, sources: Vec<Source>) -> Result<Self, ValidationError> {
        if !self.is_streaming() {
            return Err(ValidationError::invalid_transition("Finalized", "AttachSources"));
        }
        Ok(self.clone().with_sources(sources))
    }

    /// Returns a sealed copy. Sealing an already sealed message is a no-op.
    ///
    /// When `fallback` is given and no text has arrived, the fallback becomes
    /// the message text.
    pub fn finalized(&self, fallback: Option<&str>) -> Self {
        if !self.is_streaming() {
            return self.clone();
        }
        let mut next = self.clone();
        if next.text.is_empty() {
            if let Some(fallback) = fallback {
                next.text = fallback.to_string();
            }
        }
        next.is_streaming = Some(false);
        next.streaming_complete = Some(true);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_rejects_blank_text() {
        assert!(Message::user("   ").is_err());
        assert!(Message::user("").is_err());
    }

    #[test]
    fn user_message_has_no_streaming_flags() {
        let msg = Message::user("Hi").unwrap();
        assert!(msg.is_user());
        assert!(!msg.is_streaming());
        assert!(!msg.was_streamed());
        assert_eq!(msg.kind(), MessageKind::Message);
    }

    #[test]
    fn placeholder_starts_streaming_and_incomplete() {
        let msg = Message::streaming_placeholder();
        assert!(msg.is_streaming());
        assert!(!msg.is_streaming_complete());
        assert_eq!(msg.text(), "");
        assert!(!msg.is_user());
    }

    #[test]
    fn appending_leaves_original_untouched() {
        let original = Message::streaming_placeholder();
        let next = original.with_appended_text("Hel").unwrap();
        let next = next.with_appended_text("lo").unwrap();

        assert_eq!(original.text(), "");
        assert_eq!(next.text(), "Hello");
        assert_eq!(next.id(), original.id());
    }

    #[test]
    fn finalized_message_rejects_further_text() {
        let msg = Message::streaming_placeholder()
            .with_appended_text("done")
            .unwrap()
            .finalized(None);

        assert!(!msg.is_streaming());
        assert!(msg.is_streaming_complete());
        assert!(msg.with_appended_text("more").is_err());
        assert!(msg.with_streamed_sources(vec![]).is_err());
    }

    #[test]
    fn finalizing_twice_is_a_no_op() {
        let once = Message::streaming_placeholder()
            .with_appended_text("ABC")
            .unwrap()
            .finalized(None);
        let twice = once.finalized(Some("fallback"));
        assert_eq!(once, twice);
    }

    #[test]
    fn fallback_only_fills_empty_text() {
        let empty = Message::streaming_placeholder().finalized(Some("sorry"));
        assert_eq!(empty.text(), "sorry");

        let partial = Message::streaming_placeholder()
            .with_appended_text("partial")
            .unwrap()
            .finalized(Some("sorry"));
        assert_eq!(partial.text(), "partial");
    }

    #[test]
    fn suggestions_join_lines() {
        let msg = Message::suggestions(["What stack?", "Any side projects?"]);
        assert_eq!(msg.kind(), MessageKind::Suggestions);
        assert_eq!(msg.text(), "What stack?\nAny side projects?");
        assert_eq!(msg.sender_label(), "Suggestions");
    }

    #[test]
    fn serializes_with_camel_case_and_omits_absent_fields() {
        let msg = Message::assistant("Hello!");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["isUser"], false);
        assert_eq!(json["kind"], "message");
        assert!(json.get("sources").is_none());
        assert!(json.get("isStreaming").is_none());
    }

    #[test]
    fn streamed_message_roundtrips_through_json() {
        let msg = Message::streaming_placeholder()
            .with_appended_text("x")
            .unwrap()
            .with_streamed_sources(vec![Source::new("cv", "experience", 0.9)])
            .unwrap()
            .finalized(None);

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
