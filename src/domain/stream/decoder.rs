//! Incremental decoder for the chunked reply stream.
//!
//! Bytes go in through [`StreamDecoder::feed`] in whatever pieces the
//! transport delivers; discrete [`DecoderEvent`]s come out. The decoder
//! never touches a stored message itself. Callers apply each event to the
//! message they own with [`DecoderEvent::apply_to`].
//!
//! # States
//!
//! ```text
//! AwaitingEvent --chunk/sources--> AwaitingEvent
//! AwaitingEvent --done-----------> Finalized
//! AwaitingEvent --error/close----> FinalizedWithError
//! ```

use serde::{Deserialize, Serialize};

use super::StreamEvent;
use crate::domain::conversation::{Message, Source};
use crate::domain::foundation::{StateMachine, ValidationError};

/// Sentinel some backends send instead of a `done` record.
const DONE_SENTINEL: &str = "[DONE]";

/// Longest record kept while waiting for its newline. Anything longer is
/// dropped as malformed.
const MAX_LINE_BYTES: usize = 256 * 1024;

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    #[default]
    AwaitingEvent,
    Finalized,
    FinalizedWithError,
}

impl StateMachine for DecoderState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use DecoderState::*;
        matches!(
            (self, target),
            (AwaitingEvent, AwaitingEvent) | (AwaitingEvent, Finalized) | (AwaitingEvent, FinalizedWithError)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use DecoderState::*;
        match self {
            AwaitingEvent => vec![AwaitingEvent, Finalized, FinalizedWithError],
            Finalized | FinalizedWithError => vec![],
        }
    }
}

/// A state change the consumer should apply to its in-progress message.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    TextAppended(String),
    SourcesAttached(Vec<Source>),
    Finalized,
    FinalizedWithError {
        reason: String,
        /// Set when no content arrived and the fallback text replaces it.
        fallback: Option<String>,
    },
}

impl DecoderEvent {
    /// Produces the next snapshot of `message`.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` when text or sources target a sealed message
    pub fn apply_to(&self, message: &Message) -> Result<Message, ValidationError> {
        match self {
            DecoderEvent::TextAppended(fragment) => message.with_appended_text(fragment),
            DecoderEvent::SourcesAttached(sources) => message.with_streamed_sources(sources.clone()),
            DecoderEvent::Finalized => Ok(message.finalized(None)),
            DecoderEvent::FinalizedWithError { fallback, .. } => {
                Ok(message.finalized(fallback.as_deref()))
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DecoderEvent::Finalized | DecoderEvent::FinalizedWithError { .. }
        )
    }
}

/// Line-buffering state machine over `data: <json>` records.
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    state: DecoderState,
    pending: Vec<u8>,
    text: String,
    sources: Option<Vec<Source>>,
    fallback_text: String,
    skipped_records: usize,
    /// Dropping the rest of an over-long record up to its newline.
    discarding: bool,
}

impl StreamDecoder {
    /// Creates a decoder that substitutes `fallback_text` when a stream
    /// fails before any content arrived.
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self {
            state: DecoderState::AwaitingEvent,
            pending: Vec::new(),
            text: String::new(),
            sources: None,
            fallback_text: fallback_text.into(),
            skipped_records: 0,
            discarding: false,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Text assembled so far (or the fallback, after an empty failure).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sources(&self) -> Option<&[Source]> {
        self.sources.as_deref()
    }

    /// Number of malformed records dropped.
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Consumes one transport read. Bytes after a terminal record are ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecoderEvent> {
        let mut events = Vec::new();
        if self.is_terminal() {
            return events;
        }
        self.pending.extend_from_slice(bytes);

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            self.process_line(&line[..line.len() - 1], &mut events);
            if self.is_terminal() {
                self.pending.clear();
                return events;
            }
        }

        if self.discarding {
            self.pending.clear();
        } else if self.pending.len() > MAX_LINE_BYTES {
            self.pending.clear();
            self.discarding = true;
            self.skip_record(&format!("record longer than {} bytes", MAX_LINE_BYTES));
        }
        events
    }

    /// Signals a clean end of the transport.
    ///
    /// A trailing record without newline is still decoded. Closing before a
    /// `done` record is an unreadable close.
    pub fn finish(&mut self) -> Vec<DecoderEvent> {
        let mut events = Vec::new();
        if self.is_terminal() {
            return events;
        }
        if !self.pending.is_empty() && !self.discarding {
            let line = std::mem::take(&mut self.pending);
            self.process_line(&line, &mut events);
        }
        if !self.is_terminal() {
            events.push(self.fail_with("stream closed before completion"));
        }
        events
    }

    /// Signals an unrecoverable transport error.
    pub fn fail(&mut self, reason: impl Into<String>) -> Vec<DecoderEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        vec![self.fail_with(reason)]
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<DecoderEvent>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim_end_matches('\r').trim(),
            Err(e) => {
                self.skip_record(&format!("invalid utf-8: {}", e));
                return;
            }
        };
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            // Other SSE fields (event:, id:, retry:) carry nothing we use.
            return;
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            self.on_event(StreamEvent::Done, events);
            return;
        }
        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => self.on_event(event, events),
            Err(e) => self.skip_record(&e.to_string()),
        }
    }

    fn on_event(&mut self, event: StreamEvent, events: &mut Vec<DecoderEvent>) {
        match event {
            StreamEvent::Chunk { content } => {
                if !content.is_empty() {
                    self.text.push_str(&content);
                    events.push(DecoderEvent::TextAppended(content));
                }
            }
            StreamEvent::Sources { sources } => {
                self.sources = Some(sources.clone());
                events.push(DecoderEvent::SourcesAttached(sources));
            }
            StreamEvent::Done => {
                if self.advance(DecoderState::Finalized) {
                    events.push(DecoderEvent::Finalized);
                }
            }
            StreamEvent::Error { message } => {
                let reason = message.unwrap_or_else(|| "backend reported a stream error".to_string());
                events.push(self.fail_with(reason));
            }
        }
    }

    /// Moves to `next` if the lifecycle allows it.
    fn advance(&mut self, next: DecoderState) -> bool {
        match self.state.transition_to(next) {
            Ok(state) => {
                self.state = state;
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "invalid decoder transition");
                false
            }
        }
    }

    /// Callers only reach this from a non-terminal state.
    fn fail_with(&mut self, reason: impl Into<String>) -> DecoderEvent {
        self.advance(DecoderState::FinalizedWithError);
        self.pending.clear();
        let fallback = if self.text.is_empty() {
            self.text = self.fallback_text.clone();
            Some(self.fallback_text.clone())
        } else {
            None
        };
        DecoderEvent::FinalizedWithError {
            reason: reason.into(),
            fallback,
        }
    }

    fn skip_record(&mut self, reason: &str) {
        self.skipped_records += 1;
        tracing::warn!(reason, skipped = self.skipped_records, "Skipping malformed stream record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FALLBACK: &str = "fallback";

    fn wire(events: &[StreamEvent]) -> String {
        events.iter().map(StreamEvent::to_line).collect()
    }

    fn apply_all(events: &[DecoderEvent], message: Message) -> Message {
        events
            .iter()
            .fold(message, |m, e| e.apply_to(&m).unwrap_or(m))
    }

    #[test]
    fn chunks_then_done_assemble_text() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let bytes = wire(&[
            StreamEvent::chunk("A"),
            StreamEvent::chunk("B"),
            StreamEvent::chunk("C"),
            StreamEvent::Done,
        ]);
        let events = decoder.feed(bytes.as_bytes());

        assert_eq!(decoder.text(), "ABC");
        assert_eq!(decoder.state(), DecoderState::Finalized);

        let message = apply_all(&events, Message::streaming_placeholder());
        assert_eq!(message.text(), "ABC");
        assert!(!message.is_streaming());
        assert!(message.is_streaming_complete());
    }

    #[test]
    fn record_split_across_reads_is_buffered() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let bytes = wire(&[StreamEvent::chunk("Hello"), StreamEvent::Done]);
        let (a, b) = bytes.as_bytes().split_at(9);

        assert!(decoder.feed(a).is_empty());
        let events = decoder.feed(b);
        assert_eq!(events[0], DecoderEvent::TextAppended("Hello".into()));
        assert_eq!(events[1], DecoderEvent::Finalized);
    }

    #[test]
    fn sources_attach_without_changing_state() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let sources = vec![Source::new("Led the platform team", "experience", 0.91)];
        let events = decoder.feed(wire(&[StreamEvent::Sources { sources: sources.clone() }]).as_bytes());

        assert_eq!(events, vec![DecoderEvent::SourcesAttached(sources.clone())]);
        assert_eq!(decoder.state(), DecoderState::AwaitingEvent);
        assert_eq!(decoder.sources(), Some(sources.as_slice()));
    }

    #[test]
    fn done_after_finalization_is_a_no_op() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let events = decoder.feed(wire(&[StreamEvent::chunk("x"), StreamEvent::Done]).as_bytes());
        let finalized = apply_all(&events, Message::streaming_placeholder());

        let later = decoder.feed(wire(&[StreamEvent::Done, StreamEvent::chunk("y")]).as_bytes());
        assert!(later.is_empty());
        assert_eq!(decoder.text(), "x");

        let again = DecoderEvent::Finalized.apply_to(&finalized).unwrap();
        assert_eq!(again, finalized);
    }

    #[test]
    fn malformed_record_is_skipped() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let mut bytes = StreamEvent::chunk("A").to_line();
        bytes.push_str("data: {not json}\n");
        bytes.push_str("data: {\"type\":\"mystery\"}\n");
        bytes.push_str(&wire(&[StreamEvent::chunk("B"), StreamEvent::Done]));

        decoder.feed(bytes.as_bytes());
        assert_eq!(decoder.text(), "AB");
        assert_eq!(decoder.skipped_records(), 2);
        assert_eq!(decoder.state(), DecoderState::Finalized);
    }

    #[test]
    fn tolerates_crlf_comments_and_other_fields() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let bytes = ": keep-alive\r\nevent: message\r\ndata: {\"type\":\"chunk\",\"content\":\"ok\"}\r\n\r\ndata: [DONE]\r\n";
        decoder.feed(bytes.as_bytes());
        assert_eq!(decoder.text(), "ok");
        assert_eq!(decoder.state(), DecoderState::Finalized);
        assert_eq!(decoder.skipped_records(), 0);
    }

    #[test]
    fn error_before_content_substitutes_fallback() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let events = decoder.feed(wire(&[StreamEvent::error("model overloaded")]).as_bytes());

        assert_eq!(decoder.state(), DecoderState::FinalizedWithError);
        assert_eq!(decoder.text(), FALLBACK);
        let message = apply_all(&events, Message::streaming_placeholder());
        assert_eq!(message.text(), FALLBACK);
        assert!(message.is_streaming_complete());
    }

    #[test]
    fn error_after_content_keeps_partial_text() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let events = decoder.feed(wire(&[StreamEvent::chunk("Part"), StreamEvent::error("cut")]).as_bytes());
        let message = apply_all(&events, Message::streaming_placeholder());
        assert_eq!(message.text(), "Part");
        assert_eq!(decoder.state(), DecoderState::FinalizedWithError);
    }

    #[test]
    fn close_before_done_is_an_error() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        decoder.feed(StreamEvent::chunk("half").to_line().as_bytes());
        let events = decoder.finish();

        assert!(matches!(events.as_slice(), [DecoderEvent::FinalizedWithError { fallback: None, .. }]));
        assert_eq!(decoder.text(), "half");
    }

    #[test]
    fn finish_decodes_unterminated_last_record() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        decoder.feed(b"data: {\"type\":\"chunk\",\"content\":\"z\"}\ndata: {\"type\":\"done\"}");
        let events = decoder.finish();
        assert_eq!(events, vec![DecoderEvent::Finalized]);
        assert_eq!(decoder.text(), "z");
    }

    #[test]
    fn transport_failure_finalizes_once() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        assert_eq!(decoder.fail("connection reset").len(), 1);
        assert!(decoder.fail("again").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn multibyte_text_split_mid_character() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let bytes = wire(&[StreamEvent::chunk("héllo wörld"), StreamEvent::Done]);
        for byte in bytes.as_bytes() {
            decoder.feed(std::slice::from_ref(byte));
        }
        assert_eq!(decoder.text(), "héllo wörld");
    }

    #[test]
    fn overlong_record_is_dropped_without_buffering_it() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let half = "a".repeat(MAX_LINE_BYTES / 2 + 8);

        decoder.feed(format!("data: {half}").as_bytes());
        decoder.feed(half.as_bytes());
        assert!(decoder.pending.is_empty());
        assert_eq!(decoder.skipped_records(), 1);

        decoder.feed(half.as_bytes());
        assert!(decoder.pending.is_empty());

        let rest = format!("aaa\n{}", wire(&[StreamEvent::chunk("ok"), StreamEvent::Done]));
        let events = decoder.feed(rest.as_bytes());

        assert_eq!(decoder.skipped_records(), 1);
        assert_eq!(decoder.text(), "ok");
        assert_eq!(events.last(), Some(&DecoderEvent::Finalized));
    }

    #[test]
    fn done_after_error_emits_nothing() {
        let mut decoder = StreamDecoder::new(FALLBACK);
        let events = decoder.feed(wire(&[StreamEvent::error("cut"), StreamEvent::Done]).as_bytes());

        assert_eq!(events.len(), 1);
        assert_eq!(decoder.state(), DecoderState::FinalizedWithError);
    }

    #[test]
    fn decoder_state_machine_is_terminal_after_finalization() {
        assert!(DecoderState::Finalized.is_terminal());
        assert!(DecoderState::FinalizedWithError.is_terminal());
        assert!(DecoderState::Finalized
            .transition_to(DecoderState::AwaitingEvent)
            .is_err());
    }

    proptest! {
        #[test]
        fn any_split_yields_concatenation(
            pieces in proptest::collection::vec("[a-zA-Z0-9 ,.\"\\\\é]{0,12}", 0..8),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let mut events: Vec<StreamEvent> = pieces.iter().map(StreamEvent::chunk).collect();
            events.push(StreamEvent::Done);
            let bytes = wire(&events).into_bytes();

            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            offsets.push(0);
            offsets.push(bytes.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut decoder = StreamDecoder::new(FALLBACK);
            let mut message = Message::streaming_placeholder();
            for window in offsets.windows(2) {
                for event in decoder.feed(&bytes[window[0]..window[1]]) {
                    message = event.apply_to(&message).unwrap();
                }
            }

            let expected: String = pieces.concat();
            prop_assert_eq!(decoder.text(), expected.as_str());
            prop_assert_eq!(message.text(), expected.as_str());
            prop_assert!(message.is_streaming_complete());
        }
    }
}
