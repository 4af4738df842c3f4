//! Streaming reply protocol: wire records and the incremental decoder.

mod decoder;
mod event;

pub use decoder::{DecoderEvent, DecoderState, StreamDecoder};
pub use event::StreamEvent;
