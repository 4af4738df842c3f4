//! Colloquy - conversational session engine
//!
//! Sends user messages to a chat backend, decodes streamed replies into
//! assistant messages, retries transient failures and keeps every
//! conversation as a durable, exportable transcript.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
