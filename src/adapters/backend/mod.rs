//! Chat Backend Adapters.
//!
//! ## Available Adapters
//!
//! - `HttpChatBackend` - JSON POST endpoint with optional event-stream replies
//! - `MockChatBackend` - Scripted replies for testing

mod http_backend;
mod mock_backend;

pub use http_backend::{HttpBackendConfig, HttpChatBackend};
pub use mock_backend::{MockChatBackend, MockReply};
