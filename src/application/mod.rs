//! Application layer - send orchestration, retry and session lifecycle.
//!
//! This layer coordinates the domain with the backend and store ports.

mod dispatcher;
mod events;
mod liveness;
mod retry;
mod session;

pub use dispatcher::{
    DispatchError, MessageDispatcher, SendFailure, SendMode, SendOutcome,
    DEFAULT_FALLBACK_MESSAGE,
};
pub use events::SessionEvent;
pub use liveness::{Liveness, LivenessToken};
pub use retry::{RetryManager, RetryPolicy};
pub use session::ChatSession;
