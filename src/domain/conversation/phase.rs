//! Lifecycle of a single send.
//!
//! ```text
//! Idle -> Sending -> Streaming -> Complete
//!            |           \-----> Error
//!            |---------------->  Complete
//!            \---------------->  Error
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::foundation::StateMachine;

/// Where one `send()` currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPhase {
    /// Nothing in flight.
    #[default]
    Idle,
    /// User message stored, waiting on the backend.
    Sending,
    /// Placeholder stored, fragments arriving.
    Streaming,
    /// Assistant reply stored from a successful exchange.
    Complete,
    /// Assistant reply stored from the fallback path.
    Error,
}

impl SendPhase {
    /// True while the backend exchange is still running.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

impl StateMachine for SendPhase {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SendPhase::*;
        matches!(
            (self, target),
            (Idle, Sending)
                | (Sending, Streaming)
                | (Sending, Complete)
                | (Sending, Error)
                | (Streaming, Complete)
                | (Streaming, Error)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SendPhase::*;
        match self {
            Idle => vec![Sending],
            Sending => vec![Streaming, Complete, Error],
            Streaming => vec![Complete, Error],
            Complete | Error => vec![],
        }
    }
}
