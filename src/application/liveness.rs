//! Generation-based liveness for in-flight sends.
//!
//! A session owns one [`Liveness`]. Every send captures a [`LivenessToken`];
//! abandoning the session or switching conversation bumps the generation,
//! which turns every outstanding token stale and wakes anyone waiting on it.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Liveness {
    generation: Arc<watch::Sender<u64>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            generation: Arc::new(generation),
        }
    }

    /// Captures the current generation.
    pub fn token(&self) -> LivenessToken {
        let receiver = self.generation.subscribe();
        let captured = *receiver.borrow();
        LivenessToken { receiver, captured }
    }

    /// Makes every token issued so far stale.
    pub fn invalidate(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

/// Snapshot of a [`Liveness`] generation taken when a send started.
#[derive(Debug, Clone)]
pub struct LivenessToken {
    receiver: watch::Receiver<u64>,
    captured: u64,
}

impl LivenessToken {
    /// A token nobody can invalidate.
    pub fn detached() -> Self {
        let (_, receiver) = watch::channel(0);
        Self {
            receiver,
            captured: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        *self.receiver.borrow() == self.captured
    }

    /// Resolves once the token goes stale. Never resolves for a detached
    /// token.
    pub async fn stale(&self) {
        let mut receiver = self.receiver.clone();
        let captured = self.captured;
        let closed = receiver
            .wait_for(|generation| *generation != captured)
            .await
            .is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
