//! Bounded retry of backend calls.
//!
//! Transient failures (network, 5xx, 429, timeouts) are retried with capped
//! exponential backoff. Anything else, or the last failure once the attempt
//! budget is spent, is returned unchanged. An optional overall deadline
//! bounds the whole loop, sleeps included.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::ports::BackendError;

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Randomize each delay within its upper half.
    pub jitter: bool,
    /// Overall bound for one logical call.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
            deadline: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// No retries and no deadline.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            deadline: None,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_for(&self, retry: u32, error: &BackendError) -> Duration {
        if let BackendError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            return Duration::from_secs(*secs).min(self.max_delay);
        }

        let delay = self.backoff(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
    }
}

/// Runs backend calls under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `op` until it succeeds, fails permanently, runs out of attempts
    /// or hits the deadline.
    ///
    /// # Errors
    ///
    /// - the last error from `op`, unchanged
    /// - `BackendError::Timeout` when the deadline expires first
    pub async fn retry_fetch<T, F, Fut>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        match self.policy.deadline {
            Some(deadline) => match timeout(deadline, self.attempts(op)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(deadline_ms = deadline.as_millis() as u64, "send deadline exceeded");
                    Err(BackendError::Timeout {
                        timeout_ms: deadline.as_millis() as u64,
                    })
                }
            },
            None => self.attempts(op).await,
        }
    }

    async fn attempts<T, F, Fut>(&self, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "backend call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() || attempt >= max_attempts => return Err(err),
                Err(err) => {
                    let delay = self.policy.delay_for(attempt, &err);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient backend failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryManager {
        RetryManager::new(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: true,
            deadline: None,
        })
    }

    /// An operation that fails `failures` times with `error`, then succeeds.
    fn flaky(
        failures: u32,
        error: BackendError,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<&'static str, BackendError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures {
                Err(error.clone())
            } else {
                Ok("ok")
            })
        };
        (calls, op)
    }

    #[tokio::test]
    async fn succeeds_after_n_minus_one_transient_failures() {
        let (calls, op) = flaky(2, BackendError::network("reset"));
        assert_eq!(fast(3).retry_fetch(op).await, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_unchanged() {
        let error = BackendError::from_status(503, "busy");
        let (calls, op) = flaky(3, error.clone());
        assert_eq!(fast(3).retry_fetch(op).await, Err(error));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let error = BackendError::from_status(400, "bad");
        let (calls, op) = flaky(5, error.clone());
        assert_eq!(fast(3).retry_fetch(op).await, Err(error));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parse_errors_are_not_retried() {
        let (calls, op) = flaky(5, BackendError::parse("junk"));
        assert!(fast(3).retry_fetch(op).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limiting_is_retried() {
        let (_, op) = flaky(
            1,
            BackendError::RateLimited {
                retry_after_secs: None,
            },
        );
        assert_eq!(fast(2).retry_fetch(op).await, Ok("ok"));
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let (calls, op) = flaky(0, BackendError::network("x"));
        assert_eq!(fast(0).retry_fetch(op).await, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let manager = RetryManager::new(RetryPolicy {
            deadline: Some(Duration::from_millis(20)),
            ..RetryPolicy::none()
        });
        let result: Result<(), _> = manager
            .retry_fetch(|| async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(BackendError::Timeout { timeout_ms: 20 }));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn jittered_delay_stays_within_upper_half() {
        let policy = RetryPolicy::default();
        let error = BackendError::network("x");
        for _ in 0..50 {
            let delay = policy.delay_for(2, &error);
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn retry_after_header_is_honoured_up_to_cap() {
        let policy = RetryPolicy::default();
        let error = BackendError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert_eq!(policy.delay_for(1, &error), policy.max_delay);
    }
}
