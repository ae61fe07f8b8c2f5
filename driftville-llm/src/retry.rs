//! Retry policies for generation calls.
//!
//! [`RetryPolicy`] fits stage and dialogue prompts: one pause after a
//! transient failure, then one more try. [`BackoffRetry`] fits scoring
//! prompts, which tolerate a few exponentially spaced attempts. Both
//! report exhaustion as `None`; callers treat that as "no output".

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::LlmError;

/// Single retry after a fixed pause, only for transient errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    backoff: Duration,
}

impl RetryPolicy {
    /// A policy sleeping `backoff` before its one retry.
    #[must_use]
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Run `call`, retrying once if the first failure is transient.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        match call().await {
            Ok(value) => Some(value),
            Err(err) if err.is_transient() => {
                warn!(call = what, error = %err, backoff_secs = self.backoff.as_secs(), "Transient failure, retrying once");
                tokio::time::sleep(self.backoff).await;
                match call().await {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!(call = what, error = %err, "Retry failed");
                        None
                    }
                }
            }
            Err(err) => {
                warn!(call = what, error = %err, "Generation failed");
                None
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Exponential backoff: after attempt `n` fails, sleep `base * 2^n`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffRetry {
    retries: u32,
    base_delay: Duration,
}

impl BackoffRetry {
    /// `retries` extra attempts, the first spaced by `base_delay`.
    #[must_use]
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Run `call` until it succeeds or every attempt has failed.
    pub async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        for attempt in 0..self.attempts() {
            match call().await {
                Ok(value) => return Some(value),
                Err(err) => {
                    if attempt == self.retries {
                        warn!(call = what, error = %err, attempts = self.attempts(), "Giving up");
                        break;
                    }
                    let delay = self.base_delay.saturating_mul(1 << attempt.min(16));
                    warn!(call = what, error = %err, attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Attempt failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        None
    }
}

impl Default for BackoffRetry {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(2))
    }
}
