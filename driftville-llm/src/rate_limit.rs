//! Sliding-window admission control for outbound generation calls.
//!
//! At most `limit` calls are admitted in any rolling `window`. A call that
//! would exceed the budget waits until the oldest admitted call falls out
//! of the window, then tries again.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// The bookkeeping half of the limiter, free of any clock or runtime.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    calls: VecDeque<Instant>,
}

impl SlidingWindow {
    /// A window admitting `limit` calls per `window` (at least one).
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            window,
            calls: VecDeque::with_capacity(limit),
        }
    }

    /// Admit a call at `now`, or report how long to wait before retrying.
    ///
    /// Timestamps at least one `window` old are evicted first, so a call
    /// exactly `window` after the oldest one is admitted.
    ///
    /// # Errors
    /// Returns the remaining wait when the window is full.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        if self.calls.len() < self.limit {
            self.calls.push_back(now);
            return Ok(());
        }
        let oldest = self.calls.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.saturating_duration_since(oldest)))
    }

    /// Calls currently counted against the window.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

/// Process-wide limiter shared by every generation call.
#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<SlidingWindow>,
}

impl RateLimiter {
    /// A limiter admitting `limit` calls per `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            inner: Mutex::new(SlidingWindow::new(limit, window)),
        }
    }

    /// A limiter admitting `calls` per minute.
    #[must_use]
    pub fn per_minute(calls: u32) -> Self {
        Self::new(calls as usize, Duration::from_secs(60))
    }

    /// Wait until the call is admitted.
    pub async fn acquire(&self) {
        loop {
            // The guard must drop before the sleep.
            let verdict = self.inner.lock().try_admit(Instant::now());
            match verdict {
                Ok(()) => return,
                Err(wait) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let wait_ms = wait.as_millis() as u64;
                    debug!(wait_ms, "Rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
