//! The paced, retrying front door to a [`GenerationService`].
//!
//! Every call goes through the shared [`RateLimiter`] and a one-permit
//! gate, so at most one request is in flight and the per-minute budget
//! holds across agents. Failures never escape: callers get `None`.

use std::sync::Arc;
use std::time::Duration;

use driftville_core::config::LlmConfig;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::rate_limit::RateLimiter;
use crate::retry::{BackoffRetry, RetryPolicy};
use crate::types::{GenerationService, LlmRequest, LlmResponse};

/// Sampling applied to every request built by the generator.
#[derive(Debug, Clone, Copy)]
pub struct Sampling {
    /// Token cap.
    pub max_tokens: u32,
    /// Temperature.
    pub temperature: f32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl From<&LlmConfig> for Sampling {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_ms: config.timeout_secs.saturating_mul(1000),
        }
    }
}

/// Rate-limited, serialised generation with retry.
pub struct Generator<G> {
    service: G,
    limiter: Arc<RateLimiter>,
    gate: Semaphore,
    retry: RetryPolicy,
    scoring: BackoffRetry,
    sampling: Sampling,
}

impl<G: GenerationService> Generator<G> {
    /// Assemble a generator from parts.
    #[must_use]
    pub fn new(service: G, limiter: Arc<RateLimiter>, retry: RetryPolicy, scoring: BackoffRetry, sampling: Sampling) -> Self {
        Self {
            service,
            limiter,
            gate: Semaphore::new(1),
            retry,
            scoring,
            sampling,
        }
    }

    /// Build a generator with the pacing and retry settings from `config`.
    #[must_use]
    pub fn from_config(service: G, config: &LlmConfig) -> Self {
        Self::new(
            service,
            Arc::new(RateLimiter::per_minute(config.calls_per_minute)),
            RetryPolicy::new(Duration::from_secs(config.transient_backoff_secs)),
            BackoffRetry::new(config.scoring_retries, Duration::from_secs_f64(config.scoring_base_delay_secs.max(0.0))),
            Sampling::from(config),
        )
    }

    /// The wrapped service.
    #[must_use]
    pub fn service(&self) -> &G {
        &self.service
    }

    fn request(&self, system: &str, user: &str) -> LlmRequest {
        LlmRequest::new(system, user)
            .with_max_tokens(self.sampling.max_tokens)
            .with_temperature(self.sampling.temperature)
            .with_timeout(self.sampling.timeout_ms)
    }

    async fn attempt(&self, request: &LlmRequest) -> Result<LlmResponse, crate::LlmError> {
        self.limiter.acquire().await;
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| crate::LlmError::Unavailable(e.to_string()))?;
        let response = self.service.generate(request).await?;
        debug!(latency_ms = response.latency_ms, tokens = response.tokens_generated, "Generated");
        Ok(response)
    }

    /// Stage, dialogue and summary prompts: one retry after a transient
    /// failure. `None` means the call produced nothing usable.
    #[instrument(skip(self, system, user), fields(chars = user.len()))]
    pub async fn generate(&self, system: &str, user: &str) -> Option<String> {
        let request = self.request(system, user);
        self.retry
            .run("generate", || self.attempt(&request))
            .await
            .map(|r| r.text)
    }

    /// Scoring prompts: exponential backoff across every failure kind.
    #[instrument(skip(self, system, user), fields(chars = user.len()))]
    pub async fn generate_scored(&self, system: &str, user: &str) -> Option<String> {
        let request = self.request(system, user);
        self.scoring
            .run("score", || self.attempt(&request))
            .await
            .map(|r| r.text)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::LlmError;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl GenerationService for Scripted {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.seen.lock().push(request.clone());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".into())))
                .map(LlmResponse::text)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn config_sampling_reaches_the_service() {
        let config = LlmConfig { max_tokens: 77, temperature: 0.2, ..LlmConfig::default() };
        let generator = Generator::from_config(Scripted::new(vec![Ok("hello".into())]), &config);
        assert_eq!(generator.generate("sys", "user").await.as_deref(), Some("hello"));
        let seen = generator.service().seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].max_tokens, 77);
        assert_eq!(seen[0].system, "sys");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_yields_none() {
        let generator = Generator::from_config(
            Scripted::new(vec![Err(LlmError::RateLimited("q".into())), Err(LlmError::RateLimited("q".into()))]),
            &LlmConfig::default(),
        );
        assert!(generator.generate("s", "u").await.is_none());
        assert_eq!(generator.service().seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scored_calls_back_off_through_parse_errors() {
        let generator = Generator::from_config(
            Scripted::new(vec![Err(LlmError::ParseError("x".into())), Ok("7".into())]),
            &LlmConfig::default(),
        );
        let start = Instant::now();
        assert_eq!(generator.generate_scored("s", "u").await.as_deref(), Some("7"));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_spans_the_window() {
        let config = LlmConfig { calls_per_minute: 2, ..LlmConfig::default() };
        let replies = (0..3).map(|i| Ok(i.to_string())).collect();
        let generator = Generator::from_config(Scripted::new(replies), &config);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(generator.generate("s", "u").await.is_some());
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
    }
}
