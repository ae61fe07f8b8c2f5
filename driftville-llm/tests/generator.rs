//! Generator behaviour seen from outside the crate: one call in flight at a
//! time, pacing and retries composed over any `GenerationService`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use driftville_core::config::LlmConfig;
use driftville_llm::{
    BackoffRetry, GenerationService, Generator, LlmError, LlmRequest, LlmResponse, RateLimiter, RetryPolicy, Sampling,
};

#[derive(Default)]
struct SlowEcho {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl GenerationService for SlowEcho {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(LlmResponse::text(request.user.clone()))
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_are_serialised() {
    let generator = Generator::from_config(SlowEcho::default(), &LlmConfig { calls_per_minute: 100, ..LlmConfig::default() });
    let started = tokio::time::Instant::now();
    let (a, b, c) = tokio::join!(
        generator.generate("", "one"),
        generator.generate("", "two"),
        generator.generate("", "three"),
    );
    assert_eq!((a.as_deref(), b.as_deref(), c.as_deref()), (Some("one"), Some("two"), Some("three")));
    assert_eq!(generator.service().peak.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn shared_limiter_paces_across_generators() {
    let limiter = Arc::new(RateLimiter::per_minute(2));
    let make = || {
        Generator::new(
            SlowEcho::default(),
            Arc::clone(&limiter),
            RetryPolicy::default(),
            BackoffRetry::default(),
            Sampling::from(&LlmConfig::default()),
        )
    };
    let (first, second) = (make(), make());
    let started = tokio::time::Instant::now();
    first.generate("", "a").await;
    second.generate("", "b").await;
    assert!(started.elapsed() < Duration::from_secs(60));
    first.generate("", "c").await;
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(first.service().calls.load(Ordering::SeqCst), 2);
    assert_eq!(second.service().calls.load(Ordering::SeqCst), 1);
}
