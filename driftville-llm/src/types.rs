//! Core types for generation requests and responses.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// A request to the generation service: a standing instruction plus the
/// turn-specific prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmRequest {
    /// Standing instruction (stage role, output contract).
    pub system: String,
    /// Prompt for this call (context, memories, dialogue).
    pub user: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// Create a request with default sampling.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 1024,
            temperature: 0.7,
            timeout_ms: 120_000,
        }
    }

    /// Set the token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A response from the generation service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}

impl LlmResponse {
    /// A response carrying only text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_generated: 0,
            latency_ms: 0,
            model: String::new(),
        }
    }
}

/// Anything that turns a request into text. One call is one attempt;
/// retries and pacing live in [`crate::Generator`].
pub trait GenerationService: Send + Sync {
    /// Perform a single generation attempt.
    fn generate(&self, request: &LlmRequest) -> impl Future<Output = Result<LlmResponse, LlmError>> + Send;
}
