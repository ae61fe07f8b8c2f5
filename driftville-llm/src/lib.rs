//! # driftville-llm
//!
//! Generation and embedding plumbing for Driftville. Every model call made
//! by a tick goes through this crate:
//!
//! - [`client`]: Ollama and OpenAI-compatible chat backends, one attempt per call
//! - [`rate_limit`]: the shared sliding-window admission control
//! - [`retry`]: single fixed-pause retry for stages, exponential backoff for scoring
//! - [`generator`]: the serialised, paced front door used by the simulation
//! - [`prompt`]: built-in templates with TOML overrides
//! - [`embedding`]: HTTP embedders for the metrics engine
//!
//! Callers never see an error from [`Generator`]: exhausted calls come back
//! as `None` and the tick goes on with whatever it has.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod prompt;
pub mod rate_limit;
pub mod retry;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use embedding::{AnyEmbedder, EmbeddingClient};
pub use error::{ErrorKind, LlmError};
pub use generator::{Generator, Sampling};
pub use prompt::{PromptEngine, PromptId};
pub use rate_limit::RateLimiter;
pub use retry::{BackoffRetry, RetryPolicy};
pub use types::{GenerationService, LlmRequest, LlmResponse};
