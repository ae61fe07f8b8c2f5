//! # Driftville Core Library
//!
//! Data model and pure policies for persona agents that live through a day
//! one ORPDA tick at a time (Observe, Reflect, Plan, Drift-decide, Act).
//!
//! Nothing in this crate talks to a model or sleeps. The generation side
//! lives in `driftville-llm`, the async tick loop in `driftville-sim`.
//!
//! - [`schedule`]: which slot is active at a given time
//! - [`stage`]: stage records and the merged [`OrpdaResult`]
//! - [`drift`]: the normalisation policy applied to every tick
//! - [`memory`] / [`retrieval`]: memory log and the relevance ranker
//! - [`dialogue`]: conversation records, line cleanup, dedup ledger
//! - [`persistence`]: JSONL tick, memory, event and stream logs
//! - [`metrics`]: drift statistics, inherent drift, audit, ablation report

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod config;
pub mod dialogue;
pub mod drift;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod persistence;
pub mod retrieval;
pub mod schedule;
pub mod stage;
pub mod summary;
pub mod types;

pub use agent::{Agent, PersonaDefinition};
pub use config::DriftvilleConfig;
pub use drift::{DriftNormalizer, TickFrame};
pub use embedding::{BagOfWordsEmbedder, EmbeddingService};
pub use error::{DriftvilleError, Result};
pub use memory::{MemoryEntry, MemoryStore};
pub use retrieval::RelevanceRanker;
pub use schedule::{Schedule, ScheduleSlot};
pub use stage::{OrpdaResult, StageKind};
pub use types::*;
