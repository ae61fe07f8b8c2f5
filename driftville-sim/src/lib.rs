//! # driftville-sim
//!
//! The runtime that turns persona agents and a generation service into
//! tick logs.
//!
//! ```text
//! SimulationContext ── per tick, per agent ──▶ StageOrchestrator
//!        │                                        │  Observe ▸ Reflect ▸ Plan ▸ Drift ▸ Act
//!        │                                        ▼
//!        │                               extract ▸ absorb ▸ DriftNormalizer
//!        │
//!        └── every N ticks ──▶ ConversationEngine (speak gate ▸ turns ▸ store)
//! ```
//!
//! - `pipeline`: the fixed stage descriptors, validated at startup
//! - `extract`: JSON object extraction from free-form replies
//! - `orchestrator`: one agent-tick through the stage cycle
//! - `conversation`: co-location trigger, turn loop, dialogue storage
//! - `simulation`: the sequential tick driver
//! - `telemetry`: tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod conversation;
pub mod extract;
pub mod orchestrator;
pub mod pipeline;
pub mod simulation;
pub mod telemetry;

pub use conversation::{ConversationEngine, Encounter, StoreOutcome};
pub use orchestrator::{StageOrchestrator, StageOutcome, TickOutcome};
pub use pipeline::{Pipeline, StageDescriptor};
pub use simulation::{RunSummary, SimulationContext};
pub use telemetry::init_tracing;
