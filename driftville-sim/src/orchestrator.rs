//! The ORPDA cycle for one agent-tick.
//!
//! The orchestrator walks the pipeline one stage at a time. Each stage is
//! a single suspension point: render the prompt, await the generator,
//! extract the JSON object and fold it into the merged result. A stage
//! that yields nothing usable is logged and skipped; the tick always
//! completes. Once every stage has run, [`DriftNormalizer`] makes the
//! result consistent with the schedule and the tick's canonical timing.

use std::sync::Arc;

use chrono::NaiveDateTime;
use driftville_core::agent::Agent;
use driftville_core::drift::{DriftNormalizer, TickFrame};
use driftville_core::schedule::ScheduleSlot;
use driftville_core::stage::{OrpdaResult, StageKind};
use driftville_core::types::{format_sim_time, DriftType};
use driftville_llm::generator::Generator;
use driftville_llm::prompt::PromptEngine;
use driftville_llm::types::GenerationService;
use serde_json::{json, Map, Value};
use tracing::{debug, info_span, warn, Instrument};

use crate::extract::extract_object;
use crate::pipeline::{Pipeline, StageDescriptor};

/// What happened to a single stage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The payload was merged into this many slots.
    Merged(usize),
    /// The reply held no JSON object.
    Unparsed,
    /// The generator gave up.
    NoOutput,
}

/// A merged, normalised tick and how it was assembled.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// The merged result, normalised.
    pub result: OrpdaResult,
    /// Effective drift type after normalisation.
    pub drift: DriftType,
    /// One outcome per stage, in pipeline order.
    pub stages: Vec<(StageKind, StageOutcome)>,
}

/// Runs the pipeline for one agent and merges the replies.
pub struct StageOrchestrator {
    pipeline: Pipeline,
    prompts: Arc<PromptEngine>,
    step_minutes: u32,
}

impl StageOrchestrator {
    /// Create an orchestrator. Call [`Pipeline::validate`] first.
    #[must_use]
    pub fn new(pipeline: Pipeline, prompts: Arc<PromptEngine>, step_minutes: u32) -> Self {
        Self {
            pipeline,
            prompts,
            step_minutes,
        }
    }

    /// The pipeline this orchestrator runs.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The context record every stage sees, before stage outputs are added.
    #[must_use]
    pub fn base_context(agent: &Agent, now: NaiveDateTime) -> Map<String, Value> {
        let slot_json = |slot: Option<&ScheduleSlot>| {
            slot.and_then(|s| serde_json::to_value(s).ok())
                .unwrap_or(Value::Null)
        };
        let history: Vec<Value> = agent
            .recent_history()
            .map(|h| json!({ "sim_time": h.sim_time, "summary": h.summary }))
            .collect();

        let mut context = Map::new();
        context.insert("persona".into(), agent.persona.clone());
        context.insert("current_datetime".into(), Value::String(format_sim_time(&now)));
        context.insert("recent_history".into(), Value::Array(history));
        context.insert(
            "last_action_result".into(),
            agent
                .last_action_result
                .as_ref()
                .and_then(|a| serde_json::to_value(a).ok())
                .unwrap_or(Value::Null),
        );
        context.insert("current_slot".into(), slot_json(agent.slot_at(now)));
        context.insert("next_slot".into(), slot_json(agent.schedule.next_slot(now)));
        context
    }

    async fn run_stage<G: GenerationService>(
        &self,
        generator: &Generator<G>,
        stage: StageDescriptor,
        context: &Map<String, Value>,
        result: &mut OrpdaResult,
    ) -> StageOutcome {
        let rendered = serde_json::to_string_pretty(context).unwrap_or_default();
        let Ok((system, user)) = self.prompts.render(stage.prompt, &[("context", rendered.as_str())]) else {
            warn!(prompt = %stage.prompt, "Prompt template missing");
            return StageOutcome::NoOutput;
        };
        let Some(reply) = generator.generate(&system, &user).await else {
            warn!("Stage produced no output");
            return StageOutcome::NoOutput;
        };
        let Some(payload) = extract_object(&reply) else {
            warn!(chars = reply.len(), "Stage reply held no JSON object, skipping");
            return StageOutcome::Unparsed;
        };
        let written = result.absorb(payload, stage.kind);
        debug!(written, "Stage merged");
        StageOutcome::Merged(written)
    }

    /// Run every stage for `agent` at `now`, then normalise.
    pub async fn run_tick<G: GenerationService>(&self, generator: &Generator<G>, agent: &Agent, now: NaiveDateTime) -> TickOutcome {
        let mut context = Self::base_context(agent, now);
        let mut result = OrpdaResult::default();
        let mut stages = Vec::with_capacity(self.pipeline.stages().len());

        for &stage in self.pipeline.stages() {
            let span = info_span!("stage", agent = %agent.name, stage = %stage.kind);
            let outcome = self
                .run_stage(generator, stage, &context, &mut result)
                .instrument(span)
                .await;
            stages.push((stage.kind, outcome));
            // Later stages see what earlier ones produced.
            if let Ok(Value::Object(so_far)) = serde_json::to_value(&result) {
                context.insert("orpda_so_far".into(), Value::Object(so_far));
            }
        }

        let slot = agent.slot_at(now);
        let frame = TickFrame {
            now,
            step_minutes: self.step_minutes,
            slot,
            first_tick: agent.is_first_tick(),
            use_drift: self.pipeline.use_drift(),
        };
        let drift = DriftNormalizer::normalize(&mut result, &frame);
        TickOutcome { result, drift, stages }
    }
}
