//! The tick driver.
//!
//! [`SimulationContext`] owns everything a run touches: the generator (and
//! through it the rate limiter), the agent table, the log sinks and the
//! seeded RNG. Ticks advance strictly in sequence and agents within a tick
//! run one after another, so every generation call passes through the same
//! gate in a predictable order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use driftville_core::agent::Agent;
use driftville_core::config::DriftvilleConfig;
use driftville_core::dialogue::parse_importance;
use driftville_core::error::{DriftvilleError, Result};
use driftville_core::memory::MemoryEntry;
use driftville_core::persistence::{LogSinks, StreamLogEntry, TickLogEntry};
use driftville_core::summary::summarize_tick;
use driftville_core::types::{format_sim_time, parse_sim_time, DriftType};
use driftville_llm::generator::Generator;
use driftville_llm::prompt::{PromptEngine, PromptId};
use driftville_llm::types::GenerationService;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, info_span, Instrument};

use crate::conversation::{find_encounter, pair_mut, ConversationEngine, StoreOutcome};
use crate::orchestrator::{StageOrchestrator, TickOutcome};
use crate::pipeline::Pipeline;

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Ticks simulated.
    pub ticks: u32,
    /// Agent-ticks merged and logged.
    pub agent_ticks: usize,
    /// Agent-ticks whose effective drift was not `none`.
    pub drift_ticks: usize,
    /// Conversations stored.
    pub conversations: usize,
}

/// Everything one simulation run owns.
pub struct SimulationContext<G> {
    config: DriftvilleConfig,
    generator: Generator<G>,
    prompts: Arc<PromptEngine>,
    orchestrator: StageOrchestrator,
    conversations: ConversationEngine,
    agents: Vec<Agent>,
    sinks: LogSinks,
    rng: StdRng,
}

impl<G: GenerationService> SimulationContext<G> {
    /// Assemble a run with the built-in prompts.
    ///
    /// # Errors
    /// See [`SimulationContext::with_prompts`].
    pub fn new(config: DriftvilleConfig, generator: Generator<G>, agents: Vec<Agent>, sinks: LogSinks) -> Result<Self> {
        Self::with_prompts(config, generator, PromptEngine::builtin(), agents, sinks)
    }

    /// Assemble a run with a custom prompt set.
    ///
    /// # Errors
    /// Returns [`DriftvilleError::Pipeline`] if the pipeline does not
    /// validate against `prompts`, or [`DriftvilleError::Config`] if the
    /// step length is zero.
    pub fn with_prompts(
        config: DriftvilleConfig,
        generator: Generator<G>,
        prompts: PromptEngine,
        agents: Vec<Agent>,
        sinks: LogSinks,
    ) -> Result<Self> {
        if config.simulation.minutes_per_tick == 0 {
            return Err(DriftvilleError::Config("minutes_per_tick must be positive".into()));
        }
        let pipeline = Pipeline::for_mode(config.simulation.use_drift);
        pipeline.validate(&prompts)?;
        let prompts = Arc::new(prompts);
        let rng = config
            .simulation
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Ok(Self {
            orchestrator: StageOrchestrator::new(pipeline, Arc::clone(&prompts), config.simulation.minutes_per_tick),
            conversations: ConversationEngine::new(
                Arc::clone(&prompts),
                config.retrieval.clone(),
                config.conversation.clone(),
            ),
            prompts,
            generator,
            agents,
            sinks,
            rng,
            config,
        })
    }

    /// The agent table.
    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// The log sinks.
    #[must_use]
    pub fn sinks(&self) -> &LogSinks {
        &self.sinks
    }

    /// The generator, for callers that need to inspect the service.
    #[must_use]
    pub fn generator(&self) -> &Generator<G> {
        &self.generator
    }

    /// Simulated time of tick `tick`.
    ///
    /// # Errors
    /// Returns [`DriftvilleError::Config`] if `start_time` does not parse.
    pub fn tick_time(&self, tick: u32) -> Result<NaiveDateTime> {
        let start = parse_sim_time(&self.config.simulation.start_time)
            .map_err(|e| DriftvilleError::Config(format!("bad start_time '{}': {e}", self.config.simulation.start_time)))?;
        let minutes = i64::from(tick) * i64::from(self.config.simulation.minutes_per_tick);
        Ok(start + chrono::Duration::minutes(minutes))
    }

    /// Run every configured tick.
    ///
    /// # Errors
    /// Returns [`DriftvilleError::Config`] if `start_time` does not parse.
    /// Failures inside a tick are logged and never end the run.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let pause = Duration::from_millis(self.config.simulation.post_tick_pause_ms);
        info!(
            ticks = self.config.simulation.num_ticks,
            agents = self.agents.len(),
            use_drift = self.config.simulation.use_drift,
            "Simulation starting"
        );
        for tick in 0..self.config.simulation.num_ticks {
            let now = self.tick_time(tick)?;
            for index in 0..self.agents.len() {
                let drift = self.agent_tick(tick, now, index).await;
                summary.agent_ticks += 1;
                if drift != DriftType::None {
                    summary.drift_ticks += 1;
                }
            }
            let interval = self.config.simulation.conversation_interval_ticks;
            if interval > 0 && tick % interval == 0 && self.maybe_converse(now).await {
                summary.conversations += 1;
            }
            summary.ticks += 1;
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        info!(?summary, "Simulation finished");
        Ok(summary)
    }

    /// Run, log and fold one tick for agent `index`. Returns the effective drift.
    pub async fn agent_tick(&mut self, tick: u32, now: NaiveDateTime, index: usize) -> DriftType {
        let Some(agent) = self.agents.get(index) else {
            return DriftType::None;
        };
        let sim_time = format_sim_time(&now);
        let span = info_span!("tick", tick, agent = %agent.name, sim_time = %sim_time);
        let TickOutcome { result, drift, stages } = self
            .orchestrator
            .run_tick(&self.generator, agent, now)
            .instrument(span.clone())
            .await;
        debug!(parent: &span, ?stages, drift = %drift, "Tick merged");

        let name = agent.name.clone();
        let line = summarize_tick(&name, &result);
        self.sinks.stream.append_or_warn(&StreamLogEntry {
            ts_created: Utc::now(),
            sim_time: sim_time.clone(),
            agent: name.clone(),
            summary: line.clone(),
        });

        if self.config.simulation.remember_observations {
            self.remember(index, &line).instrument(span).await;
        }

        if let Some(agent) = self.agents.get_mut(index) {
            agent.record_tick(now, &result, line);
        }
        let entry = TickLogEntry::new(tick, sim_time, name, self.orchestrator.pipeline().use_drift(), result);
        self.sinks.ticks.append_or_warn(&entry);
        drift
    }

    async fn remember(&mut self, index: usize, line: &str) {
        let Ok((system, user)) = self.prompts.render(PromptId::Importance, &[("text", line)]) else {
            return;
        };
        let Some(importance) = self
            .generator
            .generate_scored(&system, &user)
            .await
            .and_then(|reply| parse_importance(&reply))
        else {
            debug!("Observation not scored, not remembered");
            return;
        };
        if let Some(agent) = self.agents.get_mut(index) {
            let entry = MemoryEntry::new(line, vec![agent.name.clone()], importance, Utc::now());
            self.sinks.memories.append_or_warn(&entry);
            agent.memory.append(entry);
        }
    }

    /// Give two co-located agents the chance to talk. Returns whether a
    /// new dialogue was stored.
    pub async fn maybe_converse(&mut self, now: NaiveDateTime) -> bool {
        let Some(encounter) = find_encounter(&self.agents, now, &mut self.rng) else {
            return false;
        };
        let span = info_span!("conversation", context = %encounter.context);
        let turns = {
            let (Some(a), Some(b)) = (self.agents.get(encounter.initiator), self.agents.get(encounter.partner)) else {
                return false;
            };
            self.conversations
                .converse(&self.generator, a, b, &encounter.context)
                .instrument(span.clone())
                .await
        };
        let Some(pair) = pair_mut(&mut self.agents, encounter.initiator, encounter.partner) else {
            return false;
        };
        let outcome = self
            .conversations
            .store(&self.generator, pair, &encounter.context, turns, Utc::now(), &self.sinks)
            .instrument(span)
            .await;
        matches!(outcome, StoreOutcome::Stored { .. })
    }
}
