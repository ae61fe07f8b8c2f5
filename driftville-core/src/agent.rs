//! Agent state owned by the simulation driver.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{DriftvilleError, Result};
use crate::memory::MemoryStore;
use crate::schedule::{OverlapPolicy, Schedule, ScheduleSlot, SlotSpec};
use crate::stage::{ActionResult, OrpdaResult, Reflection};
use crate::types::{format_sim_time, DriftType};

/// Persona record as provided by the persona source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDefinition {
    /// Opaque persona data; must carry a string `name`.
    pub persona: serde_json::Value,
    /// The persona's day.
    #[serde(default)]
    pub schedule: Vec<SlotSpec>,
}

/// What the agent is doing right now, derived from the last merged tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentAction {
    /// Tick the action was taken at.
    pub sim_datetime: String,
    /// Action name.
    pub action: String,
    /// Location.
    pub location: String,
    /// Drift type in effect.
    pub drift_type: DriftType,
    /// Topic of attention.
    pub topic: Option<String>,
}

/// One memory-stream summary fed back into later contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Tick the summary describes.
    pub sim_time: String,
    /// The summary sentence.
    pub summary: String,
}

/// A simulated persona.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Unique name.
    pub name: String,
    /// Opaque persona data, forwarded to prompts verbatim.
    pub persona: serde_json::Value,
    /// The day plan.
    pub schedule: Schedule,
    /// Last merged action, `None` before the first tick.
    pub current_action: Option<CurrentAction>,
    /// Last normalised action result.
    pub last_action_result: Option<ActionResult>,
    /// Long-term memories.
    pub memory: MemoryStore,
    /// Every reflection the agent produced.
    pub reflections: Vec<Reflection>,
    recent_history: VecDeque<HistoryItem>,
    history_window: usize,
}

impl Agent {
    /// Create an agent with an empty memory.
    #[must_use]
    pub fn new(name: impl Into<String>, persona: serde_json::Value, schedule: Schedule, history_window: usize) -> Self {
        Self {
            name: name.into(),
            persona,
            schedule,
            current_action: None,
            last_action_result: None,
            memory: MemoryStore::new(),
            reflections: Vec::new(),
            recent_history: VecDeque::with_capacity(history_window),
            history_window,
        }
    }

    /// Build an agent from its persona-source record.
    ///
    /// # Errors
    /// Returns `InvalidSchedule` if the persona has no name or a slot is invalid.
    pub fn from_definition(def: &PersonaDefinition, policy: OverlapPolicy, history_window: usize) -> Result<Self> {
        let name = def
            .persona
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| DriftvilleError::InvalidSchedule {
                agent: "<unnamed>".to_string(),
                reason: "persona has no name".to_string(),
            })?
            .to_string();
        let schedule = Schedule::from_specs(&name, &def.schedule, policy)?;
        Ok(Self::new(name, def.persona.clone(), schedule, history_window))
    }

    /// No tick has been merged yet.
    #[must_use]
    pub fn is_first_tick(&self) -> bool {
        self.last_action_result.is_none()
    }

    /// Slot active at `t`.
    #[must_use]
    pub fn slot_at(&self, t: NaiveDateTime) -> Option<&ScheduleSlot> {
        self.schedule.slot_at(t)
    }

    /// Bounded window of recent summaries, oldest first.
    pub fn recent_history(&self) -> impl Iterator<Item = &HistoryItem> {
        self.recent_history.iter()
    }

    /// Fold a normalised tick into the agent's state.
    pub fn record_tick(&mut self, now: NaiveDateTime, result: &OrpdaResult, summary: String) {
        let plan = result.plan.as_ref().map(|p| &p.common);
        let act = result.action_result.as_ref();
        let pick = |from_act: Option<&String>, from_plan: Option<&String>, fallback: &str| {
            from_act
                .or(from_plan)
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };

        let sim_time = format_sim_time(&now);
        self.current_action = Some(CurrentAction {
            sim_datetime: sim_time.clone(),
            action: pick(
                act.and_then(|a| a.common.action.as_ref()),
                plan.and_then(|p| p.action.as_ref()),
                "idle",
            ),
            location: pick(
                act.and_then(|a| a.common.location.as_ref()),
                plan.and_then(|p| p.location.as_ref()),
                "home",
            ),
            drift_type: act
                .and_then(|a| a.drift_type.clone())
                .or_else(|| result.drift_decision.as_ref().and_then(|d| d.drift_type.clone()))
                .unwrap_or_default(),
            topic: act
                .and_then(|a| a.common.topic.clone())
                .or_else(|| plan.and_then(|p| p.topic.clone())),
        });
        self.last_action_result = act.cloned();
        if let Some(r) = result.reflection.as_ref() {
            self.reflections.push(r.clone());
        }

        if self.history_window > 0 {
            while self.recent_history.len() >= self.history_window {
                self.recent_history.pop_front();
            }
            self.recent_history.push_back(HistoryItem { sim_time, summary });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageCommon;
    use crate::types::parse_sim_time;
    use serde_json::json;

    fn sam() -> Agent {
        let def: PersonaDefinition = serde_json::from_value(json!({
            "persona": {"name": "Sam", "age": 31},
            "schedule": [
                {"datetime_start": "2023-02-13 06:00", "duration_min": 60, "location": "cafe", "action": "work"}
            ]
        }))
        .expect("definition");
        Agent::from_definition(&def, OverlapPolicy::default(), 2).expect("agent")
    }

    #[test]
    fn unnamed_persona_is_rejected() {
        let def = PersonaDefinition { persona: json!({}), schedule: vec![] };
        assert!(Agent::from_definition(&def, OverlapPolicy::default(), 5).is_err());
    }

    #[test]
    fn record_tick_updates_current_action_and_window() {
        let mut agent = sam();
        assert!(agent.is_first_tick());
        let now = parse_sim_time("2023-02-13 06:00").expect("time");
        let result = OrpdaResult {
            action_result: Some(ActionResult {
                common: StageCommon {
                    action: Some("work".into()),
                    location: Some("cafe".into()),
                    ..StageCommon::default()
                },
                ..ActionResult::default()
            }),
            ..OrpdaResult::default()
        };
        for i in 0..3 {
            agent.record_tick(now, &result, format!("summary {i}"));
        }
        assert!(!agent.is_first_tick());
        let current = agent.current_action.as_ref().expect("current");
        assert_eq!(current.location, "cafe");
        assert_eq!(current.drift_type, DriftType::None);
        let window: Vec<_> = agent.recent_history().map(|h| h.summary.as_str()).collect();
        assert_eq!(window, ["summary 1", "summary 2"]);
    }
}
