//! Typed ORPDA stage records and the per-tick merged result.
//!
//! Generation output is validated here, at the JSON boundary: each
//! payload key is deserialized into its stage record or skipped. Fields
//! the payload did not supply stay `None`; nothing is fabricated.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

use crate::types::DriftType;

// ---------------------------------------------------------------------------
// Stage kinds
// ---------------------------------------------------------------------------

/// The five stages of one agent-tick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Observe the scene.
    Observation,
    /// Reflect on it.
    Reflection,
    /// Plan the next move.
    Plan,
    /// Decide whether attention drifts.
    DriftDecision,
    /// Act.
    ActionResult,
}

impl StageKind {
    /// Every stage in ORPDA order.
    pub const ALL: [Self; 5] = [
        Self::Observation,
        Self::Reflection,
        Self::Plan,
        Self::DriftDecision,
        Self::ActionResult,
    ];

    /// Key used for this stage in payloads and the tick log.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Reflection => "reflection",
            Self::Plan => "plan",
            Self::DriftDecision => "drift_decision",
            Self::ActionResult => "action_result",
        }
    }

    /// Stage that follows this one, skipping drift-decide in ORPA mode.
    #[must_use]
    pub fn next(self, use_drift: bool) -> Option<Self> {
        match self {
            Self::Observation => Some(Self::Reflection),
            Self::Reflection => Some(Self::Plan),
            Self::Plan if use_drift => Some(Self::DriftDecision),
            Self::Plan | Self::DriftDecision => Some(Self::ActionResult),
            Self::ActionResult => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Stage records
// ---------------------------------------------------------------------------

/// Fields every stage may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCommon {
    /// Tick start, always overwritten by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_start: Option<String>,
    /// Tick length, always overwritten by the orchestrator.
    #[serde(default, deserialize_with = "lenient::opt_u32", skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<u32>,
    /// Location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Topic of attention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// One-line state description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_summary: Option<String>,
    /// Anything else the generation service returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Behaviour shared by every stage record.
pub trait StageRecord {
    /// The shared fields.
    fn common(&self) -> &StageCommon;
    /// The shared fields, mutably.
    fn common_mut(&mut self) -> &mut StageCommon;

    /// Overwrite the tick timing with the orchestrator's values.
    fn stamp(&mut self, datetime_start: &str, duration_min: u32) {
        let c = self.common_mut();
        c.datetime_start = Some(datetime_start.to_string());
        c.duration_min = Some(duration_min);
    }

    /// Drop a `next_datetime` the generation service invented.
    fn strip_next_datetime(&mut self) {
        self.common_mut().extra.remove("next_datetime");
    }
}

/// What the agent perceives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Shared fields.
    #[serde(flatten)]
    pub common: StageCommon,
}

/// How the agent feels about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    /// `stable` or `unstable`, used by the attention-stability metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attention_stability: Option<String>,
    /// Shared fields.
    #[serde(flatten)]
    pub common: StageCommon,
}

/// What the agent intends to do next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Shared fields.
    #[serde(flatten)]
    pub common: StageCommon,
}

/// Whether attention or behaviour deviates from the plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftDecision {
    /// Drift requested.
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub should_drift: Option<bool>,
    /// Kind of drift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_type: Option<DriftType>,
    /// What attention drifts toward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_topic: Option<String>,
    /// Strength in `[0, 1]` after normalisation.
    #[serde(default, deserialize_with = "lenient::opt_f32", skip_serializing_if = "Option::is_none")]
    pub drift_intensity: Option<f32>,
    /// Proposed drift action, `continue` when not drifting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_action: Option<String>,
    /// Why the agent drifts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    /// How the agent might get back on track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_recovery: Option<String>,
    /// Shared fields.
    #[serde(flatten)]
    pub common: StageCommon,
}

impl DriftDecision {
    /// Drift is effectively on: requested and with positive intensity.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.should_drift == Some(true) && self.drift_intensity.is_some_and(|i| i > 0.0)
    }

    /// Drift type, `none` when absent.
    #[must_use]
    pub fn kind(&self) -> DriftType {
        self.drift_type.clone().unwrap_or_default()
    }
}

/// What the agent actually does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Drift type carried over from the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_type: Option<DriftType>,
    /// Drift topic carried over from the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_topic: Option<String>,
    /// Start of the next tick, written by the orchestrator only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_datetime: Option<String>,
    /// Shared fields.
    #[serde(flatten)]
    pub common: StageCommon,
}

macro_rules! impl_stage_record {
    ($($ty:ty),+) => {$(
        impl StageRecord for $ty {
            fn common(&self) -> &StageCommon {
                &self.common
            }
            fn common_mut(&mut self) -> &mut StageCommon {
                &mut self.common
            }
        }
    )+};
}

impl_stage_record!(Observation, Reflection, Plan, DriftDecision, ActionResult);

// ---------------------------------------------------------------------------
// Merged result
// ---------------------------------------------------------------------------

/// The five stage slots of one agent-tick. Absent stages serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrpdaResult {
    /// Observe.
    #[serde(default)]
    pub observation: Option<Observation>,
    /// Reflect.
    #[serde(default)]
    pub reflection: Option<Reflection>,
    /// Plan.
    #[serde(default)]
    pub plan: Option<Plan>,
    /// Drift-decide.
    #[serde(default)]
    pub drift_decision: Option<DriftDecision>,
    /// Act.
    #[serde(default)]
    pub action_result: Option<ActionResult>,
}

impl OrpdaResult {
    /// Deserialize `value` into the slot for `kind`, replacing any earlier value.
    ///
    /// # Errors
    /// Returns the serde error if `value` does not fit the stage record.
    pub fn set(&mut self, kind: StageKind, value: Value) -> Result<(), serde_json::Error> {
        match kind {
            StageKind::Observation => self.observation = Some(serde_json::from_value(value)?),
            StageKind::Reflection => self.reflection = Some(serde_json::from_value(value)?),
            StageKind::Plan => self.plan = Some(serde_json::from_value(value)?),
            StageKind::DriftDecision => self.drift_decision = Some(serde_json::from_value(value)?),
            StageKind::ActionResult => self.action_result = Some(serde_json::from_value(value)?),
        }
        Ok(())
    }

    /// Whether the slot for `kind` holds a value.
    #[must_use]
    pub fn has(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Observation => self.observation.is_some(),
            StageKind::Reflection => self.reflection.is_some(),
            StageKind::Plan => self.plan.is_some(),
            StageKind::DriftDecision => self.drift_decision.is_some(),
            StageKind::ActionResult => self.action_result.is_some(),
        }
    }

    /// Merge one parsed payload produced by stage `producer`.
    ///
    /// Keys naming a stage overwrite that slot (latest pass wins). A
    /// nested `{"action": {"action_result": {..}}}` is lifted to
    /// `action_result`. An object carrying none of the stage keys is
    /// taken as the producer's own record. Returns the number of slots
    /// written.
    pub fn absorb(&mut self, payload: Map<String, Value>, producer: StageKind) -> usize {
        let mut payload = payload;
        if let Some(Value::Object(nested)) = payload.get("action") {
            if let Some(inner) = nested.get(StageKind::ActionResult.key()) {
                let inner = inner.clone();
                payload.insert(StageKind::ActionResult.key().to_string(), inner);
            }
        }

        let keyed = StageKind::ALL
            .iter()
            .any(|k| payload.contains_key(k.key()));
        if !keyed {
            return usize::from(self.try_set(producer, Value::Object(payload)));
        }

        let mut written = 0;
        for kind in StageKind::ALL {
            if let Some(value) = payload.remove(kind.key()) {
                if value.is_null() {
                    continue;
                }
                written += usize::from(self.try_set(kind, value));
            }
        }
        written
    }

    fn try_set(&mut self, kind: StageKind, value: Value) -> bool {
        match self.set(kind, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(stage = %kind, error = %e, "Stage payload did not match its record, skipping");
                false
            }
        }
    }

    /// Whether any slot is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !StageKind::ALL.iter().any(|k| self.has(*k))
    }
}

// ---------------------------------------------------------------------------
// Lenient field parsing
// ---------------------------------------------------------------------------

/// Deserializers that accept the loose scalar encodings generation
/// services produce (`"true"`, `"0.7"`, `"15"`). Unusable values become `None`.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(true),
                "false" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn opt_f32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f32>, D::Error> {
        let parsed = match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_f64().map(|v| v as f32),
            Some(Value::String(s)) => s.trim().parse::<f32>().ok(),
            _ => None,
        };
        Ok(parsed.filter(|x| x.is_finite()))
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
            _ => None,
        })
    }
}
