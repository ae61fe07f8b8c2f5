//! Drift normalisation: the consistency rules between a drift decision,
//! the active schedule slot, and the action actually taken.
//!
//! Generation output is unreliable about staying in character with the
//! schedule. [`DriftNormalizer::normalize`] is the enforcement boundary:
//! after it runs, a drift-off tick carries `drift_type = none` and an empty
//! topic, and a non-behavioral tick inside its slot sits at the slot's
//! location doing the slot's action.

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::schedule::ScheduleSlot;
use crate::stage::{ActionResult, OrpdaResult, StageCommon, StageRecord};
use crate::types::{format_sim_time, DriftType};

/// Everything the normalizer needs to know about the tick being merged.
#[derive(Debug, Clone, Copy)]
pub struct TickFrame<'a> {
    /// Canonical tick start.
    pub now: NaiveDateTime,
    /// Fixed step length.
    pub step_minutes: u32,
    /// Slot active at `now`, if any.
    pub slot: Option<&'a ScheduleSlot>,
    /// No prior action result exists for this agent.
    pub first_tick: bool,
    /// Drift-decide is enabled for the run.
    pub use_drift: bool,
}

/// Applies the drift consistency rules to a merged tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriftNormalizer;

impl DriftNormalizer {
    /// Normalise `result` in place and return the effective drift type.
    ///
    /// The action result is always present afterwards. A missing drift
    /// decision stays missing and counts as no drift.
    pub fn normalize(result: &mut OrpdaResult, frame: &TickFrame<'_>) -> DriftType {
        Self::strip_next_datetime(result);
        let action = result.action_result.get_or_insert_with(ActionResult::default);

        let active = frame.use_drift
            && result.drift_decision.as_ref().is_some_and(|d| d.is_active());

        if active {
            if let Some(decision) = result.drift_decision.as_mut() {
                decision.drift_intensity = decision.drift_intensity.map(|i| i.clamp(0.0, 1.0));
                decision.drift_type.get_or_insert(DriftType::None);
            }
        } else {
            if let Some(decision) = result.drift_decision.as_mut() {
                decision.should_drift = Some(false);
                decision.drift_type = Some(DriftType::None);
                decision.drift_topic = Some(String::new());
                decision.drift_intensity = Some(0.0);
                decision.drift_action = Some("continue".to_string());
                decision.justification = Some(String::new());
                decision.potential_recovery = Some(String::new());
            }
            action.drift_type = Some(DriftType::None);
            action.drift_topic = None;
        }

        let start = format_sim_time(&frame.now);
        Self::stamp_all(result, &start, frame.step_minutes);

        let drift_type = result
            .drift_decision
            .as_ref()
            .map(crate::stage::DriftDecision::kind)
            .unwrap_or_default();

        if active {
            if let (Some(decision), Some(action)) =
                (result.drift_decision.as_ref(), result.action_result.as_mut())
            {
                action.drift_type = Some(drift_type.clone());
                action.drift_topic.clone_from(&decision.drift_topic);
            }
        }

        if let Some(slot) = frame.slot {
            if frame.first_tick {
                debug!(slot = %slot.action, "First tick, aligning to active slot");
                if let Some(o) = result.observation.as_mut() {
                    align_to_slot(&mut o.common, slot);
                }
                if let Some(p) = result.plan.as_mut() {
                    align_to_slot(&mut p.common, slot);
                }
                if let Some(a) = result.action_result.as_mut() {
                    align_to_slot(&mut a.common, slot);
                }
            }

            if drift_type.keeps_schedule() && frame.now < slot.end {
                if let Some(a) = result.action_result.as_mut() {
                    align_to_slot(&mut a.common, slot);
                }
                if let Some(p) = result.plan.as_mut() {
                    align_to_slot(&mut p.common, slot);
                }
            }
        }

        // The first tick inside a slot stays aligned whatever the drift.
        let pinned = frame.first_tick && frame.slot.is_some();
        if drift_type.keeps_schedule() {
            Self::follow_plan(result);
        } else if !pinned {
            Self::adopt_drift_action(result, frame.slot);
        }

        if drift_type == DriftType::None {
            let summary = [
                result.plan.as_ref().map(|p| &p.common),
                result.observation.as_ref().map(|o| &o.common),
                result.action_result.as_ref().map(|a| &a.common),
            ]
            .into_iter()
            .flatten()
            .find_map(|c| c.state_summary.clone().filter(|s| !s.is_empty()));
            if let Some(a) = result.action_result.as_mut() {
                a.common.state_summary = Some(summary.unwrap_or_default());
            }
        }

        if let Some(a) = result.action_result.as_mut() {
            let next = frame.now + Duration::minutes(i64::from(frame.step_minutes));
            a.next_datetime = Some(format_sim_time(&next));
        }

        drift_type
    }

    fn strip_next_datetime(result: &mut OrpdaResult) {
        if let Some(o) = result.observation.as_mut() {
            o.strip_next_datetime();
        }
        if let Some(r) = result.reflection.as_mut() {
            r.strip_next_datetime();
        }
        if let Some(p) = result.plan.as_mut() {
            p.strip_next_datetime();
        }
        if let Some(d) = result.drift_decision.as_mut() {
            d.strip_next_datetime();
        }
        if let Some(a) = result.action_result.as_mut() {
            a.strip_next_datetime();
            a.next_datetime = None;
        }
    }

    fn stamp_all(result: &mut OrpdaResult, start: &str, step: u32) {
        if let Some(o) = result.observation.as_mut() {
            o.stamp(start, step);
        }
        if let Some(r) = result.reflection.as_mut() {
            r.stamp(start, step);
        }
        if let Some(p) = result.plan.as_mut() {
            p.stamp(start, step);
        }
        if let Some(d) = result.drift_decision.as_mut() {
            d.stamp(start, step);
        }
        if let Some(a) = result.action_result.as_mut() {
            a.stamp(start, step);
        }
    }

    /// Non-behavioral ticks keep the plan's location and action.
    fn follow_plan(result: &mut OrpdaResult) {
        let (Some(plan), Some(action)) = (result.plan.as_ref(), result.action_result.as_mut())
        else {
            return;
        };
        let plan = &plan.common;
        let act = &mut action.common;
        if let Some(loc) = plan.location.as_ref().filter(|s| !s.is_empty()) {
            act.location = Some(loc.clone());
        }
        if let Some(a) = plan.action.as_ref().filter(|s| !s.is_empty()) {
            act.action = Some(a.clone());
        }
        if act.topic.is_none() {
            act.topic.clone_from(&plan.topic);
        }
    }

    /// Behavioral drift with no distinct proposed action takes the decision's drift action.
    fn adopt_drift_action(result: &mut OrpdaResult, slot: Option<&ScheduleSlot>) {
        let Some(drift_action) = result
            .drift_decision
            .as_ref()
            .and_then(|d| d.drift_action.clone())
            .filter(|a| !a.trim().is_empty() && a != "continue")
        else {
            return;
        };
        let planned = result
            .plan
            .as_ref()
            .and_then(|p| p.common.action.clone())
            .or_else(|| slot.map(|s| s.action.clone()));
        if let Some(action) = result.action_result.as_mut() {
            let unchanged = match action.common.action.as_ref() {
                None => true,
                Some(a) => planned.as_ref() == Some(a),
            };
            if unchanged {
                action.common.action = Some(drift_action);
            }
        }
    }
}

fn align_to_slot(common: &mut StageCommon, slot: &ScheduleSlot) {
    common.location = Some(slot.location.clone());
    common.action = Some(slot.action.clone());
    common.topic = Some(slot.topic().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::SlotSpec;
    use crate::stage::{DriftDecision, Observation, Plan};
    use crate::types::parse_sim_time;

    fn cafe_slot() -> ScheduleSlot {
        ScheduleSlot::from_spec(
            "Sam",
            &SlotSpec {
                datetime_start: "2023-02-13 06:00".into(),
                duration_min: 60,
                location: "cafe".into(),
                action: "work".into(),
                notes: String::new(),
                environment_description: String::new(),
            },
        )
        .expect("slot")
    }

    fn frame(slot: Option<&ScheduleSlot>, first_tick: bool) -> TickFrame<'_> {
        TickFrame {
            now: parse_sim_time("2023-02-13 06:15").expect("time"),
            step_minutes: 15,
            slot,
            first_tick,
            use_drift: true,
        }
    }

    fn common(location: &str, action: &str) -> StageCommon {
        StageCommon {
            location: Some(location.into()),
            action: Some(action.into()),
            ..StageCommon::default()
        }
    }

    fn drifting(kind: &str, intensity: f32, topic: &str) -> DriftDecision {
        DriftDecision {
            should_drift: Some(true),
            drift_type: Some(DriftType::from(kind)),
            drift_topic: Some(topic.into()),
            drift_intensity: Some(intensity),
            drift_action: Some("browse shop windows".into()),
            justification: Some("bored".into()),
            ..DriftDecision::default()
        }
    }

    #[test]
    fn zero_intensity_turns_drift_off() {
        let mut r = OrpdaResult {
            drift_decision: Some(drifting("behavioral", 0.0, "shops")),
            ..OrpdaResult::default()
        };
        let t = DriftNormalizer::normalize(&mut r, &frame(None, false));
        assert_eq!(t, DriftType::None);
        let d = r.drift_decision.expect("decision");
        assert_eq!(d.drift_topic.as_deref(), Some(""));
        assert_eq!(d.drift_action.as_deref(), Some("continue"));
        let a = r.action_result.expect("action");
        assert_eq!(a.drift_type, Some(DriftType::None));
        assert!(a.drift_topic.is_none());
    }

    #[test]
    fn attentional_leak_stays_in_slot() {
        let slot = cafe_slot();
        let mut r = OrpdaResult {
            plan: Some(Plan { common: common("cafe", "work") }),
            drift_decision: Some(drifting("attentional_leak", 0.6, "phone")),
            action_result: Some(ActionResult {
                common: common("park", "stroll"),
                ..ActionResult::default()
            }),
            ..OrpdaResult::default()
        };
        DriftNormalizer::normalize(&mut r, &frame(Some(&slot), false));
        let a = r.action_result.expect("action");
        assert_eq!(a.common.location.as_deref(), Some("cafe"));
        assert_eq!(a.common.action.as_deref(), Some("work"));
        assert_eq!(a.drift_topic.as_deref(), Some("phone"));
    }

    #[test]
    fn behavioral_drift_may_leave_slot() {
        let slot = cafe_slot();
        let mut r = OrpdaResult {
            drift_decision: Some(drifting("behavioral", 0.7, "window shopping")),
            action_result: Some(ActionResult {
                common: common("cafe", "work"),
                ..ActionResult::default()
            }),
            plan: Some(Plan { common: common("cafe", "work") }),
            ..OrpdaResult::default()
        };
        let t = DriftNormalizer::normalize(&mut r, &frame(Some(&slot), false));
        assert_eq!(t, DriftType::Behavioral);
        let a = r.action_result.expect("action");
        assert_ne!(a.common.action.as_deref(), Some("work"));
        assert_eq!(a.drift_topic.as_deref(), Some("window shopping"));
    }

    #[test]
    fn first_tick_aligns_everything_to_slot() {
        let slot = cafe_slot();
        let mut r = OrpdaResult {
            observation: Some(Observation { common: common("home", "sleep") }),
            ..OrpdaResult::default()
        };
        DriftNormalizer::normalize(&mut r, &frame(Some(&slot), true));
        assert_eq!(
            r.observation.expect("obs").common.location.as_deref(),
            Some("cafe")
        );
        let a = r.action_result.expect("action");
        assert_eq!(a.common.action.as_deref(), Some("work"));
        assert_eq!(a.common.topic.as_deref(), Some("work"));
    }

    #[test]
    fn first_tick_behavioral_drift_keeps_slot_action() {
        let slot = cafe_slot();
        let mut r = OrpdaResult {
            plan: Some(Plan { common: common("market", "shop") }),
            drift_decision: Some(drifting("behavioral", 0.7, "window shopping")),
            action_result: Some(ActionResult {
                common: common("market", "shop"),
                ..ActionResult::default()
            }),
            ..OrpdaResult::default()
        };
        let t = DriftNormalizer::normalize(&mut r, &frame(Some(&slot), true));
        assert_eq!(t, DriftType::Behavioral);
        let a = r.action_result.expect("action");
        assert_eq!(a.common.location.as_deref(), Some("cafe"));
        assert_eq!(a.common.action.as_deref(), Some("work"));
        assert_eq!(a.drift_type, Some(DriftType::Behavioral));
        assert_eq!(a.drift_topic.as_deref(), Some("window shopping"));
    }

    #[test]
    fn unknown_drift_label_stays_in_slot() {
        let slot = cafe_slot();
        let mut r = OrpdaResult {
            plan: Some(Plan { common: common("beach", "surf") }),
            drift_decision: Some(drifting("daydreaming", 0.6, "waves")),
            action_result: Some(ActionResult {
                common: common("beach", "surf"),
                ..ActionResult::default()
            }),
            ..OrpdaResult::default()
        };
        let t = DriftNormalizer::normalize(&mut r, &frame(Some(&slot), false));
        assert_eq!(t, DriftType::Other("daydreaming".into()));
        let a = r.action_result.expect("action");
        assert_eq!(a.common.location.as_deref(), Some("cafe"));
        assert_eq!(a.common.action.as_deref(), Some("work"));
        assert_eq!(a.drift_topic.as_deref(), Some("waves"));
    }

    #[test]
    fn timestamps_and_next_datetime_are_authoritative() {
        let mut r = OrpdaResult {
            observation: Some(Observation {
                common: StageCommon {
                    datetime_start: Some("1999-01-01 00:00".into()),
                    duration_min: Some(90),
                    ..StageCommon::default()
                },
            }),
            ..OrpdaResult::default()
        };
        r.observation
            .as_mut()
            .expect("obs")
            .common
            .extra
            .insert("next_datetime".into(), serde_json::json!("2030-01-01 00:00"));
        DriftNormalizer::normalize(&mut r, &frame(None, false));
        let o = r.observation.expect("obs");
        assert_eq!(o.common.datetime_start.as_deref(), Some("2023-02-13 06:15"));
        assert_eq!(o.common.duration_min, Some(15));
        assert!(!o.common.extra.contains_key("next_datetime"));
        assert_eq!(
            r.action_result.expect("action").next_datetime.as_deref(),
            Some("2023-02-13 06:30")
        );
    }

    #[test]
    fn orpa_mode_ignores_stray_drift_decision() {
        let mut r = OrpdaResult {
            drift_decision: Some(drifting("behavioral", 0.9, "shops")),
            ..OrpdaResult::default()
        };
        let mut f = frame(None, false);
        f.use_drift = false;
        assert_eq!(DriftNormalizer::normalize(&mut r, &f), DriftType::None);
        assert_eq!(r.drift_decision.expect("d").should_drift, Some(false));
    }

    #[test]
    fn no_drift_takes_state_summary_from_plan() {
        let mut r = OrpdaResult {
            plan: Some(Plan {
                common: StageCommon {
                    state_summary: Some("focused on the report".into()),
                    ..StageCommon::default()
                },
            }),
            ..OrpdaResult::default()
        };
        DriftNormalizer::normalize(&mut r, &frame(None, false));
        assert_eq!(
            r.action_result.expect("a").common.state_summary.as_deref(),
            Some("focused on the report")
        );
    }
}
