//! Schedule oracle: which slot is active, and which comes next.
//!
//! A persona's day is an ordered list of [`ScheduleSlot`]s. The oracle is
//! read-only once built; a query miss (gap or exhausted day) is not an
//! error, callers simply keep the generation service's proposal.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{DriftvilleError, Result};
use crate::types::{parse_sim_time, sim_time};

/// Slot as supplied by the persona source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    /// Start time, `YYYY-MM-DD HH:MM`.
    pub datetime_start: String,
    /// Length of the slot in minutes.
    #[serde(default)]
    pub duration_min: i64,
    /// Where the agent should be.
    #[serde(default = "default_location")]
    pub location: String,
    /// What the agent should be doing.
    #[serde(default = "default_action")]
    pub action: String,
    /// Free-form notes; used as the slot topic when present.
    #[serde(default)]
    pub notes: String,
    /// Scene description handed to the generation service.
    #[serde(default)]
    pub environment_description: String,
}

fn default_location() -> String {
    "home".to_string()
}

fn default_action() -> String {
    "idle".to_string()
}

/// One interval of an agent's planned day. `end > start` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    /// Inclusive start.
    #[serde(with = "sim_time")]
    pub start: NaiveDateTime,
    /// Exclusive end.
    #[serde(with = "sim_time")]
    pub end: NaiveDateTime,
    /// Planned location.
    pub location: String,
    /// Planned action.
    pub action: String,
    /// Planned notes.
    #[serde(default)]
    pub notes: String,
    /// Scene description.
    #[serde(default)]
    pub environment_description: String,
}

impl ScheduleSlot {
    /// Build a slot from its persona-source form.
    ///
    /// # Errors
    /// Returns [`DriftvilleError::InvalidSchedule`] if the start time does
    /// not parse, or the duration is not positive or runs past the calendar.
    pub fn from_spec(agent: &str, spec: &SlotSpec) -> Result<Self> {
        let invalid = |reason: String| DriftvilleError::InvalidSchedule {
            agent: agent.to_string(),
            reason,
        };
        let start = parse_sim_time(&spec.datetime_start)
            .map_err(|e| invalid(format!("bad datetime_start '{}': {e}", spec.datetime_start)))?;
        if spec.duration_min <= 0 {
            return Err(invalid(format!(
                "slot at {} has non-positive duration {}",
                spec.datetime_start, spec.duration_min
            )));
        }
        let end = Duration::try_minutes(spec.duration_min)
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(|| {
                invalid(format!(
                    "slot at {} has out-of-range duration {}",
                    spec.datetime_start, spec.duration_min
                ))
            })?;
        Ok(Self {
            start,
            end,
            location: spec.location.clone(),
            action: spec.action.clone(),
            notes: spec.notes.clone(),
            environment_description: spec.environment_description.clone(),
        })
    }

    /// Whether `t` falls in `[start, end)`.
    #[must_use]
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }

    /// Topic implied by the slot: its notes, or the action when notes are blank.
    #[must_use]
    pub fn topic(&self) -> &str {
        if self.notes.trim().is_empty() {
            &self.action
        } else {
            &self.notes
        }
    }
}

/// Tie-break applied when several slots contain the queried time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// First matching slot in list order.
    #[default]
    FirstInListOrder,
    /// Matching slot with the latest start.
    LatestStart,
}

/// An agent's ordered day plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    slots: Vec<ScheduleSlot>,
    #[serde(default)]
    policy: OverlapPolicy,
}

impl Schedule {
    /// Build a schedule, sorting slots by start. The sort is stable, so
    /// slots sharing a start keep their supplied order.
    ///
    /// # Errors
    /// Returns [`DriftvilleError::InvalidSchedule`] if any slot has `end <= start`.
    pub fn new(agent: &str, mut slots: Vec<ScheduleSlot>, policy: OverlapPolicy) -> Result<Self> {
        if let Some(bad) = slots.iter().find(|s| s.end <= s.start) {
            return Err(DriftvilleError::InvalidSchedule {
                agent: agent.to_string(),
                reason: format!("slot '{}' ends before it starts", bad.action),
            });
        }
        slots.sort_by_key(|s| s.start);
        Ok(Self { slots, policy })
    }

    /// Build a schedule from persona-source slot specs.
    ///
    /// # Errors
    /// Propagates the first invalid slot.
    pub fn from_specs(agent: &str, specs: &[SlotSpec], policy: OverlapPolicy) -> Result<Self> {
        let slots = specs
            .iter()
            .map(|s| ScheduleSlot::from_spec(agent, s))
            .collect::<Result<Vec<_>>>()?;
        Self::new(agent, slots, policy)
    }

    /// Slot whose window contains `t`, resolved by the overlap policy.
    #[must_use]
    pub fn slot_at(&self, t: NaiveDateTime) -> Option<&ScheduleSlot> {
        let mut matches = self.slots.iter().filter(|s| s.contains(t));
        match self.policy {
            OverlapPolicy::FirstInListOrder => matches.next(),
            // max_by_key returns the last of equal maxima
            OverlapPolicy::LatestStart => matches.max_by_key(|s| s.start),
        }
    }

    /// Earliest slot starting strictly after `t`.
    #[must_use]
    pub fn next_slot(&self, t: NaiveDateTime) -> Option<&ScheduleSlot> {
        self.slots.iter().find(|s| s.start > t)
    }

    /// All slots in start order.
    #[must_use]
    pub fn slots(&self) -> &[ScheduleSlot] {
        &self.slots
    }

    /// First slot of the day.
    #[must_use]
    pub fn first(&self) -> Option<&ScheduleSlot> {
        self.slots.first()
    }

    /// Whether the schedule has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(start: &str, minutes: i64, location: &str, action: &str) -> SlotSpec {
        SlotSpec {
            datetime_start: start.to_string(),
            duration_min: minutes,
            location: location.to_string(),
            action: action.to_string(),
            notes: String::new(),
            environment_description: String::new(),
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        parse_sim_time(s).expect("time")
    }

    fn day() -> Schedule {
        Schedule::from_specs(
            "Sam",
            &[
                spec("2023-02-13 07:00", 60, "cafe", "work"),
                spec("2023-02-13 06:00", 60, "home", "breakfast"),
                spec("2023-02-13 09:00", 30, "park", "walk"),
            ],
            OverlapPolicy::default(),
        )
        .expect("schedule")
    }

    #[test]
    fn slots_are_sorted_by_start() {
        let s = day();
        let starts: Vec<_> = s.slots().iter().map(|s| s.action.as_str()).collect();
        assert_eq!(starts, ["breakfast", "work", "walk"]);
    }

    #[test]
    fn slot_at_uses_half_open_window() {
        let s = day();
        assert_eq!(s.slot_at(at("2023-02-13 06:00")).map(|s| s.action.as_str()), Some("breakfast"));
        assert_eq!(s.slot_at(at("2023-02-13 07:00")).map(|s| s.action.as_str()), Some("work"));
        assert!(s.slot_at(at("2023-02-13 08:30")).is_none(), "gap between slots");
        assert!(s.slot_at(at("2023-02-13 05:59")).is_none());
    }

    #[test]
    fn next_slot_is_strictly_after() {
        let s = day();
        assert_eq!(s.next_slot(at("2023-02-13 06:00")).map(|s| s.action.as_str()), Some("work"));
        assert_eq!(s.next_slot(at("2023-02-13 08:00")).map(|s| s.action.as_str()), Some("walk"));
        assert!(s.next_slot(at("2023-02-13 09:00")).is_none());
    }

    #[test]
    fn overlap_policy_selects_match() {
        let specs = [
            spec("2023-02-13 06:00", 120, "home", "chores"),
            spec("2023-02-13 06:30", 30, "yard", "gardening"),
        ];
        let first = Schedule::from_specs("Sam", &specs, OverlapPolicy::FirstInListOrder).expect("s");
        let latest = Schedule::from_specs("Sam", &specs, OverlapPolicy::LatestStart).expect("s");
        let t = at("2023-02-13 06:45");
        assert_eq!(first.slot_at(t).map(|s| s.action.as_str()), Some("chores"));
        assert_eq!(latest.slot_at(t).map(|s| s.action.as_str()), Some("gardening"));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = Schedule::from_specs(
            "Sam",
            &[spec("2023-02-13 06:00", 0, "home", "sleep")],
            OverlapPolicy::default(),
        )
        .expect_err("zero duration");
        assert!(matches!(err, DriftvilleError::InvalidSchedule { .. }));
    }

    #[test]
    fn out_of_range_duration_is_rejected() {
        for minutes in [i64::MAX, 10_000_000_000_000] {
            let err = ScheduleSlot::from_spec("Sam", &spec("2023-02-13 06:00", minutes, "home", "sleep"))
                .expect_err("duration past the calendar");
            assert!(matches!(err, DriftvilleError::InvalidSchedule { .. }));
        }
    }

    #[test]
    fn topic_prefers_notes() {
        let mut s = spec("2023-02-13 06:00", 15, "cafe", "work");
        let slot = ScheduleSlot::from_spec("Sam", &s).expect("slot");
        assert_eq!(slot.topic(), "work");
        s.notes = "quarterly report".into();
        let slot = ScheduleSlot::from_spec("Sam", &s).expect("slot");
        assert_eq!(slot.topic(), "quarterly report");
    }
}
