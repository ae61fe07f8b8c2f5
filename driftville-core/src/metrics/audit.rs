//! Effective-drift audit with an intensity cutoff and consistency checks.

use std::collections::BTreeMap;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::persistence::TickLogEntry;
use crate::types::{parse_sim_time, DriftType};

/// Per-type effective drift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeAudit {
    /// Effective drifts of this type.
    pub count: usize,
    /// `count / total`.
    pub share: f64,
    /// Mean intensity over rows that carried one.
    pub mean_intensity: Option<f64>,
}

/// Effective drift within one simulated hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourAudit {
    /// Rows in the hour.
    pub total: usize,
    /// Rows whose effective type is not `none`.
    pub drift: usize,
    /// `drift / total`.
    pub rate: f64,
    /// Effective type counts, `none` included.
    pub types: BTreeMap<String, usize>,
}

/// Effective drift for one action name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAudit {
    /// Rows with this action.
    pub total: usize,
    /// Effective drifts among them.
    pub drift: usize,
    /// `drift / total`.
    pub rate: f64,
}

/// Audit of one tick log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftAudit {
    /// Intensities strictly below this count as no drift.
    pub threshold: f32,
    /// Rows scanned.
    pub total: usize,
    /// Rows with effective drift.
    pub drift: usize,
    /// `drift / total`.
    pub drift_rate: f64,
    /// Keyed by drift type.
    pub by_type: BTreeMap<String, TypeAudit>,
    /// Keyed by hour of `sim_time`; rows with unparseable times are left out.
    pub by_hour: BTreeMap<u32, HourAudit>,
    /// Keyed by action, `unknown` when absent.
    pub by_action: BTreeMap<String, ActionAudit>,
    /// Consistency issue counts; only issues that occurred are present.
    pub issues: BTreeMap<String, usize>,
}

impl DriftAudit {
    /// No consistency issue was found.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// `should_drift` set while the type is `none`.
pub const ISSUE_TYPE_NONE: &str = "should_drift_true_but_type_none";
/// A drift type while `should_drift` is unset or false.
pub const ISSUE_NOT_DRIFTING: &str = "type_non_none_but_should_drift_false";
/// Non-zero intensity on a `none` type.
pub const ISSUE_NONE_WITH_INTENSITY: &str = "none_type_with_intensity";
/// A drift type without an intensity.
pub const ISSUE_NO_INTENSITY: &str = "drift_no_intensity";

#[allow(clippy::cast_precision_loss)]
fn rate(n: usize, d: usize) -> f64 {
    if d == 0 { 0.0 } else { n as f64 / d as f64 }
}

/// Audit `rows` at `threshold`.
///
/// The drift type comes from the action result, falling back to the drift
/// decision. `should_drift` and the intensity come from the drift decision.
#[must_use]
pub fn audit(rows: &[TickLogEntry], threshold: f32) -> DriftAudit {
    let mut out = DriftAudit { threshold, total: rows.len(), ..DriftAudit::default() };
    let mut intensity_sum: BTreeMap<String, (f64, usize)> = BTreeMap::new();

    for row in rows {
        let decision = row.drift_decision.as_ref();
        let act = row.action_result.as_ref();
        let kind = act
            .and_then(|a| a.drift_type.clone())
            .or_else(|| decision.and_then(|d| d.drift_type.clone()))
            .unwrap_or_default();
        let should_drift = decision.and_then(|d| d.should_drift).unwrap_or(false);
        let intensity = decision.and_then(|d| d.drift_intensity);
        let action = act
            .and_then(|a| a.common.action.clone())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let effective = match intensity {
            Some(i) if i < threshold => DriftType::None,
            _ => kind.clone(),
        };
        let drifting = effective != DriftType::None;

        let per_action = out.by_action.entry(action).or_default();
        per_action.total += 1;
        if drifting {
            out.drift += 1;
            per_action.drift += 1;
            out.by_type.entry(effective.to_string()).or_default().count += 1;
            if let Some(i) = intensity {
                let slot = intensity_sum.entry(effective.to_string()).or_default();
                slot.0 += f64::from(i);
                slot.1 += 1;
            }
        }

        let mut flag = |issue: &str| *out.issues.entry(issue.to_string()).or_default() += 1;
        if should_drift && kind == DriftType::None {
            flag(ISSUE_TYPE_NONE);
        }
        if !should_drift && kind != DriftType::None {
            flag(ISSUE_NOT_DRIFTING);
        }
        if kind == DriftType::None && intensity.is_some_and(|i| i != 0.0) {
            flag(ISSUE_NONE_WITH_INTENSITY);
        }
        if kind != DriftType::None && intensity.is_none() {
            flag(ISSUE_NO_INTENSITY);
        }

        if let Ok(t) = parse_sim_time(&row.sim_time) {
            let hour = out.by_hour.entry(t.hour()).or_default();
            hour.total += 1;
            if drifting {
                hour.drift += 1;
            }
            *hour.types.entry(effective.to_string()).or_default() += 1;
        }
    }

    out.drift_rate = rate(out.drift, out.total);
    for (kind, entry) in &mut out.by_type {
        entry.share = rate(entry.count, out.total);
        entry.mean_intensity = intensity_sum
            .get(kind)
            .filter(|(_, n)| *n > 0)
            .map(|(sum, n)| {
                #[allow(clippy::cast_precision_loss)]
                let mean = sum / *n as f64;
                mean
            });
    }
    for hour in out.by_hour.values_mut() {
        hour.rate = rate(hour.drift, hour.total);
    }
    for action in out.by_action.values_mut() {
        action.rate = rate(action.drift, action.total);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::fixtures::{orpda_run, row, Row};

    #[test]
    fn cutoff_discounts_weak_drift() {
        let a = audit(&orpda_run(), 0.5);
        assert_eq!(a.total, 4);
        // the 0.4 internal drift falls under the cutoff
        assert_eq!(a.drift, 1);
        assert!((a.drift_rate - 0.25).abs() < 1e-9);
        assert_eq!(a.by_type["behavioral"].count, 1);
        assert!(!a.by_type.contains_key("internal"));
        let mean = a.by_type["behavioral"].mean_intensity.expect("mean");
        assert!((mean - 0.8).abs() < 1e-6);
        assert_eq!(a.by_action["window shopping"].drift, 1);
        assert_eq!(a.by_action["work"].total, 3);
        assert_eq!(a.by_hour[&6].total, 4);
        assert_eq!(a.by_hour[&6].types["none"], 3);
        assert!(a.is_consistent());
    }

    #[test]
    fn zero_cutoff_counts_every_drift() {
        let a = audit(&orpda_run(), 0.0);
        assert_eq!(a.drift, 2);
    }

    #[test]
    fn inconsistent_rows_are_flagged() {
        let mut r = row(&Row { sim_time: "bad", plan_action: "work", action: "", drift: Some(("internal", 0.9, "x")), stable: true });
        if let Some(d) = r.drift_decision.as_mut() {
            d.should_drift = Some(false);
            d.drift_intensity = None;
        }
        let a = audit(&[r], 0.5);
        assert_eq!(a.issues[ISSUE_NOT_DRIFTING], 1);
        assert_eq!(a.issues[ISSUE_NO_INTENSITY], 1);
        assert!(a.by_hour.is_empty());
        assert_eq!(a.by_action["unknown"].total, 1);

        let mut r = row(&Row { sim_time: "2023-02-13 09:00", plan_action: "work", action: "work", drift: None, stable: true });
        if let Some(d) = r.drift_decision.as_mut() {
            d.should_drift = Some(true);
            d.drift_intensity = Some(0.3);
        }
        let a = audit(&[r], 0.5);
        assert_eq!(a.issues[ISSUE_TYPE_NONE], 1);
        assert_eq!(a.issues[ISSUE_NONE_WITH_INTENSITY], 1);
    }
}
