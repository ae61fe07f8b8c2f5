//! Offline drift and behaviour metrics over completed tick logs.
//!
//! [`MetricsEngine`] compares a run with drift enabled against one with
//! drift disabled. Explicit statistics read the logged drift decisions;
//! embedding-based statistics and inherent-drift detection go through an
//! [`EmbeddingService`]. An embedding failure degrades the affected metric
//! to `0.0` with a warning, it never aborts the report.

pub mod audit;
pub mod inherent;
pub mod report;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MetricsConfig;
use crate::embedding::{cosine_similarity, EmbeddingService};
use crate::persistence::TickLogEntry;
use crate::stage::DriftDecision;
use crate::types::{parse_sim_time, DriftType};

pub use audit::{audit, DriftAudit};
pub use inherent::{InherentDrift, InherentSummary};
pub use report::{AblationReport, MetricRow};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Share of each drift type among drifting ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDistribution {
    /// Internal drifts.
    pub internal: f64,
    /// Attentional leaks.
    pub attentional_leak: f64,
    /// Behavioral drifts.
    pub behavioral: f64,
    /// Anything else, including `none` on a drifting tick.
    pub other: f64,
}

/// Statistics that need nothing but the log itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplicitStats {
    /// Ticks in the run.
    pub n_ticks: usize,
    /// Inferred step length.
    pub minutes_per_tick: f64,
    /// Fraction of ticks with `should_drift`.
    pub drift_rate: f64,
    /// Fraction of simulated time spent drifting.
    pub drift_time_fraction: f64,
    /// `drift_rate × mean intensity`.
    pub intensity_weighted_drift_fraction: f64,
    /// Mean intensity of drifting ticks.
    pub avg_drift_intensity: f64,
    /// Drift events per simulated hour.
    pub drifts_per_hour: f64,
    /// Drift events extrapolated to a waking day.
    pub drifts_per_day: f64,
    /// Drift type shares.
    pub drift_types: TypeDistribution,
    /// Consecutive action changes.
    pub task_switches: usize,
    /// Fraction of ticks whose action matches the plan.
    pub plan_adherence: f64,
    /// Fraction of ticks reflected as `stable`.
    pub attention_stability: f64,
    /// Distinct actions taken.
    pub action_diversity: usize,
}

/// Statistics computed from embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticStats {
    /// Mean cosine similarity of consecutive drift topics.
    pub drift_topic_coherence: f64,
    /// Mean cosine similarity of consecutive justifications.
    pub justification_consistency: f64,
    /// Mean `1 − cos(plan.topic, drift_topic)` on drifting ticks.
    pub semantic_plan_deviation: f64,
}

fn drifting(rows: &[TickLogEntry]) -> impl Iterator<Item = (&TickLogEntry, &DriftDecision)> {
    rows.iter().filter_map(|r| {
        r.drift_decision
            .as_ref()
            .filter(|d| d.should_drift == Some(true))
            .map(|d| (r, d))
    })
}

fn ratio(n: usize, d: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let r = n as f64 / d.max(1) as f64;
    r
}

fn non_empty(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Rows grouped by agent in order of first appearance, each group in log order.
fn per_agent(rows: &[TickLogEntry]) -> Vec<Vec<&TickLogEntry>> {
    let mut groups: Vec<Vec<&TickLogEntry>> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|g| g[0].agent_name == row.agent_name) {
            Some(group) => group.push(row),
            None => groups.push(vec![row]),
        }
    }
    groups
}

fn action_of(row: &TickLogEntry) -> Option<&String> {
    row.action_result.as_ref().and_then(|a| a.common.action.as_ref())
}

/// Minutes between the first agent's first two parseable `sim_time`s, else `default`.
#[must_use]
pub fn infer_step_minutes(rows: &[TickLogEntry], default: f64) -> f64 {
    let Some(a) = rows.first() else {
        return default;
    };
    let Some(b) = rows.iter().skip(1).find(|r| r.agent_name == a.agent_name) else {
        return default;
    };
    match (parse_sim_time(&a.sim_time), parse_sim_time(&b.sim_time)) {
        (Ok(t0), Ok(t1)) => {
            #[allow(clippy::cast_precision_loss)]
            let minutes = (t1 - t0).num_seconds() as f64 / 60.0;
            if minutes > 0.0 { minutes } else { default }
        }
        _ => default,
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Computes run statistics, inherent drift and ablation reports.
pub struct MetricsEngine<E> {
    embedder: E,
    config: MetricsConfig,
}

impl<E: EmbeddingService> MetricsEngine<E> {
    /// Create an engine.
    #[must_use]
    pub fn new(embedder: E, config: MetricsConfig) -> Self {
        Self { embedder, config }
    }

    /// Thresholds in use.
    #[must_use]
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Statistics read straight from the logged drift decisions.
    #[must_use]
    pub fn explicit_stats(&self, rows: &[TickLogEntry]) -> ExplicitStats {
        let n = rows.len();
        let step = infer_step_minutes(rows, self.config.default_step_minutes);
        let drift: Vec<_> = drifting(rows).collect();
        let n_drift = drift.len();
        let drift_rate = ratio(n_drift, n);

        let intensities: Vec<f64> = drift
            .iter()
            .map(|(_, d)| f64::from(d.drift_intensity.unwrap_or(0.0)))
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let avg_intensity = if intensities.is_empty() {
            0.0
        } else {
            intensities.iter().sum::<f64>() / intensities.len() as f64
        };

        #[allow(clippy::cast_precision_loss)]
        let total_minutes = n as f64 * step;
        #[allow(clippy::cast_precision_loss)]
        let drift_time_fraction = n_drift as f64 * step / total_minutes.max(1.0);
        let total_hours = total_minutes / 60.0;
        #[allow(clippy::cast_precision_loss)]
        let drifts_per_hour = if n == 0 { 0.0 } else { n_drift as f64 / total_hours.max(1e-6) };

        let mut counts = [0_usize; 4];
        for (_, d) in &drift {
            let idx = match d.kind() {
                DriftType::Internal => 0,
                DriftType::AttentionalLeak => 1,
                DriftType::Behavioral => 2,
                DriftType::None | DriftType::Other(_) => 3,
            };
            counts[idx] += 1;
        }
        let total_types = counts.iter().sum();
        let drift_types = TypeDistribution {
            internal: ratio(counts[0], total_types),
            attentional_leak: ratio(counts[1], total_types),
            behavioral: ratio(counts[2], total_types),
            other: ratio(counts[3], total_types),
        };

        let actions: Vec<Option<&String>> = rows.iter().map(action_of).collect();
        let task_switches: usize = per_agent(rows)
            .iter()
            .map(|group| {
                group
                    .windows(2)
                    .filter(|w| matches!((action_of(w[0]), action_of(w[1])), (Some(a), Some(b)) if a != b))
                    .count()
            })
            .sum();
        let adherent = rows
            .iter()
            .filter(|r| {
                let plan = r.plan.as_ref().and_then(|p| p.common.action.as_ref());
                let act = r.action_result.as_ref().and_then(|a| a.common.action.as_ref());
                matches!((plan, act), (Some(p), Some(a)) if !p.is_empty() && p == a)
            })
            .count();
        let stable = rows
            .iter()
            .filter(|r| {
                r.reflection
                    .as_ref()
                    .and_then(|x| x.attention_stability.as_deref())
                    == Some("stable")
            })
            .count();
        let diversity: HashSet<&String> = actions.iter().flatten().filter(|a| !a.is_empty()).copied().collect();

        ExplicitStats {
            n_ticks: n,
            minutes_per_tick: step,
            drift_rate,
            drift_time_fraction,
            intensity_weighted_drift_fraction: if n_drift == 0 { 0.0 } else { avg_intensity * drift_rate },
            avg_drift_intensity: avg_intensity,
            drifts_per_hour,
            drifts_per_day: drifts_per_hour * self.config.waking_hours,
            drift_types,
            task_switches,
            plan_adherence: ratio(adherent, n),
            attention_stability: ratio(stable, n),
            action_diversity: diversity.len(),
        }
    }

    /// Coherence, consistency and plan deviation of explicit drifts.
    pub async fn semantic_stats(&self, rows: &[TickLogEntry]) -> SemanticStats {
        let topics: Vec<String> = drifting(rows).filter_map(|(_, d)| non_empty(d.drift_topic.as_ref())).collect();
        let justifications: Vec<String> =
            drifting(rows).filter_map(|(_, d)| non_empty(d.justification.as_ref())).collect();

        let pairs: Vec<String> = drifting(rows)
            .filter_map(|(r, d)| {
                let plan = non_empty(r.plan.as_ref().and_then(|p| p.common.topic.as_ref()))?;
                let topic = non_empty(d.drift_topic.as_ref())?;
                Some([plan, topic])
            })
            .flatten()
            .collect();

        let deviation = match self.embed_or_warn(&pairs, "semantic_plan_deviation").await {
            Some(v) if !v.is_empty() => {
                let devs: Vec<f64> = v
                    .chunks_exact(2)
                    .map(|p| 1.0 - f64::from(cosine_similarity(&p[0], &p[1])))
                    .collect();
                mean(&devs)
            }
            _ => 0.0,
        };

        SemanticStats {
            drift_topic_coherence: self.consecutive_similarity(&topics, "drift_topic_coherence").await,
            justification_consistency: self
                .consecutive_similarity(&justifications, "justification_consistency")
                .await,
            semantic_plan_deviation: deviation,
        }
    }

    async fn consecutive_similarity(&self, texts: &[String], metric: &str) -> f64 {
        if texts.len() < 2 {
            return 0.0;
        }
        let Some(vectors) = self.embed_or_warn(texts, metric).await else {
            return 0.0;
        };
        let sims: Vec<f64> = vectors
            .windows(2)
            .map(|w| f64::from(cosine_similarity(&w[0], &w[1])))
            .collect();
        mean(&sims)
    }

    async fn embed_or_warn(&self, texts: &[String], metric: &str) -> Option<Vec<crate::types::Embedding>> {
        if texts.is_empty() {
            return Some(Vec::new());
        }
        match self.embedder.embed(texts).await {
            Ok(v) if v.len() == texts.len() => Some(v),
            Ok(v) => {
                warn!(metric, expected = texts.len(), got = v.len(), "Embedding batch size mismatch");
                None
            }
            Err(e) => {
                warn!(metric, error = %e, model = self.embedder.model_name(), "Embedding failed");
                None
            }
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let n = values.len() as f64;
        values.iter().sum::<f64>() / n
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;

    use crate::persistence::TickLogEntry;
    use crate::stage::{ActionResult, DriftDecision, Observation, Plan, Reflection, StageCommon};
    use crate::types::DriftType;

    /// A tick row with the fields the metrics read.
    pub struct Row<'a> {
        pub sim_time: &'a str,
        pub plan_action: &'a str,
        pub action: &'a str,
        pub drift: Option<(&'a str, f32, &'a str)>,
        pub stable: bool,
    }

    pub fn row(r: &Row<'_>) -> TickLogEntry {
        let decision = match r.drift {
            Some((kind, intensity, topic)) => DriftDecision {
                should_drift: Some(true),
                drift_type: Some(DriftType::from(kind)),
                drift_topic: Some(topic.into()),
                drift_intensity: Some(intensity),
                justification: Some(format!("pulled toward {topic}")),
                ..DriftDecision::default()
            },
            None => DriftDecision {
                should_drift: Some(false),
                drift_type: Some(DriftType::None),
                drift_topic: Some(String::new()),
                drift_intensity: Some(0.0),
                ..DriftDecision::default()
            },
        };
        let common = |action: &str| StageCommon {
            action: Some(action.into()),
            topic: Some(action.into()),
            state_summary: Some(format!("busy with {action}")),
            ..StageCommon::default()
        };
        TickLogEntry {
            ts_created: Utc::now(),
            tick_index: 0,
            sim_time: r.sim_time.into(),
            agent_name: "Sam".into(),
            use_drift: true,
            observation: Some(Observation { common: common(r.plan_action) }),
            reflection: Some(Reflection {
                attention_stability: Some(if r.stable { "stable" } else { "unstable" }.into()),
                ..Reflection::default()
            }),
            plan: Some(Plan { common: common(r.plan_action) }),
            action_result: Some(ActionResult {
                drift_type: decision.drift_type.clone(),
                common: common(r.action),
                ..ActionResult::default()
            }),
            drift_decision: Some(decision),
        }
    }

    pub fn orpda_run() -> Vec<TickLogEntry> {
        [
            Row { sim_time: "2023-02-13 06:00", plan_action: "work", action: "work", drift: None, stable: true },
            Row { sim_time: "2023-02-13 06:15", plan_action: "work", action: "work", drift: Some(("internal", 0.4, "weekend trip")), stable: false },
            Row { sim_time: "2023-02-13 06:30", plan_action: "work", action: "window shopping", drift: Some(("behavioral", 0.8, "window shopping")), stable: false },
            Row { sim_time: "2023-02-13 06:45", plan_action: "work", action: "work", drift: None, stable: true },
        ]
        .iter()
        .map(row)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::orpda_run;
    use super::*;
    use crate::embedding::BagOfWordsEmbedder;

    fn engine() -> MetricsEngine<BagOfWordsEmbedder> {
        MetricsEngine::new(BagOfWordsEmbedder::new(1024), MetricsConfig::default())
    }

    #[test]
    fn explicit_stats_over_small_run() {
        let s = engine().explicit_stats(&orpda_run());
        assert_eq!(s.n_ticks, 4);
        assert!((s.minutes_per_tick - 15.0).abs() < 1e-9);
        assert!((s.drift_rate - 0.5).abs() < 1e-9);
        assert!((s.drift_time_fraction - 0.5).abs() < 1e-9);
        assert!((s.avg_drift_intensity - 0.6).abs() < 1e-6);
        assert!((s.intensity_weighted_drift_fraction - 0.3).abs() < 1e-6);
        // 2 drifts in one simulated hour
        assert!((s.drifts_per_hour - 2.0).abs() < 1e-9);
        assert!((s.drifts_per_day - 32.0).abs() < 1e-9);
        assert!((s.drift_types.internal - 0.5).abs() < 1e-9);
        assert!((s.drift_types.behavioral - 0.5).abs() < 1e-9);
        assert_eq!(s.task_switches, 2);
        assert!((s.plan_adherence - 0.75).abs() < 1e-9);
        assert!((s.attention_stability - 0.5).abs() < 1e-9);
        assert_eq!(s.action_diversity, 2);
    }

    #[test]
    fn empty_run_is_all_zero() {
        let s = engine().explicit_stats(&[]);
        assert_eq!(s.n_ticks, 0);
        assert_eq!(s.drift_rate, 0.0);
        assert_eq!(s.drifts_per_hour, 0.0);
        assert!((s.minutes_per_tick - 15.0).abs() < 1e-9);
    }

    #[test]
    fn step_inference_falls_back_on_bad_times() {
        let mut rows = orpda_run();
        rows[1].sim_time = "not a time".into();
        assert!((infer_step_minutes(&rows, 15.0) - 15.0).abs() < 1e-9);
        rows[1].sim_time = "2023-02-13 06:30".into();
        assert!((infer_step_minutes(&rows, 15.0) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn interleaved_agents_are_measured_separately() {
        // Sam and Lily each hold one action for the whole run, logged tick by tick.
        let run = orpda_run();
        let mut rows = Vec::new();
        for (i, base) in run.iter().take(2).enumerate() {
            for (agent, action) in [("Sam", "work"), ("Lily", "paint")] {
                let mut row = base.clone();
                row.tick_index = u32::try_from(i).expect("tick");
                row.agent_name = agent.into();
                if let Some(a) = row.action_result.as_mut() {
                    a.common.action = Some(action.into());
                }
                rows.push(row);
            }
        }
        assert!((infer_step_minutes(&rows, 60.0) - 15.0).abs() < 1e-9);
        let s = engine().explicit_stats(&rows);
        assert_eq!(s.task_switches, 0);
        assert_eq!(s.action_diversity, 2);
    }

    #[tokio::test]
    async fn semantic_stats_with_bag_of_words() {
        let s = engine().semantic_stats(&orpda_run()).await;
        // "weekend trip" and "window shopping" share no terms
        assert!(s.drift_topic_coherence.abs() < 1e-6);
        // "work" vs each drift topic is orthogonal
        assert!((s.semantic_plan_deviation - 1.0).abs() < 1e-6);
        // both justifications share "pulled toward"
        assert!(s.justification_consistency > 0.0);
    }
}
