//! Side-by-side comparison of a drift-enabled and a drift-disabled run.

use std::fs;
use std::path::Path;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::info;

use super::{ExplicitStats, MetricsEngine, SemanticStats};
use crate::embedding::EmbeddingService;
use crate::error::Result;
use crate::persistence::{read_jsonl, TickLogEntry};

/// One metric of the comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    /// Human-readable definition.
    pub definition: String,
    /// Value for the drift-enabled run.
    pub with_drift: Value,
    /// Value for the drift-disabled run.
    pub no_drift: Value,
}

/// Ordered metric table, serialised as a JSON object keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AblationReport {
    rows: Vec<(String, MetricRow)>,
}

impl AblationReport {
    /// Append a metric.
    pub fn push(&mut self, name: &str, definition: &str, with_drift: impl Into<Value>, no_drift: impl Into<Value>) {
        self.rows.push((
            name.to_string(),
            MetricRow {
                definition: definition.to_string(),
                with_drift: with_drift.into(),
                no_drift: no_drift.into(),
            },
        ));
    }

    /// Look a metric up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricRow> {
        self.rows.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Metric names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|(n, _)| n.as_str())
    }

    /// Write as indented JSON, creating parent directories.
    ///
    /// # Errors
    /// Returns an I/O or serialization error.
    pub fn write_pretty(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), metrics = self.rows.len(), "Ablation report written");
        Ok(())
    }
}

impl Serialize for AblationReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rows.len()))?;
        for (name, row) in &self.rows {
            map.serialize_entry(name, row)?;
        }
        map.end()
    }
}

impl<E: EmbeddingService> MetricsEngine<E> {
    /// Compare two runs over every metric.
    pub async fn ablation(&self, with_drift: &[TickLogEntry], no_drift: &[TickLogEntry]) -> AblationReport {
        let (w, n) = (self.explicit_stats(with_drift), self.explicit_stats(no_drift));
        let (ws, ns) = (self.semantic_stats(with_drift).await, self.semantic_stats(no_drift).await);
        let (wi, ni) = (self.inherent_summary(with_drift).await, self.inherent_summary(no_drift).await);

        let mut report = AblationReport::default();
        let f = |pick: fn(&ExplicitStats) -> f64| (pick(&w), pick(&n));

        let (a, b) = f(|s| s.drift_rate);
        report.push("drift_rate", "Proportion of ticks where the agent decides to drift.", a, b);
        let (a, b) = f(|s| s.drift_time_fraction);
        report.push("drift_time_fraction", "Fraction of simulated time spent in drift (unweighted).", a, b);
        let (a, b) = f(|s| s.intensity_weighted_drift_fraction);
        report.push(
            "intensity_weighted_drift_fraction",
            "Estimated mental time in drift: drift_rate × mean drift_intensity.",
            a,
            b,
        );
        let (a, b) = f(|s| s.drifts_per_hour);
        report.push("drifts_per_hour", "Average number of drift events per simulated hour.", a, b);
        let (a, b) = f(|s| s.drifts_per_day);
        report.push("drifts_per_16h_day", "Extrapolated drift count over a 16-hour waking day.", a, b);
        let (a, b) = f(|s| s.drift_types.internal);
        report.push(
            "drift_type_internal_ratio",
            "Share of drift events classified as internal (thought/rumination).",
            a,
            b,
        );
        let (a, b) = f(|s| s.drift_types.attentional_leak);
        report.push(
            "drift_type_attentional_leak_ratio",
            "Share of drift events classified as attentional leaks (environment, notifications, etc.).",
            a,
            b,
        );
        let (a, b) = f(|s| s.drift_types.behavioral);
        report.push(
            "drift_type_behavioral_ratio",
            "Share of drift events classified as behavioral (changing physical task/behavior).",
            a,
            b,
        );
        let (a, b) = f(|s| s.attention_stability);
        report.push(
            "attention_stability_ratio",
            "Proportion of ticks labeled as 'stable' in reflection.attention_stability.",
            a,
            b,
        );

        let g = |pick: fn(&SemanticStats) -> f64| (pick(&ws), pick(&ns));
        let (a, b) = g(|s| s.drift_topic_coherence);
        report.push(
            "drift_topic_coherence",
            "Average cosine similarity between consecutive drift topics (1 = highly coherent, 0 = orthogonal).",
            a,
            b,
        );
        let (a, b) = g(|s| s.justification_consistency);
        report.push(
            "justification_consistency",
            "Average cosine similarity between consecutive drift justifications.",
            a,
            b,
        );
        let (a, b) = g(|s| s.semantic_plan_deviation);
        report.push(
            "semantic_plan_deviation",
            "Average semantic distance (1 - cosine similarity) between plan.topic and drift_topic on drift ticks.",
            a,
            b,
        );

        report.push(
            "task_switch_cost",
            "Number of times the agent changes its action between ticks.",
            w.task_switches,
            n.task_switches,
        );
        let (a, b) = f(|s| s.plan_adherence);
        report.push("plan_adherence", "Fraction of ticks where executed action matches planned action.", a, b);
        report.push(
            "action_diversity",
            "Number of unique actions taken during the run.",
            w.action_diversity,
            n.action_diversity,
        );
        report.push(
            "inherent_drift_rate",
            "Fraction of ticks flagged by embedding-based drift inference.",
            wi.inherent_drift_rate,
            ni.inherent_drift_rate,
        );
        report.push(
            "avg_drift_score_inferred",
            "Mean inferred drift score: 1 - max(sim(plan, action topic), sim(observation, action summary)).",
            wi.avg_drift_score_inferred,
            ni.avg_drift_score_inferred,
        );
        report.push("n_ticks", "Total number of ticks in the session.", w.n_ticks, n.n_ticks);
        report.push(
            "minutes_per_tick",
            "Inferred minutes per simulation tick.",
            w.minutes_per_tick,
            n.minutes_per_tick,
        );
        report
    }

    /// Load two tick logs and compare them.
    ///
    /// # Errors
    /// Returns an I/O error if either file exists but cannot be read.
    pub async fn ablation_from_files(&self, with_drift: &Path, no_drift: &Path) -> Result<AblationReport> {
        let w: Vec<TickLogEntry> = read_jsonl(with_drift)?;
        let n: Vec<TickLogEntry> = read_jsonl(no_drift)?;
        info!(with_drift = w.len(), no_drift = n.len(), "Loaded runs for ablation");
        Ok(self.ablation(&w, &n).await)
    }
}
