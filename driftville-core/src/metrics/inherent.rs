//! Post-hoc drift inference for runs without an explicit drift stage.
//!
//! Each tick contributes four texts: the plan topic, the action topic, and
//! the observation and action state summaries. A tick drifts when either
//! pair falls below the similarity threshold or the action summary picks
//! up wandering language the observation did not have.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::MetricsEngine;
use crate::embedding::{cosine_similarity, EmbeddingService};
use crate::persistence::TickLogEntry;
use crate::types::{DriftType, Embedding};

/// Inferred drift for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InherentDrift {
    /// Whether any signal fired.
    pub inherent_drift: bool,
    /// `1 − max(sim_plan_action, sim_obs_action)`.
    pub drift_score_inferred: f64,
    /// `internal`, `behavioral`, `attentional_leak` or `none`.
    pub drift_type_inferred: DriftType,
    /// Similarity of plan topic and action topic.
    pub sim_plan_action: f64,
    /// Similarity of observation and action summaries.
    pub sim_obs_action: f64,
}

impl InherentDrift {
    /// The no-signal result.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inherent_drift: false,
            drift_score_inferred: 0.0,
            drift_type_inferred: DriftType::None,
            sim_plan_action: 0.0,
            sim_obs_action: 0.0,
        }
    }
}

/// Counts of each inferred type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredTypeCounts {
    /// Marker matches.
    pub internal: usize,
    /// Summary mismatch only.
    pub attentional_leak: usize,
    /// Topic mismatch.
    pub behavioral: usize,
    /// No drift.
    pub none: usize,
}

/// Run-level inherent drift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InherentSummary {
    /// Fraction of ticks flagged.
    pub inherent_drift_rate: f64,
    /// Mean inferred score.
    pub avg_drift_score_inferred: f64,
    /// Per-type counts.
    pub drift_type_distribution: InferredTypeCounts,
}

struct TickTexts {
    plan_topic: String,
    action_topic: String,
    obs_summary: String,
    act_summary: String,
}

impl TickTexts {
    fn of(row: &TickLogEntry) -> Self {
        let text = |s: Option<&String>| s.map(|s| s.trim().to_string()).unwrap_or_default();
        let act = row.action_result.as_ref().map(|a| &a.common);
        Self {
            plan_topic: text(row.plan.as_ref().and_then(|p| p.common.topic.as_ref())),
            action_topic: text(act.and_then(|a| a.topic.as_ref())),
            obs_summary: text(row.observation.as_ref().and_then(|o| o.common.state_summary.as_ref())),
            act_summary: text(act.and_then(|a| a.state_summary.as_ref())),
        }
    }

    fn all_empty(&self) -> bool {
        [&self.plan_topic, &self.action_topic, &self.obs_summary, &self.act_summary]
            .iter()
            .all(|t| t.is_empty())
    }
}

fn pair_similarity(a: &str, b: &str, vectors: &HashMap<&str, Embedding>) -> f64 {
    if a == b {
        return 1.0;
    }
    match (vectors.get(a), vectors.get(b)) {
        (Some(va), Some(vb)) => f64::from(cosine_similarity(va, vb)).clamp(-1.0, 1.0),
        _ => 0.0,
    }
}

impl<E: EmbeddingService> MetricsEngine<E> {
    /// Infer drift for every row with one embedding call.
    ///
    /// Rows with all four texts empty, and every row when the embedding
    /// call fails, get [`InherentDrift::empty`].
    pub async fn detect_inherent(&self, rows: &[TickLogEntry]) -> Vec<InherentDrift> {
        let texts: Vec<TickTexts> = rows.iter().map(TickTexts::of).collect();

        let mut unique: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for t in &texts {
            for s in [&t.plan_topic, &t.action_topic, &t.obs_summary, &t.act_summary] {
                if !s.is_empty() && seen.insert(s.as_str()) {
                    unique.push(s.clone());
                }
            }
        }

        let Some(embedded) = self.embed_or_warn(&unique, "inherent_drift").await else {
            warn!(rows = rows.len(), "Inherent drift skipped, embeddings unavailable");
            return rows.iter().map(|_| InherentDrift::empty()).collect();
        };
        let vectors: HashMap<&str, Embedding> = unique.iter().map(String::as_str).zip(embedded).collect();
        debug!(rows = rows.len(), texts = vectors.len(), "Embedded inherent drift texts");

        texts.iter().map(|t| self.classify(t, &vectors)).collect()
    }

    fn classify(&self, t: &TickTexts, vectors: &HashMap<&str, Embedding>) -> InherentDrift {
        if t.all_empty() {
            return InherentDrift::empty();
        }
        let threshold = f64::from(self.config.similarity_threshold);
        let sim_plan_action = pair_similarity(&t.plan_topic, &t.action_topic, vectors);
        let sim_obs_action = pair_similarity(&t.obs_summary, &t.act_summary, vectors);

        let topic_drift = sim_plan_action < threshold;
        let summary_drift = sim_obs_action < threshold;
        let act = t.act_summary.to_lowercase();
        let obs = t.obs_summary.to_lowercase();
        let mental_drift = self
            .config
            .wandering_markers
            .iter()
            .map(|m| m.to_lowercase())
            .any(|m| act.contains(&m) && !obs.contains(&m));

        let inherent_drift = topic_drift || summary_drift || mental_drift;
        let drift_type_inferred = if !inherent_drift {
            DriftType::None
        } else if mental_drift {
            DriftType::Internal
        } else if topic_drift {
            DriftType::Behavioral
        } else {
            DriftType::AttentionalLeak
        };

        InherentDrift {
            inherent_drift,
            drift_score_inferred: 1.0 - sim_plan_action.max(sim_obs_action),
            drift_type_inferred,
            sim_plan_action,
            sim_obs_action,
        }
    }

    /// Rate, mean score and type counts over [`Self::detect_inherent`].
    pub async fn inherent_summary(&self, rows: &[TickLogEntry]) -> InherentSummary {
        let events = self.detect_inherent(rows).await;
        if events.is_empty() {
            return InherentSummary::default();
        }
        let mut counts = InferredTypeCounts::default();
        for e in &events {
            match e.drift_type_inferred {
                DriftType::Internal => counts.internal += 1,
                DriftType::AttentionalLeak => counts.attentional_leak += 1,
                DriftType::Behavioral => counts.behavioral += 1,
                DriftType::None | DriftType::Other(_) => counts.none += 1,
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let n = events.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let flagged = events.iter().filter(|e| e.inherent_drift).count() as f64;
        InherentSummary {
            inherent_drift_rate: flagged / n,
            avg_drift_score_inferred: events.iter().map(|e| e.drift_score_inferred).sum::<f64>() / n,
            drift_type_distribution: counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::embedding::BagOfWordsEmbedder;
    use crate::error::{DriftvilleError, Result};
    use crate::metrics::fixtures::{row, Row};

    fn engine() -> MetricsEngine<BagOfWordsEmbedder> {
        MetricsEngine::new(BagOfWordsEmbedder::new(1024), MetricsConfig::default())
    }

    fn with_summaries(plan_topic: &str, act_topic: &str, obs: &str, act: &str) -> TickLogEntry {
        let mut r = row(&Row { sim_time: "2023-02-13 06:00", plan_action: "work", action: "work", drift: None, stable: true });
        if let Some(p) = r.plan.as_mut() {
            p.common.topic = Some(plan_topic.into());
        }
        if let Some(o) = r.observation.as_mut() {
            o.common.state_summary = Some(obs.into());
        }
        if let Some(a) = r.action_result.as_mut() {
            a.common.topic = Some(act_topic.into());
            a.common.state_summary = Some(act.into());
        }
        r
    }

    #[tokio::test]
    async fn identical_texts_have_zero_score() {
        let rows = [with_summaries("report", "report", "thinking about lunch", "thinking about lunch")];
        let out = engine().detect_inherent(&rows).await;
        assert!(!out[0].inherent_drift);
        assert!(out[0].drift_score_inferred.abs() < 1e-9);
        assert_eq!(out[0].drift_type_inferred, DriftType::None);
    }

    #[tokio::test]
    async fn topic_mismatch_is_behavioral() {
        let rows = [with_summaries("quarterly report", "window shopping", "at desk", "at desk")];
        let out = engine().detect_inherent(&rows).await;
        assert!(out[0].inherent_drift);
        assert_eq!(out[0].drift_type_inferred, DriftType::Behavioral);
    }

    #[tokio::test]
    async fn summary_mismatch_only_is_attentional_leak() {
        let rows = [with_summaries("report", "report", "typing steadily", "glancing at phone")];
        let out = engine().detect_inherent(&rows).await;
        assert_eq!(out[0].drift_type_inferred, DriftType::AttentionalLeak);
    }

    #[tokio::test]
    async fn new_wandering_language_is_internal() {
        let rows = [with_summaries("report", "report", "typing the report", "typing the report, daydreaming")];
        let out = engine().detect_inherent(&rows).await;
        assert!(out[0].inherent_drift);
        assert_eq!(out[0].drift_type_inferred, DriftType::Internal);
    }

    #[tokio::test]
    async fn blank_row_is_empty_result() {
        let rows = [with_summaries("", "", "", "")];
        assert_eq!(engine().detect_inherent(&rows).await[0], InherentDrift::empty());
    }

    struct Broken;

    impl EmbeddingService for Broken {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Embedding>> {
            Err(DriftvilleError::Embedding("offline".into()))
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_empty() {
        let engine = MetricsEngine::new(Broken, MetricsConfig::default());
        let rows = [with_summaries("report", "shopping", "a", "b")];
        assert_eq!(engine.detect_inherent(&rows).await, vec![InherentDrift::empty()]);
    }

    #[tokio::test]
    async fn summary_counts_types() {
        let rows = [
            with_summaries("report", "report", "typing", "typing"),
            with_summaries("quarterly report", "window shopping", "at desk", "at desk"),
        ];
        let s = engine().inherent_summary(&rows).await;
        assert!((s.inherent_drift_rate - 0.5).abs() < 1e-9);
        assert_eq!(s.drift_type_distribution.behavioral, 1);
        assert_eq!(s.drift_type_distribution.none, 1);
    }
}
