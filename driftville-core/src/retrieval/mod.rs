//! Memory retrieval: weighted ranking of an agent's memories for a context.
//!
//! The ranker is a pure function over a slice of memories. It never
//! mutates `ts_last_accessed`; access bookkeeping belongs to the caller.

pub mod scoring;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;

use crate::config::RetrievalConfig;
use crate::memory::MemoryEntry;
use crate::types::RetrievalScore;

/// A scored retrieval result borrowing the ranked memory.
#[derive(Debug, Clone)]
pub struct RankedMemory<'a> {
    /// The retrieved memory.
    pub memory: &'a MemoryEntry,
    /// Position in the input slice.
    pub index: usize,
    /// Combined weighted score.
    pub score: RetrievalScore,
    /// Per-factor breakdown, unweighted.
    pub breakdown: ScoreBreakdown,
}

/// Breakdown of a retrieval score into its component factors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    /// `importance / 10`.
    pub importance: f64,
    /// Linear recency.
    pub recency: f64,
    /// Bag-of-words cosine against the query.
    pub relevance: f64,
}

/// Ranks memories by importance, recency and lexical relevance.
#[derive(Debug, Clone)]
pub struct RelevanceRanker {
    config: RetrievalConfig,
}

impl Default for RelevanceRanker {
    fn default() -> Self {
        Self::new(RetrievalConfig::default())
    }
}

impl RelevanceRanker {
    /// Create a ranker with the given weights.
    #[must_use]
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Query string for a conversation: listener name plus context, lowercased.
    #[must_use]
    pub fn query(listener: Option<&str>, context: Option<&str>) -> String {
        [listener, context]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Weighted score of a breakdown.
    #[must_use]
    pub fn combine(&self, b: &ScoreBreakdown) -> f64 {
        self.config.importance_weight * b.importance
            + self.config.recency_weight * b.recency
            + self.config.relevance_weight * b.relevance
    }

    /// Unweighted factors for one memory.
    #[must_use]
    pub fn breakdown(&self, memory: &MemoryEntry, query: &str, now: DateTime<Utc>) -> ScoreBreakdown {
        ScoreBreakdown {
            importance: scoring::importance_score(memory),
            recency: scoring::recency_score(memory.ts_last_accessed, now, self.config.recency_horizon_days),
            relevance: scoring::bag_of_words_cosine(query, &memory.text.to_lowercase()),
        }
    }

    /// Top-`k` memories by score, descending. Ties keep input order.
    #[must_use]
    pub fn select<'a>(
        &self,
        memories: &'a [MemoryEntry],
        query: &str,
        k: usize,
        now: DateTime<Utc>,
    ) -> Vec<RankedMemory<'a>> {
        let mut ranked: Vec<RankedMemory<'a>> = memories
            .iter()
            .enumerate()
            .map(|(index, memory)| {
                let breakdown = self.breakdown(memory, query, now);
                RankedMemory {
                    memory,
                    index,
                    score: RetrievalScore::new(self.combine(&breakdown)),
                    breakdown,
                }
            })
            .collect();

        // sort_by_key is stable, so equal scores stay in input order
        ranked.sort_by_key(|r| Reverse(OrderedFloat(r.score.value())));
        ranked.truncate(k);
        ranked
    }
}
