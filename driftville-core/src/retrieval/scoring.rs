//! Per-factor scoring functions for memory relevance ranking.
//!
//! Score = w₁·Importance(m) + w₂·Recency(m) + w₃·Relevance(q, m)
//!
//! Where:
//!   Importance(m) = importance / 10
//!   Recency(m)    = max(0, 1 − min(days / horizon, 1))   (linear decay)
//!   Relevance     = cosine over bag-of-words term frequencies

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::memory::MemoryEntry;

/// Importance factor in `[0.1, 1.0]`.
#[must_use]
pub fn importance_score(memory: &MemoryEntry) -> f64 {
    f64::from(memory.importance) / 10.0
}

/// Linear recency decay over `horizon_days`, using whole elapsed days.
///
/// Access times in the future count as zero days old.
#[must_use]
pub fn recency_score(last_accessed: DateTime<Utc>, now: DateTime<Utc>, horizon_days: f64) -> f64 {
    if horizon_days <= 0.0 {
        return 0.0;
    }
    let days = (now - last_accessed).num_days().max(0);
    #[allow(clippy::cast_precision_loss)]
    let days = days as f64;
    (1.0 - (days / horizon_days).min(1.0)).max(0.0)
}

/// Term-frequency vector of a lowercased, whitespace-split text.
#[must_use]
pub fn term_counts(text: &str) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for word in text.split_whitespace() {
        *counts.entry(word.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

/// Cosine similarity of two bag-of-words vectors; `0.0` if either text is empty.
#[must_use]
pub fn bag_of_words_cosine(a: &str, b: &str) -> f64 {
    let ca = term_counts(a);
    let cb = term_counts(b);
    if ca.is_empty() || cb.is_empty() {
        return 0.0;
    }
    let dot: f64 = ca
        .iter()
        .map(|(w, &n)| f64::from(n) * f64::from(cb.get(w).copied().unwrap_or(0)))
        .sum();
    let norm = |c: &BTreeMap<String, u32>| c.values().map(|&n| f64::from(n).powi(2)).sum::<f64>().sqrt();
    let denom = norm(&ca) * norm(&cb);
    if denom == 0.0 { 0.0 } else { dot / denom }
}
