//! Core type definitions shared across the Driftville crates.
//!
//! All types are serializable; string formats match the persisted logs.

use chrono::NaiveDateTime;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Simulated time
// ---------------------------------------------------------------------------

/// Format of every simulated timestamp (`sim_time`, slot starts, `datetime_start`).
pub const SIM_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a simulated timestamp such as `"2023-02-13 06:00"`.
///
/// # Errors
/// Returns the chrono parse error if `s` does not match [`SIM_TIME_FORMAT`].
pub fn parse_sim_time(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s.trim(), SIM_TIME_FORMAT)
}

/// Render a simulated timestamp in [`SIM_TIME_FORMAT`].
#[must_use]
pub fn format_sim_time(t: &NaiveDateTime) -> String {
    t.format(SIM_TIME_FORMAT).to_string()
}

/// Serde adapter for `NaiveDateTime` fields stored as `"YYYY-MM-DD HH:MM"`.
pub mod sim_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize in simulated-time format.
    ///
    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_sim_time(t))
    }

    /// Deserialize from simulated-time format.
    ///
    /// # Errors
    /// Fails if the string is not a valid simulated timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_sim_time(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Drift taxonomy
// ---------------------------------------------------------------------------

/// Kind of deviation from the planned schedule.
///
/// Unknown labels from the generation service are preserved as
/// [`DriftType::Other`] so they survive into the logs and the metrics
/// can count them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DriftType {
    /// No drift.
    #[default]
    None,
    /// Pure thought, no outward change.
    Internal,
    /// Distracted but still performing the planned action.
    AttentionalLeak,
    /// Actually doing something else.
    Behavioral,
    /// A label outside the known taxonomy.
    Other(String),
}

impl DriftType {
    /// Canonical label as written in the logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Internal => "internal",
            Self::AttentionalLeak => "attentional_leak",
            Self::Behavioral => "behavioral",
            Self::Other(s) => s,
        }
    }

    /// Drift types that leave the agent's location and action untouched.
    /// Only behavioral drift may move the agent; unknown labels may not.
    #[must_use]
    pub fn keeps_schedule(&self) -> bool {
        !matches!(self, Self::Behavioral)
    }
}

impl From<String> for DriftType {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "" | "none" | "null" => Self::None,
            "internal" => Self::Internal,
            "attentional_leak" | "attentional leak" => Self::AttentionalLeak,
            "behavioral" | "behavioural" => Self::Behavioral,
            _ => Self::Other(raw.trim().to_string()),
        }
    }
}

impl From<&str> for DriftType {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<DriftType> for String {
    fn from(t: DriftType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Embedding Vector
// ---------------------------------------------------------------------------

/// A dense vector embedding for semantic similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Dimensionality of the embedding.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }
}

// ---------------------------------------------------------------------------
// Retrieval Score
// ---------------------------------------------------------------------------

/// Composite score used to rank memories during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetrievalScore(pub OrderedFloat<f64>);

impl RetrievalScore {
    /// Create a retrieval score from a raw f64.
    #[must_use]
    pub fn new(score: f64) -> Self {
        Self(OrderedFloat(score))
    }

    /// Get the raw score value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_type_parses_known_labels() {
        assert_eq!(DriftType::from("Behavioral"), DriftType::Behavioral);
        assert_eq!(DriftType::from(" attentional_leak "), DriftType::AttentionalLeak);
        assert_eq!(DriftType::from(""), DriftType::None);
        assert_eq!(
            DriftType::from("daydreaming"),
            DriftType::Other("daydreaming".into())
        );
    }

    #[test]
    fn only_behavioral_drift_leaves_the_schedule() {
        assert!(DriftType::None.keeps_schedule());
        assert!(DriftType::Internal.keeps_schedule());
        assert!(DriftType::AttentionalLeak.keeps_schedule());
        assert!(DriftType::from("daydreaming").keeps_schedule());
        assert!(!DriftType::Behavioral.keeps_schedule());
    }

    #[test]
    fn drift_type_serializes_as_label() {
        let json = serde_json::to_string(&DriftType::AttentionalLeak).expect("serialize");
        assert_eq!(json, "\"attentional_leak\"");
        let back: DriftType = serde_json::from_str("\"internal\"").expect("deserialize");
        assert_eq!(back, DriftType::Internal);
    }

    #[test]
    fn sim_time_round_trips_through_format() {
        let t = parse_sim_time("2023-02-13 06:15").expect("parse");
        assert_eq!(format_sim_time(&t), "2023-02-13 06:15");
        assert!(parse_sim_time("06:15").is_err());
    }
}
