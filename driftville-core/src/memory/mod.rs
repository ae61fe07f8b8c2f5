//! Agent memory: the [`MemoryEntry`] record and the append-only [`MemoryStore`].
//!
//! Importance is assigned once when an entry is created and is never
//! recomputed. Entries are never removed or reordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One remembered fact: a conversation summary or a tick observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// When the entry was created.
    pub ts_created: DateTime<Utc>,
    /// When the entry was last read; drives recency.
    pub ts_last_accessed: DateTime<Utc>,
    /// Importance in `1..=10`.
    pub importance: u8,
    /// Agents involved.
    pub participants: Vec<String>,
    /// Natural-language description.
    pub text: String,
}

impl MemoryEntry {
    /// Create an entry stamped at `now`. Importance is clamped to `1..=10`.
    #[must_use]
    pub fn new(text: impl Into<String>, participants: Vec<String>, importance: u8, now: DateTime<Utc>) -> Self {
        Self {
            ts_created: now,
            ts_last_accessed: now,
            importance: importance.clamp(1, 10),
            participants,
            text: text.into(),
        }
    }
}

/// Append-only memory log for one agent, indexed by participant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
    #[serde(skip)]
    by_participant: HashMap<String, Vec<usize>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and index its participants.
    pub fn append(&mut self, entry: MemoryEntry) {
        let idx = self.entries.len();
        for p in &entry.participants {
            let slot = self.by_participant.entry(p.clone()).or_default();
            if slot.last() != Some(&idx) {
                slot.push(idx);
            }
        }
        self.entries.push(entry);
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    /// The last `n` entries, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> &[MemoryEntry] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    /// Entries naming `participant`, in insertion order.
    pub fn involving<'a>(&'a self, participant: &str) -> impl Iterator<Item = &'a MemoryEntry> + 'a {
        self.by_participant
            .get(participant)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.entries.get(i))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the participant index, e.g. after deserialization.
    pub fn reindex(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        self.by_participant.clear();
        for e in entries {
            self.append(e);
        }
    }
}

impl FromIterator<MemoryEntry> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = MemoryEntry>>(iter: I) -> Self {
        let mut store = Self::new();
        for e in iter {
            store.append(e);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, who: &[&str]) -> MemoryEntry {
        MemoryEntry::new(text, who.iter().map(|s| (*s).to_string()).collect(), 5, Utc::now())
    }

    #[test]
    fn importance_is_clamped() {
        assert_eq!(MemoryEntry::new("x", vec![], 0, Utc::now()).importance, 1);
        assert_eq!(MemoryEntry::new("x", vec![], 42, Utc::now()).importance, 10);
    }

    #[test]
    fn participant_index_follows_appends() {
        let mut store = MemoryStore::new();
        store.append(entry("coffee with Lily", &["Sam", "Lily"]));
        store.append(entry("walked alone", &["Sam"]));
        store.append(entry("Lily at the park", &["Lily", "Jaelin"]));

        let lily: Vec<_> = store.involving("Lily").map(|e| e.text.as_str()).collect();
        assert_eq!(lily, ["coffee with Lily", "Lily at the park"]);
        assert_eq!(store.involving("Nobody").count(), 0);
        assert_eq!(store.recent(2).len(), 2);
        assert_eq!(store.recent(10).len(), 3);
    }

    #[test]
    fn reindex_restores_lookup_after_deserialize() {
        let store: MemoryStore = [entry("a", &["Sam"])].into_iter().collect();
        let json = serde_json::to_string(&store).expect("serialize");
        let mut back: MemoryStore = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.involving("Sam").count(), 0);
        back.reindex();
        assert_eq!(back.involving("Sam").count(), 1);
    }
}
