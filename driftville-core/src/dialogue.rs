//! Conversation records and the pure helpers the conversation engine uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One line of dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who spoke.
    pub speaker: String,
    /// What they said, cleaned of labels and wrapping.
    pub text: String,
}

/// A completed conversation as written to the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueEvent {
    /// When the conversation was stored.
    pub timestamp: DateTime<Utc>,
    /// What the conversation was about (the initiator's slot action).
    pub context: String,
    /// Both participants, initiator first.
    pub participants: Vec<String>,
    /// Turns in order.
    pub dialogue: Vec<ConversationTurn>,
    /// Importance of the summary, `None` if scoring failed.
    pub importance: Option<u8>,
}

impl DialogueEvent {
    /// Whether every name in `names` took part.
    #[must_use]
    pub fn involves_all(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.participants.iter().any(|p| p.as_str() == *n))
    }

    /// Turns joined into one line, used as the summary fallback.
    #[must_use]
    pub fn transcript(&self) -> String {
        join_turns(&self.dialogue)
    }
}

/// Space-joined text of every turn.
#[must_use]
pub fn join_turns(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| t.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dedupe key: context plus the ordered (speaker, text) pairs.
pub type DialogueKey = (String, Vec<(String, String)>);

/// Set of dialogues already stored.
#[derive(Debug, Clone, Default)]
pub struct DialogueLedger {
    seen: HashSet<DialogueKey>,
}

impl DialogueLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dialogue; returns `false` if it was already recorded.
    pub fn insert(&mut self, context: &str, turns: &[ConversationTurn]) -> bool {
        let key = (
            context.to_string(),
            turns.iter().map(|t| (t.speaker.clone(), t.text.clone())).collect(),
        );
        self.seen.insert(key)
    }

    /// Number of distinct dialogues recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Reduce a raw generated reply to a single spoken line.
///
/// Keeps the first non-empty line, drops markdown emphasis and a short
/// leading `Speaker:` label, then unwraps surrounding quotes.
#[must_use]
pub fn clean_line(raw: &str) -> Option<String> {
    let first = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))?;
    let mut line: String = first
        .trim_start_matches(['>', '-', '#'])
        .replace("**", "")
        .replace('*', "")
        .trim()
        .to_string();

    if let Some((label, rest)) = line.split_once(':') {
        if !label.is_empty() && label.split_whitespace().count() <= 3 {
            line = rest.trim().to_string();
        }
    }

    let quotes: &[char] = &['"', '\'', '“', '”'];
    let unquoted = line.trim_matches(quotes).trim().to_string();
    if unquoted.is_empty() { None } else { Some(unquoted) }
}

/// Interpret a yes/no reply.
#[must_use]
pub fn is_affirmative(raw: &str) -> bool {
    raw.trim()
        .trim_start_matches(['"', '\'', '*'])
        .to_lowercase()
        .starts_with('y')
}

/// First integer in `raw`, clamped to `1..=10`. `None` if there is no integer.
#[must_use]
pub fn parse_importance(raw: &str) -> Option<u8> {
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return None;
    }
    // Digit runs too long for u64 are still "above 10".
    let value: u64 = digits.parse().unwrap_or(u64::MAX);
    let clamped = value.clamp(1, 10);
    u8::try_from(clamped).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, text: &str) -> ConversationTurn {
        ConversationTurn { speaker: speaker.into(), text: text.into() }
    }

    #[test]
    fn clean_line_strips_label_and_quotes() {
        assert_eq!(clean_line("Sam: \"Morning, Lily!\"").as_deref(), Some("Morning, Lily!"));
        assert_eq!(clean_line("**Sam**: hi\nLily: hello").as_deref(), Some("hi"));
        assert_eq!(clean_line("\n\n   \n"), None);
    }

    #[test]
    fn clean_line_keeps_long_prefix_with_colon() {
        let line = "I told you this before and here it is: coffee first";
        assert_eq!(clean_line(line).as_deref(), Some(line));
    }

    #[test]
    fn importance_takes_first_integer() {
        assert_eq!(parse_importance("7"), Some(7));
        assert_eq!(parse_importance("I'd rate it 8/10"), Some(8));
        assert_eq!(parse_importance("42"), Some(10));
        assert_eq!(parse_importance("0"), Some(1));
        assert_eq!(parse_importance("mundane"), None);
    }

    #[test]
    fn importance_overflow_clamps_to_ten() {
        assert_eq!(parse_importance("99999999999999999999999"), Some(10));
        assert_eq!(parse_importance("score: 000000000000000000000003"), Some(3));
    }

    #[test]
    fn affirmative_reply() {
        assert!(is_affirmative("Yes."));
        assert!(is_affirmative(" y"));
        assert!(!is_affirmative("No thanks"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn ledger_detects_repeats() {
        let mut ledger = DialogueLedger::new();
        let turns = [turn("Sam", "hi"), turn("Lily", "hello")];
        assert!(ledger.insert("lunch", &turns));
        assert!(!ledger.insert("lunch", &turns));
        assert!(ledger.insert("work", &turns));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn involves_all_names() {
        let event = DialogueEvent {
            timestamp: Utc::now(),
            context: "lunch".into(),
            participants: vec!["Sam".into(), "Lily".into()],
            dialogue: vec![turn("Sam", "hi")],
            importance: Some(3),
        };
        assert!(event.involves_all(&["Lily", "Sam"]));
        assert!(!event.involves_all(&["Sam", "Jaelin"]));
        assert_eq!(event.transcript(), "hi");
    }
}
