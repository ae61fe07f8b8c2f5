//! Prompt templates for every generation call in a tick.
//!
//! Each stage of the ORPDA cycle, the conversation loop and the scoring
//! calls have a built-in template. A directory of TOML files can replace
//! any of them; files that are absent keep the built-in text.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::LlmError;

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

/// Shared output contract for the stage prompts.
const STAGE_CONTRACT: &str = r"Reply with a single JSON object and nothing else.
Use the keys datetime_start, duration_min, location, action, topic and state_summary
where they apply. Times are formatted YYYY-MM-DD HH:MM.";

/// Observation stage instruction.
pub const OBSERVE_SYSTEM: &str = r"You are the perception of a simulated person.
From the context, describe what they notice right now: where they are,
what they are doing, and the state of their surroundings.";

/// Reflection stage instruction.
pub const REFLECT_SYSTEM: &str = r#"You are the inner voice of a simulated person.
Given the observation, reflect on how they feel about what they are doing.
Include "attention_stability": "stable" or "unstable"."#;

/// Planning stage instruction.
pub const PLAN_SYSTEM: &str = r"You plan the next step of a simulated person's day.
Follow the current schedule slot unless the reflection gives a strong reason not to.";

/// Drift decision stage instruction.
pub const DRIFT_DECIDE_SYSTEM: &str = r#"You decide whether a simulated person's mind wanders from the plan this step.
Include "should_drift" (true/false), "drift_type" (Internal, Attentional Leak, Behavioral or None),
"drift_topic", "drift_intensity" (0.0 to 1.0), "drift_action", "justification" and "potential_recovery".
Internal drift is daydreaming, an attentional leak is a glance at a distraction,
behavioral drift means they actually do something else."#;

/// Action stage instruction when a drift decision precedes it.
pub const ACT_ORPDA_SYSTEM: &str = r#"You narrate what a simulated person actually does this step.
Honour the plan, unless the drift decision says they drift; then show the drift.
Wrap the result as {"action_result": {...}} and include "drift_type" and "drift_topic"."#;

/// Action stage instruction without drift.
pub const ACT_ORPA_SYSTEM: &str = r#"You narrate what a simulated person actually does this step, following the plan.
Wrap the result as {"action_result": {...}}."#;

/// User prompt shared by every stage: the tick context as JSON.
pub const STAGE_USER: &str = "Context:\n{context}";

/// Speak gate.
pub const SPEAK_USER: &str = r"You are {name}. Your personality is {persona}. Context: {context}.
Recent memories: {memories}
Do you want to speak now? Reply with yes/no only.";

/// Conversation turn instruction.
pub const TURN_SYSTEM: &str =
    "Given context, history, and memories, produce ONE short in-character line for the speaker.";

/// Conversation turn prompt.
pub const TURN_USER: &str = r"{name}'s personality: {persona}
Current Context: {context}
Observation: {observation}
Relevant Memory Summary: {memories}
Recent Dialogue:
{dialogue}
Action: Respond naturally in character to continue the dialogue with {listener}, building on the latest turn.
Reply with only {name}'s next line (no listener line).";

/// Summary instruction.
pub const SUMMARY_SYSTEM: &str =
    "Summarize observations into a concise one- or two-sentence memory for later recall.";

/// Summary prompt.
pub const SUMMARY_USER: &str = "Summarize this into one or two sentences capturing key facts: {text}";

/// Importance instruction.
pub const IMPORTANCE_SYSTEM: &str = r#"Output scale by rating the input on a scale of 1 to 10 as integer,
where 1 is "purely mundane" (e.g., brushing teeth) and 10 is "extremely poignant" (e.g., a breakup)."#;

/// Importance prompt.
pub const IMPORTANCE_USER: &str = "{text}";

/// Replace every `{key}` with its value. Unknown placeholders stay as-is.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

// ---------------------------------------------------------------------------
// PromptEngine
// ---------------------------------------------------------------------------

/// Identifies a prompt template by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    /// Observation stage.
    Observe,
    /// Reflection stage.
    Reflect,
    /// Planning stage.
    Plan,
    /// Drift decision stage.
    DriftDecide,
    /// Action stage after a drift decision.
    ActOrpda,
    /// Action stage without drift.
    ActOrpa,
    /// "Do you want to speak" gate.
    Speak,
    /// One conversation line.
    Turn,
    /// Dialogue summary.
    Summary,
    /// Importance score.
    Importance,
}

impl PromptId {
    /// Every prompt id, in cycle order.
    pub const ALL: [PromptId; 10] = [
        Self::Observe,
        Self::Reflect,
        Self::Plan,
        Self::DriftDecide,
        Self::ActOrpda,
        Self::ActOrpa,
        Self::Speak,
        Self::Turn,
        Self::Summary,
        Self::Importance,
    ];

    /// Stable name, also the TOML file stem.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Reflect => "reflect",
            Self::Plan => "plan",
            Self::DriftDecide => "drift_decide",
            Self::ActOrpda => "act_orpda",
            Self::ActOrpa => "act_orpa",
            Self::Speak => "speak",
            Self::Turn => "turn",
            Self::Summary => "summary",
            Self::Importance => "importance",
        }
    }

    /// TOML filename for this prompt.
    #[must_use]
    pub fn filename(self) -> String {
        format!("{}.toml", self.name())
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PromptId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| LlmError::ConfigError(format!("unknown prompt id: '{s}'")))
    }
}

#[derive(Debug, Deserialize)]
struct TomlPromptFile {
    prompt: TomlPromptData,
}

#[derive(Debug, Deserialize)]
struct TomlPromptData {
    version: String,
    #[serde(default)]
    system: String,
    user: String,
}

/// A ready-to-render prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    /// Version string, `builtin` for compiled-in text.
    pub version: String,
    /// Standing instruction (`{key}` placeholders allowed).
    pub system: String,
    /// Per-call prompt (`{key}` placeholders allowed).
    pub user: String,
}

impl PromptTemplate {
    fn builtin(system: impl Into<String>, user: &str) -> Self {
        Self {
            version: "builtin".into(),
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Holds one template per [`PromptId`].
#[derive(Debug, Clone)]
pub struct PromptEngine {
    templates: HashMap<PromptId, PromptTemplate>,
}

impl PromptEngine {
    /// Engine with the compiled-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        let stage = |instruction: &str| PromptTemplate::builtin(format!("{instruction}\n{STAGE_CONTRACT}"), STAGE_USER);
        let templates = HashMap::from([
            (PromptId::Observe, stage(OBSERVE_SYSTEM)),
            (PromptId::Reflect, stage(REFLECT_SYSTEM)),
            (PromptId::Plan, stage(PLAN_SYSTEM)),
            (PromptId::DriftDecide, stage(DRIFT_DECIDE_SYSTEM)),
            (PromptId::ActOrpda, stage(ACT_ORPDA_SYSTEM)),
            (PromptId::ActOrpa, stage(ACT_ORPA_SYSTEM)),
            (PromptId::Speak, PromptTemplate::builtin(String::new(), SPEAK_USER)),
            (PromptId::Turn, PromptTemplate::builtin(TURN_SYSTEM, TURN_USER)),
            (PromptId::Summary, PromptTemplate::builtin(SUMMARY_SYSTEM, SUMMARY_USER)),
            (PromptId::Importance, PromptTemplate::builtin(IMPORTANCE_SYSTEM, IMPORTANCE_USER)),
        ]);
        Self { templates }
    }

    /// Built-in templates overridden by any `<id>.toml` found in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `dir` is not a directory, or if a prompt
    /// file exists but cannot be read or parsed.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, LlmError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LlmError::ConfigError(format!("prompt directory not found: {}", dir.display())));
        }
        let mut engine = Self::builtin();
        for id in PromptId::ALL {
            let path = dir.join(id.filename());
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .map_err(|e| LlmError::ConfigError(format!("failed to read {}: {e}", path.display())))?;
            let parsed: TomlPromptFile = toml::from_str(&content)
                .map_err(|e| LlmError::ConfigError(format!("failed to parse {}: {e}", path.display())))?;
            let d = parsed.prompt;
            debug!(prompt = %id, version = %d.version, "Loaded prompt override");
            engine.templates.insert(id, PromptTemplate {
                version: d.version,
                system: d.system,
                user: d.user,
            });
        }
        Ok(engine)
    }

    /// Template for `id`.
    #[must_use]
    pub fn get(&self, id: PromptId) -> Option<&PromptTemplate> {
        self.templates.get(&id)
    }

    /// Render `(system, user)` for `id`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the template is missing.
    pub fn render(&self, id: PromptId, vars: &[(&str, &str)]) -> Result<(String, String), LlmError> {
        let tpl = self
            .get(id)
            .ok_or_else(|| LlmError::ConfigError(format!("prompt template '{id}' not loaded")))?;
        Ok((render_template(&tpl.system, vars), render_template(&tpl.user, vars)))
    }

    /// Number of loaded templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::builtin()
    }
}
