//! One-line natural-language summary of a merged tick, as kept in the memory stream.

use crate::stage::OrpdaResult;
use crate::types::DriftType;

fn non_empty(s: Option<&String>) -> Option<&str> {
    s.map(String::as_str).filter(|s| !s.trim().is_empty())
}

/// Condense a normalised tick into a single readable sentence.
///
/// Shape: `"<name> is at <loc> doing <action> about <topic> ; while drifting
/// (<type>) toward <topic> ; (<reflection>) ; <state>"`, with absent parts
/// omitted.
#[must_use]
pub fn summarize_tick(agent_name: &str, result: &OrpdaResult) -> String {
    let obs = result.observation.as_ref().map(|o| &o.common);
    let act = result.action_result.as_ref().map(|a| &a.common);
    let plan = result.plan.as_ref().map(|p| &p.common);

    let location = non_empty(act.and_then(|a| a.location.as_ref()))
        .or_else(|| non_empty(obs.and_then(|o| o.location.as_ref())))
        .unwrap_or("");
    let action = non_empty(act.and_then(|a| a.action.as_ref()))
        .or_else(|| non_empty(obs.and_then(|o| o.action.as_ref())))
        .unwrap_or("doing something");
    let topic = non_empty(act.and_then(|a| a.topic.as_ref()))
        .or_else(|| non_empty(plan.and_then(|p| p.topic.as_ref())));

    let mut parts = vec![format!("{agent_name} is at {location} doing {action}")];
    if let Some(topic) = topic {
        parts.push(format!("about {topic}"));
    }

    if let Some(decision) = result.drift_decision.as_ref() {
        let kind = decision.kind();
        if kind != DriftType::None {
            match non_empty(decision.drift_topic.as_ref()) {
                Some(t) => parts.push(format!("; while drifting ({kind}) toward {t}")),
                None => parts.push(format!("; while drifting ({kind})")),
            }
        }
    }

    if let Some(feeling) = non_empty(result.reflection.as_ref().and_then(|r| r.common.state_summary.as_ref())) {
        parts.push(format!("; ({feeling})"));
    }

    let state = non_empty(act.and_then(|a| a.state_summary.as_ref()))
        .or_else(|| non_empty(obs.and_then(|o| o.state_summary.as_ref())));
    if let Some(state) = state {
        parts.push(format!("; {state}"));
    }

    parts.join(" ").trim().to_string()
}
