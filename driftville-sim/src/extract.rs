//! Pull a JSON object out of free-form generated text.
//!
//! Replies usually wrap the payload in a ```json fence, sometimes with
//! prose around it, sometimes bare. Extraction tries, in order: the whole
//! reply with one outer fence stripped, the first fenced block anywhere,
//! then the outermost `{ .. }` span. Only objects are accepted.

use serde_json::{Map, Value};

/// Drop a leading ```` ```lang ```` line and a trailing fence, if present.
#[must_use]
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. `json`) up to the first newline.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Contents of the first fenced block, if any.
#[must_use]
pub fn first_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// The JSON object carried by `raw`, if one can be found.
#[must_use]
pub fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    if let Some(map) = parse_object(strip_fence(raw)) {
        return Some(map);
    }
    if let Some(map) = first_fenced_block(raw).and_then(parse_object) {
        return Some(map);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&raw[start..=end])
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn fenced_reply_parses() {
        let raw = "```json\n{\"location\": \"cafe\"}\n```";
        let map = extract_object(raw).expect("object");
        assert_eq!(map["location"], "cafe");
    }

    #[test]
    fn bare_reply_parses() {
        assert!(extract_object("  {\"a\": 1}  ").is_some());
    }

    #[test]
    fn fence_after_prose_parses() {
        let raw = "Here you go:\n```json\n{\"plan\": {\"action\": \"work\"}}\n```\nAnything else?";
        let map = extract_object(raw).expect("object");
        assert!(map.contains_key("plan"));
    }

    #[test]
    fn braces_inside_prose_parse() {
        let raw = "Sure! {\"should_drift\": false} hope that helps";
        assert_eq!(extract_object(raw).expect("object")["should_drift"], false);
    }

    #[test]
    fn non_objects_and_garbage_are_rejected() {
        assert!(extract_object("[1, 2, 3]").is_none());
        assert!(extract_object("```json\n\"just a string\"\n```").is_none());
        assert!(extract_object("I would rather not.").is_none());
        assert!(extract_object("} backwards {").is_none());
        assert!(extract_object("{\"cut\": ").is_none());
    }

    #[test]
    fn strip_fence_leaves_plain_text() {
        assert_eq!(strip_fence("  hello "), "hello");
        assert_eq!(strip_fence("```\n{}\n```"), "{}");
    }

    proptest! {
        #[test]
        fn fenced_object_survives_surrounding_prose(
            fields in prop::collection::btree_map("[a-z_]{1,8}", "[a-z ]{0,12}", 1..6),
            before in "[A-Za-z .,!?]{0,40}",
            after in "[A-Za-z .,!?]{0,40}",
        ) {
            let object: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let body = Value::Object(object.clone()).to_string();
            let raw = format!("{before}\n```json\n{body}\n```\n{after}");
            prop_assert_eq!(extract_object(&raw), Some(object));
        }
    }
}
