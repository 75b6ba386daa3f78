//! Unwrapping of JSON list payloads returned by the generative service.
//!
//! Responses are expected to be a JSON array, but in practice arrive
//! wrapped in markdown fences, embedded in prose, or nested under a single
//! key. [`parse_payload`] normalizes these shapes into a [`ParsedPayload`].

use serde_json::Value;

/// Object keys accepted as a wrapper around the item list.
pub const WRAPPING_KEYS: &[&str] = &["topics", "items", "schedule", "posts"];

/// Result of parsing a list-shaped response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPayload {
    /// A bare JSON array.
    List(Vec<Value>),
    /// An object whose `key` held the array.
    Wrapped { key: String, items: Vec<Value> },
    /// Nothing usable was found.
    ParseError(String),
}

impl ParsedPayload {
    /// The item list, or the parse failure message.
    pub fn into_items(self) -> Result<Vec<Value>, String> {
        match self {
            Self::List(items) | Self::Wrapped { items, .. } => Ok(items),
            Self::ParseError(msg) => Err(msg),
        }
    }
}

/// Remove a surrounding markdown code fence (with optional language tag).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string on the opening fence line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a response that should contain a list of JSON objects.
pub fn parse_payload(raw: &str) -> ParsedPayload {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return ParsedPayload::ParseError("empty response".to_string());
    }

    match serde_json::from_str::<Value>(text) {
        Ok(value) => classify(value),
        Err(first_err) => match embedded_json(text) {
            Some(value) => classify(value),
            None => ParsedPayload::ParseError(format!("invalid JSON: {first_err}")),
        },
    }
}

fn classify(value: Value) -> ParsedPayload {
    match value {
        Value::Array(items) => ParsedPayload::List(items),
        Value::Object(mut map) => {
            for key in WRAPPING_KEYS {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return ParsedPayload::Wrapped {
                        key: (*key).to_string(),
                        items,
                    };
                }
            }
            ParsedPayload::ParseError(format!(
                "object without a list under any of {WRAPPING_KEYS:?}"
            ))
        }
        other => ParsedPayload::ParseError(format!("expected a list, got {other}")),
    }
}

/// Find the outermost `[...]` or `{...}` span in surrounding prose.
fn embedded_json(text: &str) -> Option<Value> {
    for (open, close) in [('[', ']'), ('{', '}')] {
        let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) else {
            continue;
        };
        if start >= end {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
            return Some(value);
        }
    }
    None
}

/// Read a non-empty string field from a JSON object.
pub fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_list() {
        let parsed = parse_payload(r#"[{"title": "A"}]"#);
        assert_eq!(parsed, ParsedPayload::List(vec![json!({"title": "A"})]));
    }

    #[test]
    fn fenced_list() {
        let raw = "```json\n[{\"title\": \"A\"}, {\"title\": \"B\"}]\n```";
        assert_eq!(parse_payload(raw).into_items().unwrap().len(), 2);
    }

    #[test]
    fn wrapped_under_topics() {
        let parsed = parse_payload(r#"{"topics": [{"title": "A"}], "note": "x"}"#);
        assert_eq!(
            parsed,
            ParsedPayload::Wrapped {
                key: "topics".into(),
                items: vec![json!({"title": "A"})]
            }
        );
    }

    #[test]
    fn list_embedded_in_prose() {
        let raw = "Here are your topics:\n[{\"title\": \"A\"}]\nEnjoy!";
        assert_eq!(parse_payload(raw).into_items().unwrap().len(), 1);
    }

    #[test]
    fn unusable_shapes() {
        assert!(matches!(parse_payload(""), ParsedPayload::ParseError(_)));
        assert!(matches!(
            parse_payload("no json here"),
            ParsedPayload::ParseError(_)
        ));
        assert!(matches!(
            parse_payload(r#"{"title": "lonely"}"#),
            ParsedPayload::ParseError(_)
        ));
        assert!(matches!(parse_payload("42"), ParsedPayload::ParseError(_)));
    }

    #[test]
    fn strip_fence_without_language() {
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fences("  []  "), "[]");
    }

    #[test]
    fn str_field_ignores_blank() {
        let item = json!({"title": "  ", "description": " d "});
        assert_eq!(str_field(&item, "title"), None);
        assert_eq!(str_field(&item, "description"), Some("d"));
        assert_eq!(str_field(&item, "missing"), None);
    }
}
