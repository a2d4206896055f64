//! Pulls a list of question objects out of a free-form completion.
//!
//! The text goes through envelope lookup, fence stripping, payload isolation and
//! a series of repairs. Each repair is only attempted after the previous form
//! failed to parse, so valid JSON comes back untouched.

use crate::utils::text::preview;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

/// Fields tried, in order, when `message.content` is missing or empty.
pub const FALLBACK_FIELDS: [&str; 6] = [
    "reasoning_content",
    "result",
    "data",
    "text",
    "output",
    "response",
];

const MAX_TRUNCATION_ATTEMPTS: usize = 64;

static RE_FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("static regex")
});
static RE_FENCE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("static regex"));
static RE_TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("static regex"));

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("completion response is empty")]
    Empty,
    #[error("no JSON could be recovered from the completion response: {}", preview(.raw, 120))]
    Unparseable { raw: String },
    #[error("recovered JSON is neither a question array nor a question object")]
    UnexpectedShape { raw: String },
}

impl NormalizeError {
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            NormalizeError::Empty => None,
            NormalizeError::Unparseable { raw } | NormalizeError::UnexpectedShape { raw } => {
                Some(raw)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub questions: Vec<JsonValue>,
    /// Trailing element that was cut off mid-way and discarded.
    pub dropped: Option<String>,
    pub repaired: bool,
}

pub fn extract_questions(completion_text: &str) -> Result<Extraction, NormalizeError> {
    let content = locate_content(completion_text);
    if content.trim().is_empty() {
        return Err(NormalizeError::Empty);
    }

    let repaired = match serde_json::from_str::<JsonValue>(&content) {
        Ok(value) if value.is_array() || value.is_object() => Repaired {
            value,
            dropped: None,
            repaired: false,
        },
        _ => {
            let unfenced = strip_code_fences(&content);
            parse_with_repairs(isolate_json(&unfenced)).ok_or_else(|| {
                NormalizeError::Unparseable {
                    raw: completion_text.to_string(),
                }
            })?
        }
    };

    let questions = match repaired.value {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut obj) => match obj.remove("questions") {
            Some(JsonValue::Array(items)) => items,
            Some(other) => {
                obj.insert("questions".to_string(), other);
                vec![JsonValue::Object(obj)]
            }
            None => vec![JsonValue::Object(obj)],
        },
        _ => {
            return Err(NormalizeError::UnexpectedShape {
                raw: completion_text.to_string(),
            })
        }
    };

    Ok(Extraction {
        questions,
        dropped: repaired.dropped,
        repaired: repaired.repaired,
    })
}

/// Finds the message text inside a provider response envelope.
///
/// Text that is not a JSON envelope is returned trimmed and otherwise unchanged.
pub fn locate_content(completion_text: &str) -> String {
    let trimmed = completion_text.trim();
    let Ok(JsonValue::Object(envelope)) = serde_json::from_str::<JsonValue>(trimmed) else {
        return trimmed.to_string();
    };
    if !is_envelope(&envelope) {
        return trimmed.to_string();
    }

    let message = envelope
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message").or_else(|| c.get("delta")))
        .or_else(|| envelope.get("message"));

    if let Some(text) = message.and_then(|m| m.get("content")).and_then(value_text) {
        return text;
    }
    if let Some(text) = envelope
        .get("content")
        .filter(|c| c.is_array())
        .and_then(value_text)
    {
        return text;
    }
    for field in FALLBACK_FIELDS {
        let candidate = message
            .and_then(|m| m.get(field))
            .or_else(|| envelope.get(field));
        if let Some(text) = candidate.and_then(value_text) {
            return text;
        }
    }

    trimmed.to_string()
}

fn is_envelope(obj: &serde_json::Map<String, JsonValue>) -> bool {
    if obj.contains_key("stem") || obj.contains_key("questions") {
        return false;
    }
    obj.contains_key("choices")
        || obj.contains_key("message")
        || obj.get("content").is_some_and(JsonValue::is_array)
        || FALLBACK_FIELDS.iter().any(|f| obj.contains_key(*f))
}

fn value_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Array(parts)
            if !parts.is_empty()
                && parts
                    .iter()
                    .all(|p| p.get("text").and_then(JsonValue::as_str).is_some()) =>
        {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(JsonValue::as_str))
                .collect::<Vec<_>>()
                .join("")
                .trim()
                .to_string()
        }
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Removes markdown code fences, preferring the contents of the first complete block.
pub fn strip_code_fences(text: &str) -> String {
    if let Some(caps) = RE_FENCED_BLOCK.captures(text) {
        let inner = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !inner.is_empty() {
            return inner.to_string();
        }
    }
    if text.contains("```") {
        return RE_FENCE_MARKER.replace_all(text, "").trim().to_string();
    }
    text.trim().to_string()
}

/// Narrows the text down to the JSON payload.
pub fn isolate_json(text: &str) -> &str {
    let t = text.trim();
    if t.starts_with('[') || t.starts_with('{') {
        return t;
    }
    let Some(start) = t.find(['[', '{']) else {
        return t;
    };
    let closer = if t[start..].starts_with('[') { ']' } else { '}' };
    match t.rfind(closer) {
        Some(end) if end > start => &t[start..=end],
        _ => &t[start..],
    }
}

#[derive(Debug)]
struct Repaired {
    value: JsonValue,
    dropped: Option<String>,
    repaired: bool,
}

fn parse_with_repairs(payload: &str) -> Option<Repaired> {
    if let Ok(value) = serde_json::from_str::<JsonValue>(payload) {
        return Some(Repaired {
            value,
            dropped: None,
            repaired: false,
        });
    }

    // Complete value followed by trailing prose.
    if let Some(Ok(value)) = serde_json::Deserializer::from_str(payload)
        .into_iter::<JsonValue>()
        .next()
    {
        if value.is_array() || value.is_object() {
            return Some(Repaired {
                value,
                dropped: None,
                repaired: true,
            });
        }
    }

    let without_commas = strip_trailing_commas(payload);
    if let Ok(value) = serde_json::from_str::<JsonValue>(&without_commas) {
        return Some(Repaired {
            value,
            dropped: None,
            repaired: true,
        });
    }

    let closed = close_unbalanced(&without_commas);
    if let Ok(value) = serde_json::from_str::<JsonValue>(&strip_trailing_commas(&closed.text)) {
        return Some(Repaired {
            value,
            dropped: closed.dropped,
            repaired: true,
        });
    }

    truncate_at_last_element(&without_commas)
}

pub fn strip_trailing_commas(text: &str) -> String {
    RE_TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

#[derive(Debug)]
struct Closed {
    text: String,
    dropped: Option<String>,
}

/// Appends the closers a truncated payload is missing.
///
/// When the outermost open array ends in an element that is itself still open,
/// that element is cut off instead of being completed, and returned as `dropped`.
fn close_unbalanced(payload: &str) -> Closed {
    let mut stack: Vec<char> = Vec::new();
    // For each open array, the byte offset where its current element began.
    let mut element_starts: Vec<Option<usize>> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (pos, ch) in payload.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if stack.last() == Some(&'[')
            && !ch.is_whitespace()
            && ch != ','
            && ch != ']'
        {
            if let Some(slot) = element_starts.last_mut() {
                if slot.is_none() {
                    *slot = Some(pos);
                }
            }
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                stack.push('{');
                element_starts.push(None);
            }
            '[' => {
                stack.push('[');
                element_starts.push(None);
            }
            '}' | ']' => {
                stack.pop();
                element_starts.pop();
            }
            ',' if stack.last() == Some(&'[') => {
                if let Some(slot) = element_starts.last_mut() {
                    *slot = None;
                }
            }
            _ => {}
        }
    }

    if let Some(k) = stack.iter().position(|c| *c == '[') {
        let element_open = stack.len() > k + 1 || in_string;
        if let (true, Some(start)) = (element_open, element_starts[k]) {
            let mut text = payload[..start].trim_end().trim_end_matches(',').to_string();
            push_closers(&mut text, &stack[..=k]);
            return Closed {
                text,
                dropped: Some(payload[start..].trim().to_string()),
            };
        }
    }

    let mut text = payload.to_string();
    if in_string {
        if escaped {
            text.pop();
        }
        text.push('"');
    }
    let trimmed_len = text.trim_end().len();
    text.truncate(trimmed_len);
    if text.ends_with(',') {
        text.pop();
    }
    if text.ends_with(':') {
        text.push_str("null");
    }
    push_closers(&mut text, &stack);
    Closed {
        text,
        dropped: None,
    }
}

fn push_closers(text: &mut String, open: &[char]) {
    for opener in open.iter().rev() {
        text.push(if *opener == '[' { ']' } else { '}' });
    }
}

/// Last resort: close the array right after the last `},` and drop what follows.
fn truncate_at_last_element(payload: &str) -> Option<Repaired> {
    if !payload.starts_with('[') {
        return None;
    }
    for (pos, _) in payload
        .rmatch_indices("},")
        .take(MAX_TRUNCATION_ATTEMPTS)
    {
        let candidate = format!("{}]", &payload[..=pos]);
        if let Ok(value) = serde_json::from_str::<JsonValue>(&candidate) {
            let rest = payload[pos + 2..].trim();
            return Some(Repaired {
                value,
                dropped: if rest.is_empty() {
                    None
                } else {
                    Some(rest.to_string())
                },
                repaired: true,
            });
        }
    }
    None
}
