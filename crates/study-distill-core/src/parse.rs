//! Tolerant parsing of content-generator responses.
//!
//! Every response resolves to exactly one [`GenerationOutcome`]. Near-JSON
//! text is recovered where possible: Markdown fences are stripped, the
//! outermost object is sliced out of surrounding prose, typographic quotes
//! are straightened and trailing commas removed before a second attempt.

use serde_json::Value;

use crate::models::SummaryFragment;

/// Token a generator may emit instead of a document.
pub const INSUFFICIENT_CONTEXT_MARKER: &str = "INSUFFICIENT_CONTEXT";

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Valid(SummaryFragment),
    Malformed(String),
    InsufficientContext,
}

pub fn parse_response(raw: &str) -> GenerationOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return GenerationOutcome::Malformed(raw.to_string());
    }
    if trimmed.contains(INSUFFICIENT_CONTEXT_MARKER) && !trimmed.starts_with('{') {
        return GenerationOutcome::InsufficientContext;
    }

    let value = match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => Some(v),
        Err(_) => recover(trimmed),
    };

    match value {
        Some(v) => from_value(v, raw),
        None => GenerationOutcome::Malformed(raw.to_string()),
    }
}

fn from_value(value: Value, raw: &str) -> GenerationOutcome {
    if is_insufficient(&value) {
        return GenerationOutcome::InsufficientContext;
    }
    match serde_json::from_value::<SummaryFragment>(value) {
        Ok(fragment) if !fragment.is_empty() => GenerationOutcome::Valid(fragment),
        _ => GenerationOutcome::Malformed(raw.to_string()),
    }
}

fn is_insufficient(value: &Value) -> bool {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.to_ascii_lowercase().replace([' ', '-'], "_"));
    status.as_deref() == Some("insufficient_context")
}

/// Second-chance parse of near-JSON text.
fn recover(text: &str) -> Option<Value> {
    let unfenced = strip_fences(text);
    let sliced = slice_object(unfenced)?;
    let cleaned = remove_trailing_commas(&straighten_quotes(sliced));
    serde_json::from_str(&cleaned).ok()
}

fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

/// Slice from the first `{` to its matching `}`, honouring strings.
fn slice_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    // Unbalanced: hand back the tail and let the caller fail.
    Some(&text[start..])
}

fn straighten_quotes(text: &str) -> String {
    text.replace(['“', '”'], "\"").replace(['‘', '’'], "'")
}

fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}
