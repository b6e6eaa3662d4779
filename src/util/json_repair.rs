//! Best-effort recovery of JSON from LLM output
//!
//! LLMs wrap JSON in prose and code fences, leave trailing commas, forget
//! quotes on keys, and drop closing brackets. This module either produces a
//! valid `serde_json::Value` or reports a typed failure; its heuristics
//! never leak into the data model.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Why repair failed
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("input is empty")]
    Empty,
    #[error("no JSON payload found in input")]
    NoPayload,
    #[error("invalid JSON after repair: {0}")]
    Invalid(String),
}

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("valid regex"));

/// Parse `input` as JSON, applying repair heuristics if a plain parse fails.
///
/// Heuristics, in order: extract a fenced code block, slice to the outermost
/// bracket pair, drop trailing commas, quote bare object keys, append
/// missing closing brackets.
pub fn repair_json(input: &str) -> Result<serde_json::Value, RepairError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(RepairError::Empty);
    }

    let candidate = extract_fenced_block(trimmed).unwrap_or(trimmed);
    let candidate = slice_to_brackets(candidate).ok_or(RepairError::NoPayload)?;

    // Fast path: the payload is already valid
    if let Ok(value) = serde_json::from_str(candidate) {
        return Ok(value);
    }

    debug!("plain JSON parse failed, applying repair heuristics");

    let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
    let repaired = BARE_KEY.replace_all(&repaired, "$1\"$2\":");
    let repaired = balance_brackets(&repaired);

    serde_json::from_str(&repaired).map_err(|e| RepairError::Invalid(e.to_string()))
}

/// Extract the body of the first ```-fenced block that contains JSON.
fn extract_fenced_block(input: &str) -> Option<&str> {
    let mut rest = input;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        let end = body.find("```")?;
        let block = body[..end].trim();
        if block.starts_with('{') || block.starts_with('[') {
            return Some(block);
        }
        rest = &body[end + 3..];
    }
    None
}

/// Slice to the span from the first opening bracket to the last closing one.
/// Returns the whole tail when no closing bracket follows, so that
/// `balance_brackets` can finish the job.
fn slice_to_brackets(input: &str) -> Option<&str> {
    let start = input.find(|c| c == '{' || c == '[')?;
    let end = input
        .rfind(|c| c == '}' || c == ']')
        .filter(|&e| e > start);
    match end {
        Some(end) => Some(input[start..=end].trim()),
        None => Some(input[start..].trim()),
    }
}

/// Append closing brackets for any left unclosed, ignoring bracket
/// characters inside string literals.
fn balance_brackets(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = input.to_string();
    if in_string {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}
