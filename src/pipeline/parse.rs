//! Response parsing: turn the model's completion into a JSON value.
//!
//! Instruction-tuned models are asked for JSON but often wrap it in a
//! ```` ```json ```` fence or add a sentence before or after it. In
//! [`JsonMode::FirstObject`] the fence is stripped and the first non-empty
//! `{…}` object that parses is used. [`JsonMode::Strict`] accepts the
//! completion only when the whole (trimmed) text is one JSON document.
//!
//! Whatever parses is returned verbatim; no field is checked or coerced.

use crate::config::JsonMode;
use crate::error::StructuringFailure;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Parse a model completion according to `mode`.
pub fn parse_model_output(raw: &str, mode: JsonMode) -> Result<Value, StructuringFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StructuringFailure::EmptyResponse);
    }

    let strict = serde_json::from_str::<Value>(trimmed);
    match mode {
        JsonMode::Strict => strict.map_err(invalid_json),
        JsonMode::FirstObject => match strict {
            Ok(v) => Ok(v),
            Err(e) => {
                let unfenced = strip_code_fences(trimmed);
                serde_json::from_str::<Value>(unfenced.trim())
                    .ok()
                    .filter(Value::is_object)
                    .or_else(|| first_json_block(&unfenced))
                    .ok_or_else(|| invalid_json(e))
            }
        },
    }
}

fn invalid_json(e: serde_json::Error) -> StructuringFailure {
    StructuringFailure::InvalidJson {
        detail: e.to_string(),
    }
}

// ── Code fences ──────────────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```").unwrap());

/// Return the body of the first fenced block, or the input unchanged.
fn strip_code_fences(input: &str) -> String {
    match RE_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Embedded JSON ────────────────────────────────────────────────────────────

/// First non-empty JSON object embedded in `input`.
///
/// Arrays, scalars and `{}` found in prose are not accepted: a refusal that
/// happens to contain `[1]` must not pass for invoice data.
fn first_json_block(input: &str) -> Option<Value> {
    object_spans(input)
        .into_iter()
        .filter_map(|(start, end)| serde_json::from_str::<Value>(&input[start..=end]).ok())
        .find(|v| v.as_object().is_some_and(|m| !m.is_empty()))
}

/// Byte ranges of every balanced `{…}` in `input`, ordered by start.
///
/// One pass with a stack of open positions. Braces inside string literals
/// are ignored once an object is open; a stray `}` is skipped, and an
/// unclosed `{` leaves the objects after it reachable.
fn object_spans(input: &str) -> Vec<(usize, usize)> {
    let mut open: Vec<usize> = Vec::new();
    let mut spans = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in input.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, i));
                }
            }
            _ => {}
        }
    }
    spans.sort_unstable();
    spans
}
