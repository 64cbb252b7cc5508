//! JSON extraction from model text
//!
//! Models wrap JSON in code fences, prepend commentary, leave trailing commas
//! or stop mid-document. Extraction tries, in order:
//!
//! 1. the fenced/trimmed text as-is
//! 2. the first balanced `{...}` or `[...]` span inside surrounding prose
//! 3. the same text with trailing commas removed and unclosed brackets closed

use serde_json::Value;
use tracing::debug;

use crate::types::{ErrorCategory, LlmError, Result};

/// Parse JSON out of a raw completion. Returns `(value, was_repaired)`.
pub fn extract_json(raw: &str) -> Result<(Value, bool)> {
    let cleaned = strip_code_fences(raw.trim().trim_start_matches('\u{feff}'));

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok((value, false));
    }

    if let Some(span) = embedded_json_span(cleaned)
        && let Ok(value) = serde_json::from_str::<Value>(span)
    {
        debug!("JSON extracted from surrounding text");
        return Ok((value, true));
    }

    let start = cleaned.find(['{', '[']).unwrap_or(0);
    let repaired = close_brackets(&remove_trailing_commas(&cleaned[start..]));
    if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
        debug!("JSON repaired (trailing commas / unclosed brackets)");
        return Ok((value, true));
    }

    let preview: String = cleaned.chars().take(160).collect();
    Err(LlmError::new(
        ErrorCategory::ParseError,
        format!("response is not valid JSON: {}...", preview),
    )
    .into())
}

fn strip_code_fences(s: &str) -> &str {
    let mut body = s;
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => body.trim_start_matches('`'),
        };
    }
    body.trim_end().trim_end_matches("```").trim()
}

/// First balanced object or array, honoring string literals
fn embedded_json_span(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in s[start..].char_indices() {
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
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ','
            && chars[i + 1..]
                .iter()
                .find(|c| !c.is_whitespace())
                .is_some_and(|c| matches!(c, '}' | ']'))
        {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Close an unterminated string and any open brackets, innermost first
fn close_brackets(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in s.chars() {
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
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = s.trim_end().trim_end_matches(',').to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}
