//! Finding the JSON payload inside a free-form model answer.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?([\s\S]*?)```").expect("static fence regex"))
}

fn is_container(v: &Value) -> bool {
    v.is_object() || v.is_array()
}

fn parse_container(s: &str) -> Option<Value> {
    serde_json::from_str::<Value>(s.trim())
        .ok()
        .filter(is_container)
}

/// First fenced block holding an object or array.
fn from_fence(text: &str) -> Option<Value> {
    fence_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| parse_container(m.as_str()))
}

fn is_escaped(bytes: &[u8], quote: usize) -> bool {
    bytes[..quote].iter().rev().take_while(|b| **b == b'\\').count() % 2 == 1
}

/// Byte offset of the opener matching the closer that ends `text`.
/// Brackets inside string literals are skipped.
fn opener_of_last(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if !matches!(bytes.last(), Some(b'}' | b']')) {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'"' if !is_escaped(bytes, i) => in_string = !in_string,
            _ if in_string => {}
            b'}' | b']' => depth += 1,
            b'{' | b'[' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte offset just past the closer matching the opener that starts `text`.
fn closer_of_first(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if !matches!(bytes.first(), Some(b'{' | b'[')) {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Balanced object/array that runs to the end of the text.
fn anchored_at_end(text: &str) -> Option<Value> {
    let text = text.trim_end();
    parse_container(&text[opener_of_last(text)?..])
}

/// Balanced object/array that starts the text.
fn anchored_at_start(text: &str) -> Option<Value> {
    let text = text.trim_start();
    parse_container(&text[..closer_of_first(text)?])
}

/// Tries, in order: a fenced code block, the whole trimmed text, a value
/// anchored at the end, a value anchored at the start.
pub fn extract_json(text: &str) -> Option<Value> {
    from_fence(text)
        .or_else(|| serde_json::from_str(text.trim()).ok())
        .or_else(|| anchored_at_end(text))
        .or_else(|| anchored_at_start(text))
}
