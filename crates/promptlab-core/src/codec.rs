//! Packs a model answer, its latency and token usage into the single string slot
//! a response cell can hold, and unpacks it again.
//!
//! Stored format (persisted data depends on it, do not change):
//!
//! ```text
//! <answerText>__TIMING__<durationMs>[__USAGE__<prompt>,<completion>,<total>]
//! ```
//!
//! Decoding splits on the *first* `__TIMING__` and then on the first `__USAGE__`.
//! An answer that itself contains either token is misparsed. This is a known
//! limitation of the delimiter scheme; `encode` logs a warning when it happens
//! but keeps the format so existing snapshots stay readable.

use crate::model::TokenUsage;
use serde::Serialize;

pub const TIMING_SEPARATOR: &str = "__TIMING__";
pub const USAGE_SEPARATOR: &str = "__USAGE__";

/// Cell value while an invocation is in flight.
pub const LOADING_SENTINEL: &str = "__LOADING__";

/// Prefix of every cell value written for a failed invocation.
pub const ERROR_PREFIX: &str = "Error: ";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodedResponse {
    pub text: String,
    pub duration_ms: Option<f64>,
    pub usage: Option<TokenUsage>,
}

pub fn contains_reserved_token(text: &str) -> bool {
    text.contains(TIMING_SEPARATOR) || text.contains(USAGE_SEPARATOR)
}

pub fn encode(text: &str, duration_ms: f64, usage: Option<&TokenUsage>) -> String {
    if contains_reserved_token(text) {
        tracing::warn!(
            event = "codec_reserved_token",
            text_len = text.len(),
            "response text contains a codec separator and will not decode cleanly"
        );
    }

    let mut out = format!("{}{}{}", text, TIMING_SEPARATOR, duration_ms);
    if let Some(u) = usage {
        out.push_str(&format!(
            "{}{},{},{}",
            USAGE_SEPARATOR, u.prompt_tokens, u.completion_tokens, u.total_tokens
        ));
    }
    out
}

pub fn encode_error(message: &str) -> String {
    format!("{}{}", ERROR_PREFIX, message)
}

pub fn decode(raw: &str) -> DecodedResponse {
    let Some((text, rest)) = raw.split_once(TIMING_SEPARATOR) else {
        return DecodedResponse {
            text: raw.to_string(),
            duration_ms: None,
            usage: None,
        };
    };

    let (duration_part, usage_part) = match rest.split_once(USAGE_SEPARATOR) {
        Some((d, u)) => (d, Some(u)),
        None => (rest, None),
    };

    DecodedResponse {
        text: text.to_string(),
        duration_ms: duration_part.trim().parse::<f64>().ok(),
        usage: usage_part.and_then(parse_usage),
    }
}

fn parse_usage(s: &str) -> Option<TokenUsage> {
    let mut parts = s.split(',').map(|p| p.trim().parse::<u64>());
    let prompt_tokens = parts.next()?.ok()?;
    let completion_tokens = parts.next()?.ok()?;
    let total_tokens = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

/// Typed view over a stored cell string.
#[derive(Debug, Clone, PartialEq)]
pub enum CellState {
    /// Never run.
    Unset,
    /// In flight.
    Pending,
    Succeeded(DecodedResponse),
    Failed { message: String },
}

impl CellState {
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw {
            None => CellState::Unset,
            Some(LOADING_SENTINEL) => CellState::Pending,
            Some(s) => match s.strip_prefix(ERROR_PREFIX) {
                Some(message) => CellState::Failed {
                    message: message.to_string(),
                },
                None => CellState::Succeeded(decode(s)),
            },
        }
    }

    pub fn to_stored(&self) -> Option<String> {
        match self {
            CellState::Unset => None,
            CellState::Pending => Some(LOADING_SENTINEL.to_string()),
            CellState::Succeeded(r) => Some(match r.duration_ms {
                Some(d) => encode(&r.text, d, r.usage.as_ref()),
                None => r.text.clone(),
            }),
            CellState::Failed { message } => Some(encode_error(message)),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, CellState::Pending)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, CellState::Succeeded(_) | CellState::Failed { .. })
    }
}
