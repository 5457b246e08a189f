use serde_json::Value;

use crate::core::completion::format_api_error;
use crate::core::constants::{COMMENT_MARKER, DATA_PREFIX, DONE_SENTINEL};

/// Classification of one decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Blank line, comment, non-data field, or a payload carrying no text.
    Ignore,
    /// The terminator sentinel.
    Terminate,
    Delta(String),
    /// A well-formed payload reporting an API error.
    ApiError(String),
    /// The data payload is not valid JSON. Carries the trimmed payload.
    Malformed(String),
}

pub fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(str::trim)
}

pub fn is_comment(line: &str) -> bool {
    line.starts_with(COMMENT_MARKER)
}

pub fn parse_line(line: &str) -> FrameEvent {
    if line.trim().is_empty() || is_comment(line) {
        return FrameEvent::Ignore;
    }

    match extract_data_payload(line) {
        Some(payload) => parse_payload(payload),
        None => FrameEvent::Ignore,
    }
}

/// Interprets the payload of a data frame.
pub fn parse_payload(payload: &str) -> FrameEvent {
    if payload == DONE_SENTINEL {
        return FrameEvent::Terminate;
    }
    if payload.is_empty() {
        return FrameEvent::Ignore;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => return FrameEvent::Malformed(payload.to_string()),
    };

    if value.get("choices").is_none() && value.get("error").is_some() {
        return FrameEvent::ApiError(format_api_error(payload));
    }

    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(content) if !content.is_empty() => FrameEvent::Delta(content.to_string()),
        _ => FrameEvent::Ignore,
    }
}
