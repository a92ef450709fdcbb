//! Small text helpers shared by every timeline renderer.

use chrono::{DateTime, Local, Utc};

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Timestamps are stored in UTC and shown in the operator's zone.
pub fn local(ts: &DateTime<Utc>) -> DateTime<Local> {
    ts.with_timezone(&Local)
}

/// JSON value as prose: strings unquoted, everything else compact JSON.
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
