//! Request logging helpers
//!
//! The dispatch engine logs through `tracing` with structured fields (`request_id`, `path`,
//! `duration_ms`). This module holds what those log lines need: request IDs, the slow-call
//! threshold, and redaction of sensitive fields before an input is written to a log.

use crate::value::Value;
use std::collections::BTreeMap;
use uuid::{NoContext, Timestamp, Uuid};

/// Length of the short request ID format (first N characters of the UUID).
pub const SHORT_ID_LENGTH: usize = 8;

/// Calls slower than this are logged at `warn`.
pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Field names whose values never reach a log. Matching is case-insensitive and by substring.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
    "privatekey",
    "ssn",
    "credit_card",
    "creditcard",
    "card_number",
    "cardnumber",
    "cvv",
    "bearer",
];

/// New time-ordered request ID (UUID v7).
pub fn generate_request_id() -> String {
    Uuid::new_v7(Timestamp::now(NoContext)).to_string()
}

/// Leading characters of a request ID, for compact log lines.
pub fn short_id(request_id: &str) -> &str {
    request_id
        .char_indices()
        .nth(SHORT_ID_LENGTH)
        .map_or(request_id, |(end, _)| &request_id[..end])
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_FIELDS.iter().any(|field| key.contains(field))
}

/// Copy of `value` with sensitive object fields replaced by [`REDACTED`].
///
/// Returns `None` when nothing needed redacting, so callers can log the original.
pub fn redact(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let mut changed = false;
            let redacted: BTreeMap<String, Value> = map
                .iter()
                .map(|(key, item)| {
                    let item = if is_sensitive(key) {
                        changed = true;
                        Value::String(REDACTED.to_string())
                    } else if let Some(inner) = redact(item) {
                        changed = true;
                        inner
                    } else {
                        item.clone()
                    };
                    (key.clone(), item)
                })
                .collect();
            changed.then_some(Value::Object(redacted))
        }
        Value::Array(items) | Value::Set(items) => {
            let mut changed = false;
            let redacted: Vec<Value> = items
                .iter()
                .map(|item| match redact(item) {
                    Some(inner) => {
                        changed = true;
                        inner
                    }
                    None => item.clone(),
                })
                .collect();
            let rebuilt = match value {
                Value::Set(_) => Value::Set(redacted),
                _ => Value::Array(redacted),
            };
            changed.then_some(rebuilt)
        }
        _ => None,
    }
}

/// Loggable rendering of an input: redacted, blobs summarized.
pub fn loggable(value: &Value) -> String {
    match redact(value) {
        Some(redacted) => redacted.to_string(),
        None => value.to_string(),
    }
}
