//! Request parameter parsing for the two command surfaces

use crate::{Result, SupervisorError};
use serde_json::Value;
use std::collections::HashMap;

/// Parse a JSON body; anything unparseable is treated as an empty object
pub fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

/// JSON flag: only a boolean `true` counts
pub fn json_flag(body: &Value, key: &str) -> bool {
    matches!(body.get(key), Some(Value::Bool(true)))
}

/// JSON spawn count, defaulting to 1
pub fn json_count(body: &Value) -> Result<usize> {
    match body.get("count") {
        None | Some(Value::Null) => Ok(1),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                SupervisorError::InvalidRequest(format!("count must be a positive integer, got {}", value))
            }),
    }
}

/// JSON string field
pub fn json_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Query/form flag: only the exact string `"true"` counts
pub fn form_flag(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).map(String::as_str) == Some("true")
}

/// Query/form spawn count, defaulting to 1
pub fn form_count(params: &HashMap<String, String>) -> Result<usize> {
    match params.get("count").map(|s| s.trim()) {
        None | Some("") => Ok(1),
        Some(raw) => raw.parse().map_err(|_| {
            SupervisorError::InvalidRequest(format!("count must be a positive integer, got {:?}", raw))
        }),
    }
}

/// Query/form string field
pub fn form_str<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|s| !s.is_empty())
}
