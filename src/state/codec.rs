//! State marker codec
//!
//! The workflow state is stored as a single HTML comment inside an issue or
//! pull request body:
//!
//! ```text
//! <!-- wiggum-state:{"iteration":0,"step":"p1-1","completedSteps":[],"phase":"phase1"} -->
//! ```
//!
//! `encode` replaces the first marker in place (every other byte of the body
//! is preserved) or prepends a new one; `decode` reads the first marker back.
//! `<` and `>` inside the JSON are written as `\u003c` / `\u003e`, so the
//! payload can never contain the ` -->` terminator.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

use super::types::WiggumState;

pub const STATE_MARKER_PREFIX: &str = "<!-- wiggum-state:";
pub const STATE_MARKER_SUFFIX: &str = " -->";

/// Keys that could redefine shared object behavior in JavaScript consumers
/// of the same body. Rejected wherever they appear up to
/// [`DANGEROUS_KEY_SCAN_DEPTH`] levels deep.
pub const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Nesting depth covered by the dangerous key scan. Deeper keys are not
/// scanned; the allow-listed deserializer still rejects unknown keys.
pub const DANGEROUS_KEY_SCAN_DEPTH: usize = 10;

const PREVIEW_CHARS: usize = 200;

static STATE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!-- wiggum-state:(.*?) -->").expect("state marker pattern is valid")
});

#[derive(Debug, Clone, Error)]
#[error("Wiggum state marker is corrupted: {original_error}\n\nBody length: {body_length} characters\nPayload preview: {json_preview}\n\n{remediation}")]
pub struct StateCorruptionError {
    pub original_error: String,
    pub body_length: usize,
    /// At most 200 characters of the marker payload
    pub json_preview: String,
    pub remediation: String,
}

impl StateCorruptionError {
    fn new(original_error: impl Into<String>, host_text: &str, payload: &str) -> Self {
        Self {
            original_error: original_error.into(),
            body_length: host_text.chars().count(),
            json_preview: payload.chars().take(PREVIEW_CHARS).collect(),
            remediation: [
                "🔧 HOW TO RECOVER:",
                "   1. Open the issue or pull request body (gh issue view <n> / gh pr view <n>)",
                "   2. Find the line starting with `<!-- wiggum-state:`",
                "   3. Fix the JSON by hand, or delete the whole comment to restart this phase",
                "   4. Run `wiggum next` again",
            ]
            .join("\n"),
        }
    }
}

/// Serialize a state into its marker comment
pub fn fragment(state: &WiggumState) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(state)?
        .replace('<', "\\u003c")
        .replace('>', "\\u003e");
    Ok(format!("{STATE_MARKER_PREFIX}{json}{STATE_MARKER_SUFFIX}"))
}

/// Embed `state` in `host_text`.
///
/// Replaces the first existing marker in place, otherwise prepends the marker
/// followed by a blank line.
pub fn encode(state: &WiggumState, host_text: &str) -> Result<String, serde_json::Error> {
    let fragment = fragment(state)?;

    match STATE_MARKER.find(host_text) {
        Some(existing) => {
            let mut encoded =
                String::with_capacity(host_text.len() - existing.len() + fragment.len());
            encoded.push_str(&host_text[..existing.start()]);
            encoded.push_str(&fragment);
            encoded.push_str(&host_text[existing.end()..]);
            Ok(encoded)
        }
        None => Ok(format!("{fragment}\n\n{host_text}")),
    }
}

/// Read the state embedded in `host_text`.
///
/// `Ok(None)` when the body carries no marker. A marker whose payload is not
/// valid JSON, contains a dangerous key, or violates the state schema is a
/// [`StateCorruptionError`]; it is never repaired automatically.
pub fn decode(host_text: &str) -> Result<Option<WiggumState>, StateCorruptionError> {
    let Some(captures) = STATE_MARKER.captures(host_text) else {
        return Ok(None);
    };
    let payload = captures.get(1).map_or("", |m| m.as_str());

    let value: Value = serde_json::from_str(payload)
        .map_err(|e| StateCorruptionError::new(format!("invalid JSON: {e}"), host_text, payload))?;

    if let Some(path) = find_dangerous_key(&value) {
        return Err(StateCorruptionError::new(
            format!("payload contains forbidden key at '{path}'"),
            host_text,
            payload,
        ));
    }

    let state = serde_json::from_value::<WiggumState>(value)
        .map_err(|e| StateCorruptionError::new(format!("schema violation: {e}"), host_text, payload))?;

    Ok(Some(state))
}

/// Remove the marker from `host_text` for display
pub fn strip(host_text: &str) -> String {
    match STATE_MARKER.find(host_text) {
        Some(marker) => {
            let mut rest = &host_text[marker.end()..];
            if marker.start() == 0 {
                rest = rest.strip_prefix("\n\n").unwrap_or(rest);
            }
            format!("{}{}", &host_text[..marker.start()], rest)
        }
        None => host_text.to_string(),
    }
}

/// Path of the first dangerous key within the scanned depth, if any
pub fn find_dangerous_key(value: &Value) -> Option<String> {
    scan_for_dangerous_key(value, 0)
}

fn scan_for_dangerous_key(value: &Value, depth: usize) -> Option<String> {
    if depth >= DANGEROUS_KEY_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            if DANGEROUS_KEYS.contains(&key.as_str()) {
                Some(key.clone())
            } else {
                scan_for_dangerous_key(child, depth + 1).map(|path| format!("{key}.{path}"))
            }
        }),
        Value::Array(items) => items.iter().enumerate().find_map(|(index, child)| {
            scan_for_dangerous_key(child, depth + 1).map(|path| format!("[{index}].{path}"))
        }),
        _ => None,
    }
}
