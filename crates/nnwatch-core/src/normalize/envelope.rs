// Versioned envelope `{api_version | apiVersion, payload}`.

use serde_json::Value;

use super::as_string;

const VERSION_KEYS: [&str; 2] = ["api_version", "apiVersion"];

/// Split an envelope into its declared version and payload. Anything that
/// is not an envelope is returned unchanged with no version.
///
/// An object counts as an envelope when it has `payload` and a version key,
/// or when `payload` is its only key.
pub fn unwrap_envelope(raw: &Value) -> (Option<String>, &Value) {
    let Some(obj) = raw.as_object() else {
        return (None, raw);
    };
    let Some(payload) = obj.get("payload") else {
        return (None, raw);
    };
    let version = VERSION_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(as_string));
    let has_version_key = VERSION_KEYS.iter().any(|k| obj.contains_key(*k));
    if has_version_key || obj.len() == 1 {
        (version, payload)
    } else {
        (None, raw)
    }
}
