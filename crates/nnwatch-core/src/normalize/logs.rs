// Log payload normalization.

use serde_json::{Map, Value};

use super::{first_string, unwrap_envelope, LogUpdate, Normalized};
use crate::records::LogEntry;

const TS: &[&str] = &["ts", "timestamp", "time"];
const LEVEL: &[&str] = &["level", "severity", "lvl"];
const SUBSYSTEM: &[&str] = &["subsystem", "category", "component", "source"];
const MESSAGE: &[&str] = &["message", "msg", "text"];
const KEY: &[&str] = &["key", "id"];

const KNOWN_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "FATAL"];

/// The accepted log payload shapes.
#[derive(Debug)]
pub enum RawLogs<'a> {
    Array(&'a Vec<Value>),
    /// Newline-separated text.
    Text(&'a str),
    /// `{entries|lines: ...}`, or `{append: [...]}`. `delta` is set for the
    /// append forms.
    Wrapped { inner: &'a Value, delta: bool },
    Empty,
}

impl<'a> RawLogs<'a> {
    pub fn resolve(body: &'a Value) -> Self {
        match body {
            Value::Array(list) => RawLogs::Array(list),
            Value::String(text) => RawLogs::Text(text),
            Value::Object(obj) => {
                if let Some(inner) = obj.get("append").filter(|v| !v.is_null()) {
                    return RawLogs::Wrapped { inner, delta: true };
                }
                let delta = obj.get("mode").and_then(Value::as_str) == Some("append");
                ["entries", "lines"]
                    .iter()
                    .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
                    .map(|inner| RawLogs::Wrapped { inner, delta })
                    .unwrap_or(RawLogs::Empty)
            }
            _ => RawLogs::Empty,
        }
    }
}

fn entries_of(raw: &RawLogs<'_>) -> Vec<LogEntry> {
    match raw {
        RawLogs::Array(list) => list.iter().filter_map(entry_from_value).collect(),
        RawLogs::Text(text) => text
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .map(parse_line)
            .collect(),
        RawLogs::Wrapped { inner, .. } => match RawLogs::resolve(inner) {
            // Nested wrappers are not unwrapped a second time.
            RawLogs::Wrapped { .. } => Vec::new(),
            nested => entries_of(&nested),
        },
        RawLogs::Empty => Vec::new(),
    }
}

pub fn normalize_logs(raw: &Value) -> Normalized<LogUpdate> {
    let (api_version, body) = unwrap_envelope(raw);
    let resolved = RawLogs::resolve(body);
    let entries = entries_of(&resolved);
    let record = match resolved {
        RawLogs::Wrapped { delta: true, .. } => LogUpdate::Delta(entries),
        _ => LogUpdate::Snapshot(entries),
    };
    Normalized {
        api_version,
        record,
    }
}

fn entry_from_value(value: &Value) -> Option<LogEntry> {
    match value {
        Value::String(line) if !line.trim().is_empty() => Some(parse_line(line.trim_end())),
        Value::Object(obj) => Some(entry_from_object(obj)),
        _ => None,
    }
}

fn entry_from_object(obj: &Map<String, Value>) -> LogEntry {
    let line = first_string(obj, &["line"]);
    let message = first_string(obj, MESSAGE);

    // An object carrying only a raw line is parsed like plain text.
    if let (Some(line), None) = (&line, &message) {
        let parsed = parse_line(line);
        return match first_string(obj, KEY) {
            Some(key) => LogEntry { key, ..parsed },
            None => parsed,
        };
    }

    let ts = first_string(obj, TS).unwrap_or_default();
    let level = first_string(obj, LEVEL)
        .map(|l| l.trim().to_ascii_uppercase())
        .unwrap_or_else(|| "INFO".to_string());
    let subsystem = first_string(obj, SUBSYSTEM)
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_else(|| "MISC".to_string());
    let key = first_string(obj, KEY);
    LogEntry::from_parts(
        &ts,
        &level,
        &subsystem,
        message.as_deref().unwrap_or_default(),
        key.as_deref(),
        line.as_deref(),
    )
}

/// Split leading `[..]` segments off a raw line.
fn bracket_segments(line: &str) -> (Vec<&str>, &str) {
    let mut segments = Vec::new();
    let mut rest = line.trim_start();
    while segments.len() < 3 {
        let Some(body) = rest.strip_prefix('[') else {
            break;
        };
        let Some(end) = body.find(']') else {
            break;
        };
        segments.push(body[..end].trim());
        rest = body[end + 1..].trim_start();
    }
    (segments, rest)
}

fn is_level(tag: &str) -> bool {
    KNOWN_LEVELS.contains(&tag.to_ascii_uppercase().as_str())
}

/// Parse a raw `[ts] [LEVEL] [SUBSYSTEM] message` line. Missing segments
/// are inferred: a level-looking tag is the level, otherwise the first tag
/// is the timestamp. Unbracketed text is scanned for a severity word.
pub fn parse_line(line: &str) -> LogEntry {
    let (segments, message) = bracket_segments(line);
    let (ts, level, subsystem) = match segments.as_slice() {
        [ts, level, sub] => (*ts, level.to_ascii_uppercase(), sub.to_ascii_uppercase()),
        [a, b] if is_level(a) => ("", a.to_ascii_uppercase(), b.to_ascii_uppercase()),
        [ts, level] => (*ts, level.to_ascii_uppercase(), "MISC".to_string()),
        [a] if is_level(a) => ("", a.to_ascii_uppercase(), "MISC".to_string()),
        [ts] => (*ts, "INFO".to_string(), "MISC".to_string()),
        _ => {
            let upper = line.to_ascii_uppercase();
            let level = if upper.contains("ERROR") || upper.contains("FATAL") {
                "ERROR"
            } else if upper.contains("WARN") {
                "WARN"
            } else {
                "INFO"
            };
            ("", level.to_string(), "MISC".to_string())
        }
    };
    let message = if segments.is_empty() { line.trim() } else { message };
    LogEntry::from_parts(ts, &level, &subsystem, message, None, Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(v: Value) -> Vec<LogEntry> {
        match normalize_logs(&v).record {
            LogUpdate::Snapshot(e) => e,
            LogUpdate::Delta(_) => panic!("expected snapshot"),
        }
    }

    #[test]
    fn parses_full_bracketed_line() {
        let e = parse_line("[2024-01-01 10:00:00] [WARN] [IO] disk slow");
        assert_eq!(e.ts, "2024-01-01 10:00:00");
        assert_eq!(e.level, "WARN");
        assert_eq!(e.subsystem, "IO");
        assert_eq!(e.message, "disk slow");
        assert_eq!(e.line, "[2024-01-01 10:00:00] [WARN] [IO] disk slow");
        assert_eq!(e.key, "2024-01-01 10:00:00|WARN|IO|disk slow");
    }

    #[test]
    fn infers_missing_segments() {
        let e = parse_line("[error] [train] nan loss");
        assert_eq!((e.ts.as_str(), e.level.as_str(), e.subsystem.as_str()), ("", "ERROR", "TRAIN"));

        let e = parse_line("plain FATAL crash");
        assert_eq!(e.level, "ERROR");
        assert_eq!(e.message, "plain FATAL crash");
        assert_eq!(e.subsystem, "MISC");
    }

    #[test]
    fn text_payload_splits_non_empty_lines() {
        let e = snapshot(json!("[INFO] [TRAIN] a\n\n  \n[INFO] [EVAL] b\n"));
        assert_eq!(e.len(), 2);
        assert_eq!(e[1].subsystem, "EVAL");
    }

    #[test]
    fn structured_objects_keep_explicit_key_and_line() {
        let e = snapshot(json!([
            {"key": "k-1", "ts": "t", "level": "warn", "subsystem": "io", "message": "m"},
            {
                "time": "t2",
                "severity": "ERROR",
                "component": "EVAL",
                "msg": "boom",
                "line": "custom"
            },
            {"line": "[t3] [INFO] [TOURNAMENT] round 2", "id": 99},
            42,
            null
        ]));
        assert_eq!(e.len(), 3);
        assert_eq!(e[0].key, "k-1");
        assert_eq!(e[0].line, "[t] [WARN] [IO] m");
        assert_eq!(e[1].line, "custom");
        assert_eq!(e[1].key, "t2|ERROR|EVAL|boom");
        assert_eq!(e[2].subsystem, "TOURNAMENT");
        assert_eq!(e[2].key, "99");
    }

    #[test]
    fn wrapped_snapshot_and_delta_forms() {
        let e = snapshot(json!({"entries": ["[INFO] [IO] x"]}));
        assert_eq!(e.len(), 1);
        let e = snapshot(json!({"lines": "[INFO] [IO] x\n[INFO] [IO] y"}));
        assert_eq!(e.len(), 2);

        match normalize_logs(&json!({"mode": "append", "lines": ["[INFO] [IO] z"]})).record {
            LogUpdate::Delta(e) => assert_eq!(e.len(), 1),
            other => panic!("expected delta, got {other:?}"),
        }
        match normalize_logs(&json!({"append": ["a", "b"]})).record {
            LogUpdate::Delta(e) => assert_eq!(e.len(), 2),
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_empty_snapshot() {
        assert!(snapshot(json!(null)).is_empty());
        assert!(snapshot(json!(3.5)).is_empty());
        assert!(snapshot(json!({"foo": 1})).is_empty());
        assert!(snapshot(json!({"entries": {"entries": ["x"]}})).is_empty());
    }
}
