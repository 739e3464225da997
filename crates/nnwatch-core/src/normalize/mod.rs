// Normalization of backend payloads into canonical records.
//
// Backends disagree on field names and shapes. Each domain first resolves
// the raw JSON into a closed set of tagged variants, then converts the
// variant into its canonical record. Normalization never fails: anything
// unrecognised degrades to the default shape.

pub mod elo;
pub mod envelope;
pub mod logs;
pub mod tournaments;
pub mod training;

use serde_json::{Map, Value};

use crate::protocol::Domain;
use crate::records::{EloBoard, LogEntry, TournamentSummary, TrainingRecord};

pub use elo::normalize_elo;
pub use envelope::unwrap_envelope;
pub use logs::normalize_logs;
pub use tournaments::normalize_tournaments;
pub use training::normalize_training;

/// A canonical record plus the envelope version it arrived with, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub api_version: Option<String>,
    pub record: T,
}

/// New log data: a full window of the backend tail, or only new lines.
#[derive(Debug, Clone, PartialEq)]
pub enum LogUpdate {
    Snapshot(Vec<LogEntry>),
    Delta(Vec<LogEntry>),
}

impl LogUpdate {
    pub fn entries(&self) -> &[LogEntry] {
        match self {
            LogUpdate::Snapshot(e) | LogUpdate::Delta(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalRecord {
    Training(TrainingRecord),
    Elo(EloBoard),
    Tournaments(Vec<TournamentSummary>),
    Logs(LogUpdate),
}

pub fn normalize(domain: Domain, raw: &Value) -> Normalized<CanonicalRecord> {
    fn lift<T>(
        n: Normalized<T>,
        f: impl FnOnce(T) -> CanonicalRecord,
    ) -> Normalized<CanonicalRecord> {
        Normalized {
            api_version: n.api_version,
            record: f(n.record),
        }
    }
    match domain {
        Domain::Training => lift(normalize_training(raw), CanonicalRecord::Training),
        Domain::Elo => lift(normalize_elo(raw), CanonicalRecord::Elo),
        Domain::Tournaments => lift(normalize_tournaments(raw), CanonicalRecord::Tournaments),
        Domain::Logs => lift(normalize_logs(raw), CanonicalRecord::Logs),
    }
}

/// Several domains delivered together (push `snapshot` messages and the
/// admin snapshot endpoint). Only domains present in the payload are set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotBundle {
    pub api_version: Option<String>,
    pub training: Option<TrainingRecord>,
    pub elo: Option<EloBoard>,
    pub tournaments: Option<Vec<TournamentSummary>>,
    pub logs: Option<LogUpdate>,
}

impl SnapshotBundle {
    pub fn is_empty(&self) -> bool {
        self.training.is_none()
            && self.elo.is_none()
            && self.tournaments.is_none()
            && self.logs.is_none()
    }
}

pub fn normalize_snapshot(raw: &Value) -> SnapshotBundle {
    let (outer_version, body) = unwrap_envelope(raw);
    let mut bundle = SnapshotBundle {
        api_version: outer_version,
        ..Default::default()
    };
    let Some(obj) = body.as_object() else {
        return bundle;
    };

    let mut inner_version = None;
    let mut take_version = |v: Option<String>| {
        if inner_version.is_none() {
            inner_version = v;
        }
    };

    if let Some(raw) = present(obj, "training") {
        let n = normalize_training(raw);
        take_version(n.api_version);
        bundle.training = Some(n.record);
    }
    if let Some(raw) = present(obj, "elo") {
        let n = normalize_elo(raw);
        take_version(n.api_version);
        bundle.elo = Some(n.record);
    }
    if let Some(raw) = present(obj, "tournaments") {
        let n = normalize_tournaments(raw);
        take_version(n.api_version);
        bundle.tournaments = Some(n.record);
    }
    if let Some(raw) = present(obj, "logs") {
        let n = normalize_logs(raw);
        take_version(n.api_version);
        bundle.logs = Some(n.record);
    }

    if bundle.api_version.is_none() {
        bundle.api_version = inner_version;
    }
    bundle
}

fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

// ---------------------------------------------------------------------------
// Alias lookup helpers
// ---------------------------------------------------------------------------

/// Lenient number read: JSON numbers, or numeric strings (a trailing `%` is
/// ignored). Non-finite values are rejected.
pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = as_f64(value)?;
    (f >= 0.0).then(|| f.floor() as u64)
}

pub(crate) fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// First alias, in priority order, whose value converts successfully.
pub(crate) fn first<T>(
    obj: &Map<String, Value>,
    aliases: &[&str],
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    aliases.iter().find_map(|key| obj.get(*key).and_then(&convert))
}

pub(crate) fn first_f64(obj: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    first(obj, aliases, as_f64)
}

pub(crate) fn first_u64(obj: &Map<String, Value>, aliases: &[&str]) -> Option<u64> {
    first(obj, aliases, as_u64)
}

pub(crate) fn first_string(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    first(obj, aliases, as_string)
}

pub(crate) fn first_bool(obj: &Map<String, Value>, aliases: &[&str]) -> Option<bool> {
    first(obj, aliases, as_bool)
}
