// Training status normalization.

use serde_json::{Map, Value};

use super::{as_f64, first_bool, first_f64, first_string, first_u64, unwrap_envelope, Normalized};
use crate::records::{clamp_fraction, fraction_from_any_scale, TrainingRecord, UNKNOWN};

const GAMES: &[&str] = &["games", "games_played", "gamesPlayed", "total_games_played"];
const LOSS: &[&str] = &["loss", "train_loss", "trainLoss"];
const LR: &[&str] = &["lr", "learning_rate", "learningRate", "temperature"];
const TARGET: &[&str] = &["target_games", "total_games", "max_games", "target"];
const STATUS_TEXT: &[&str] = &["status_text", "statusText", "status", "message"];
const STATUS_STATE: &[&str] = &["state", "status_state", "phase"];
const RUNNING: &[&str] = &["running", "is_running", "isRunning", "active"];
const STARTED: &[&str] = &["started_at", "startedAt", "start_time"];
const UPDATED: &[&str] = &["updated_at", "updatedAt", "timestamp"];

const FLAT_PERCENT: &[&str] = &[
    "progress_percent",
    "progressPercent",
    "progress_pct",
    "percent",
    "pct",
];
const FLAT_TEXT: &[&str] = &["progress_text", "progressText"];

const NESTED_PERCENT: &[&str] = &["percent", "fraction", "value", "pct"];
const NESTED_TEXT: &[&str] = &["text", "label", "message"];
const NESTED_CURRENT: &[&str] = &["current", "done"];

/// The accepted training payload shapes.
#[derive(Debug)]
pub enum RawTraining<'a> {
    Object(&'a Map<String, Value>),
    Unrecognized,
}

impl<'a> RawTraining<'a> {
    pub fn resolve(body: &'a Value) -> Self {
        match body.as_object() {
            Some(obj) => RawTraining::Object(obj),
            None => RawTraining::Unrecognized,
        }
    }
}

/// Where the progress value came from, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProgress {
    /// `progress: <number>`; a fraction or a 0-100 percentage.
    Bare(f64),
    /// `progress: {percent|fraction|value|pct, current|done, total, text}`.
    Nested {
        percent: Option<f64>,
        current: Option<f64>,
        total: Option<f64>,
    },
    /// A flat top-level percent alias.
    Flat(f64),
    /// Derived from `games / target_games`.
    Ratio { games: u64, target: u64 },
    Absent,
}

impl RawProgress {
    pub fn resolve(obj: &Map<String, Value>, games: u64, target: Option<u64>) -> RawProgress {
        if let Some(v) = obj.get("progress") {
            if let Some(n) = as_f64(v) {
                return RawProgress::Bare(n);
            }
            if let Value::Object(nested) = v {
                let percent = first_f64(nested, NESTED_PERCENT);
                let current = first_f64(nested, NESTED_CURRENT);
                let total = first_f64(nested, &["total"]);
                let usable = percent.is_some()
                    || matches!((current, total), (Some(_), Some(t)) if t > 0.0);
                if usable {
                    return RawProgress::Nested {
                        percent,
                        current,
                        total,
                    };
                }
            }
        }
        if let Some(flat) = first_f64(obj, FLAT_PERCENT) {
            return RawProgress::Flat(flat);
        }
        match target {
            Some(target) if target > 0 => RawProgress::Ratio { games, target },
            _ => RawProgress::Absent,
        }
    }

    /// Fraction in `[0, 1]`, or `None`.
    pub fn fraction(&self) -> Option<f64> {
        match *self {
            RawProgress::Bare(v) | RawProgress::Flat(v) => fraction_from_any_scale(v),
            RawProgress::Nested {
                percent: Some(p), ..
            } => fraction_from_any_scale(p),
            RawProgress::Nested {
                percent: None,
                current: Some(c),
                total: Some(t),
            } if t > 0.0 => clamp_fraction(c / t),
            RawProgress::Nested { .. } => None,
            RawProgress::Ratio { games, target } => clamp_fraction(games as f64 / target as f64),
            RawProgress::Absent => None,
        }
    }
}

fn progress_text(obj: &Map<String, Value>) -> Option<String> {
    let nested = obj
        .get("progress")
        .and_then(Value::as_object)
        .and_then(|nested| first_string(nested, NESTED_TEXT));
    nested.or_else(|| first_string(obj, FLAT_TEXT))
}

pub fn normalize_training(raw: &Value) -> Normalized<TrainingRecord> {
    let (api_version, body) = unwrap_envelope(raw);
    let record = match RawTraining::resolve(body) {
        RawTraining::Object(obj) => from_object(obj),
        RawTraining::Unrecognized => TrainingRecord::default(),
    };
    Normalized {
        api_version,
        record,
    }
}

fn from_object(obj: &Map<String, Value>) -> TrainingRecord {
    let games = first_u64(obj, GAMES).unwrap_or(0);
    let target_games = first_u64(obj, TARGET);
    let progress = RawProgress::resolve(obj, games, target_games);

    TrainingRecord {
        games,
        loss: first_f64(obj, LOSS),
        lr: first_f64(obj, LR),
        target_games,
        progress_percent: progress.fraction(),
        progress_text: progress_text(obj),
        status_text: first_string(obj, STATUS_TEXT).unwrap_or_else(|| UNKNOWN.to_string()),
        status_state: first_string(obj, STATUS_STATE).unwrap_or_else(|| UNKNOWN.to_string()),
        running: first_bool(obj, RUNNING),
        started_at: first_string(obj, STARTED),
        updated_at: first_string(obj, UPDATED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm(v: Value) -> TrainingRecord {
        normalize_training(&v).record
    }

    #[test]
    fn percentage_scale_is_clamped() {
        assert_eq!(norm(json!({"progress": 150})).progress_percent, Some(1.0));
        assert_eq!(norm(json!({"progress": 42})).progress_percent, Some(0.42));
        assert_eq!(norm(json!({"progress": 0.3})).progress_percent, Some(0.3));
    }

    #[test]
    fn aliases_in_priority_order() {
        let t = norm(json!({
            "gamesPlayed": 11,
            "games_played": 12,
            "trainLoss": 0.5,
            "learningRate": 0.01,
            "statusText": "epoch 3",
            "phase": "running",
            "isRunning": true,
            "startedAt": "2024-01-01T00:00:00Z",
            "timestamp": 1700000000
        }));
        assert_eq!(t.games, 12);
        assert_eq!(t.loss, Some(0.5));
        assert_eq!(t.lr, Some(0.01));
        assert_eq!(t.status_text, "epoch 3");
        assert_eq!(t.status_state, "running");
        assert_eq!(t.running, Some(true));
        assert_eq!(t.started_at.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(t.updated_at.as_deref(), Some("1700000000"));
    }

    #[test]
    fn nested_progress_object() {
        let t = norm(json!({"progress": {"pct": 25, "label": "quarter"}}));
        assert_eq!(t.progress_percent, Some(0.25));
        assert_eq!(t.progress_text.as_deref(), Some("quarter"));

        let t = norm(json!({"progress": {"current": 3, "total": 12}}));
        assert_eq!(t.progress_percent, Some(0.25));
    }

    #[test]
    fn flat_then_ratio_fallbacks() {
        let t = norm(json!({"progressPercent": 50, "progress_text": "half"}));
        assert_eq!(t.progress_percent, Some(0.5));
        assert_eq!(t.progress_text.as_deref(), Some("half"));

        let t = norm(json!({"games": 30, "max_games": 120}));
        assert_eq!(t.progress_percent, Some(0.25));

        let t = norm(json!({"games": 30, "target": 0}));
        assert_eq!(t.progress_percent, None);
    }

    #[test]
    fn nested_without_value_falls_through() {
        let t = norm(json!({"progress": {"text": "warming up"}, "percent": 10}));
        assert_eq!(t.progress_percent, Some(0.1));
        assert_eq!(t.progress_text.as_deref(), Some("warming up"));
    }

    #[test]
    fn malformed_input_yields_defaults() {
        for raw in [json!(null), json!("oops"), json!([1, 2]), json!({"games": "many"})] {
            let t = norm(raw);
            assert_eq!(t.games, 0);
            assert_eq!(t.status_text, UNKNOWN);
            assert_eq!(t.status_state, UNKNOWN);
            assert_eq!(t.progress_percent, None);
        }
    }

    #[test]
    fn non_finite_progress_is_none() {
        let t = norm(json!({"progress": "NaN"}));
        assert_eq!(t.progress_percent, None);
    }

    #[test]
    fn envelope_version_propagates() {
        let n = normalize_training(&json!({"api_version": "2.0", "payload": {"games": 1}}));
        assert_eq!(n.api_version.as_deref(), Some("2.0"));
        assert_eq!(n.record.games, 1);
    }
}
