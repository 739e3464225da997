// Rating leaderboard normalization.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{as_f64, first, first_f64, first_string, first_u64, unwrap_envelope, Normalized};
use crate::records::{EloBoard, EloEntry, VersionRecord, TOP_VERSIONS, UNKNOWN};

const VERSION: &[&str] = &["version", "name", "id", "net"];
const RATING: &[&str] = &["elo", "rating", "score"];
const GAMES: &[&str] = &["games", "n_games", "played"];
const CONFIDENCE: &[&str] = &["confidence", "ci", "interval"];
const SPRT: &[&str] = &["sprt", "sprt_result"];
const WINS: &[&str] = &["wins", "w"];
const LOSSES: &[&str] = &["losses", "loss", "l"];
const DRAWS: &[&str] = &["draws", "d"];
const RANKED_LISTS: &[&str] = &["top", "top5", "ratings"];

/// The accepted rating payload shapes.
#[derive(Debug)]
pub enum RawElo<'a> {
    /// Canonical `{top5?, versions}`; `versions` may be a map or a list.
    Board {
        top5: Option<&'a Vec<Value>>,
        versions: &'a Value,
    },
    /// A ranked list, bare or under `top|top5|ratings`.
    Ranked(&'a Vec<Value>),
    Unrecognized,
}

impl<'a> RawElo<'a> {
    pub fn resolve(body: &'a Value) -> Self {
        match body {
            Value::Array(list) => RawElo::Ranked(list),
            Value::Object(obj) => {
                let versions = obj
                    .get("versions")
                    .filter(|v| v.is_object() || v.is_array());
                if let Some(versions) = versions {
                    return RawElo::Board {
                        top5: obj.get("top5").and_then(Value::as_array),
                        versions,
                    };
                }
                RANKED_LISTS
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_array))
                    .map(RawElo::Ranked)
                    .unwrap_or(RawElo::Unrecognized)
            }
            _ => RawElo::Unrecognized,
        }
    }
}

fn confidence_of(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Array(pair) if pair.len() == 2 => Some((as_f64(&pair[0])?, as_f64(&pair[1])?)),
        Value::Object(obj) => {
            let low = first_f64(obj, &["low", "lo"])?;
            let high = first_f64(obj, &["high", "hi"])?;
            Some((low, high))
        }
        _ => None,
    }
}

/// Parse one version entry. `fallback_name` is the map key when the entry
/// came from a `versions` object. Entries without any name are dropped.
fn parse_version(value: &Value, fallback_name: Option<&str>) -> Option<VersionRecord> {
    let obj = value.as_object()?;
    let version = first_string(obj, VERSION).or_else(|| fallback_name.map(str::to_string))?;
    let elo = first_f64(obj, RATING).unwrap_or(0.0);
    Some(VersionRecord {
        version,
        elo,
        games: first_u64(obj, GAMES).unwrap_or(0),
        wins: first_u64(obj, WINS),
        losses: first_u64(obj, LOSSES),
        draws: first_u64(obj, DRAWS),
        status: first_string(obj, &["status"]).unwrap_or_else(|| UNKNOWN.to_string()),
        sprt: first_string(obj, SPRT).unwrap_or_else(|| UNKNOWN.to_string()),
        confidence: first(obj, CONFIDENCE, confidence_of).unwrap_or((elo, elo)),
    })
}

fn entry_of(v: &VersionRecord) -> EloEntry {
    EloEntry {
        version: v.version.clone(),
        elo: v.elo,
        games: v.games,
        confidence: v.confidence,
    }
}

/// The highest-rated versions, ties broken by name.
fn derive_top(versions: &BTreeMap<String, VersionRecord>) -> Vec<EloEntry> {
    let mut ranked: Vec<&VersionRecord> = versions.values().collect();
    ranked.sort_by(|a, b| b.elo.total_cmp(&a.elo).then_with(|| a.version.cmp(&b.version)));
    ranked.into_iter().take(TOP_VERSIONS).map(entry_of).collect()
}

fn versions_from(value: &Value) -> BTreeMap<String, VersionRecord> {
    let parsed: Vec<VersionRecord> = match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(name, v)| parse_version(v, Some(name)))
            .collect(),
        Value::Array(list) => list.iter().filter_map(|v| parse_version(v, None)).collect(),
        _ => Vec::new(),
    };
    parsed.into_iter().map(|v| (v.version.clone(), v)).collect()
}

fn from_ranked(list: &[Value]) -> EloBoard {
    let parsed: Vec<VersionRecord> = list.iter().filter_map(|v| parse_version(v, None)).collect();
    let top5 = parsed.iter().take(TOP_VERSIONS).map(entry_of).collect();
    let versions = parsed.into_iter().map(|v| (v.version.clone(), v)).collect();
    EloBoard { top5, versions }
}

pub fn normalize_elo(raw: &Value) -> Normalized<EloBoard> {
    let (api_version, body) = unwrap_envelope(raw);
    let record = match RawElo::resolve(body) {
        RawElo::Board { top5, versions } => {
            let versions = versions_from(versions);
            let top5 = match top5 {
                Some(list) => list
                    .iter()
                    .filter_map(|v| parse_version(v, None))
                    .take(TOP_VERSIONS)
                    .map(|v| entry_of(&v))
                    .collect(),
                None => derive_top(&versions),
            };
            EloBoard { top5, versions }
        }
        RawElo::Ranked(list) => from_ranked(list),
        RawElo::Unrecognized => EloBoard::default(),
    };
    Normalized {
        api_version,
        record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn canonical_board_passes_through() {
        let b = normalize_elo(&json!({
            "top5": [{"version": "v2", "elo": 120, "games": 40, "confidence": [100, 140]}],
            "versions": {
                "v2": {"elo": 120, "games": 40, "status": "accepted", "sprt": "H1"},
                "v1": {"elo": 80, "games": 30, "status": "regressed"}
            }
        }))
        .record;
        assert_eq!(b.top5.len(), 1);
        assert_eq!(b.top5[0].confidence, (100.0, 140.0));
        assert_eq!(b.versions["v2"].sprt, "H1");
        assert_eq!(b.versions["v1"].sprt, UNKNOWN);
        assert_eq!(b.regressions().len(), 1);
    }

    #[test]
    fn raw_ranked_list_synthesizes_versions() {
        let b = normalize_elo(&json!({
            "ratings": [
                {"name": "net-7", "rating": 1510, "n_games": 9, "ci": {"lo": 1490, "hi": 1530}},
                {"id": "net-6", "score": 1500, "played": 11}
            ]
        }))
        .record;
        assert_eq!(b.top5.len(), 2);
        assert_eq!(b.top5[0].version, "net-7");
        assert_eq!(b.top5[0].confidence, (1490.0, 1530.0));
        assert_eq!(b.versions["net-6"].confidence, (1500.0, 1500.0));
        assert_eq!(b.versions["net-6"].status, UNKNOWN);
    }

    #[test]
    fn top5_derived_from_versions_when_absent() {
        let mut versions = Map::new();
        for (i, elo) in [10, 70, 30, 50, 90, 20, 60].iter().enumerate() {
            versions.insert(format!("v{i}"), json!({"elo": elo}));
        }
        let b = normalize_elo(&json!({"versions": versions})).record;
        let order: Vec<f64> = b.top5.iter().map(|e| e.elo).collect();
        assert_eq!(order, vec![90.0, 70.0, 60.0, 50.0, 30.0]);
        assert_eq!(b.versions.len(), 7);
    }

    #[test]
    fn bare_array_and_win_loss_aliases() {
        let b = normalize_elo(&json!([{"version": "a", "elo": 1, "w": 3, "l": 2, "d": 1}])).record;
        let v = &b.versions["a"];
        assert_eq!((v.wins, v.losses, v.draws), (Some(3), Some(2), Some(1)));
    }

    #[test]
    fn malformed_degrades_to_empty_board() {
        for raw in [json!(null), json!(5), json!({"versions": 3}), json!([1, "x", null])] {
            let b = normalize_elo(&raw).record;
            assert!(b.top5.is_empty());
            assert!(b.versions.is_empty());
        }
    }
}
