// Tournament summary normalization.

use serde_json::Value;

use super::{as_string, first_string, first_u64, unwrap_envelope, Normalized};
use crate::records::{TournamentSummary, UNKNOWN};

const NAME: &[&str] = &["name", "title", "id"];
const GAMES: &[&str] = &["games", "n_games", "total_games"];
const WINNER: &[&str] = &["winner", "champion", "leader"];

#[derive(Debug)]
pub enum RawTournaments<'a> {
    List(&'a Vec<Value>),
    /// `{tournaments|items: [...]}`
    Wrapped(&'a Vec<Value>),
    Empty,
}

impl<'a> RawTournaments<'a> {
    pub fn resolve(body: &'a Value) -> Self {
        match body {
            Value::Array(list) => RawTournaments::List(list),
            Value::Object(obj) => ["tournaments", "items"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_array))
                .map(RawTournaments::Wrapped)
                .unwrap_or(RawTournaments::Empty),
            _ => RawTournaments::Empty,
        }
    }
}

fn summary_from(value: &Value) -> Option<TournamentSummary> {
    match value {
        Value::Object(obj) => Some(TournamentSummary {
            name: first_string(obj, NAME).unwrap_or_else(|| UNKNOWN.to_string()),
            games: first_u64(obj, GAMES).unwrap_or(0),
            winner: first_string(obj, WINNER).unwrap_or_else(|| UNKNOWN.to_string()),
            status: first_string(obj, &["status"]).unwrap_or_else(|| UNKNOWN.to_string()),
        }),
        // A bare name is a tournament with nothing else known.
        Value::String(_) => as_string(value).map(|name| TournamentSummary {
            name,
            ..TournamentSummary::default()
        }),
        _ => None,
    }
}

pub fn normalize_tournaments(raw: &Value) -> Normalized<Vec<TournamentSummary>> {
    let (api_version, body) = unwrap_envelope(raw);
    let record = match RawTournaments::resolve(body) {
        RawTournaments::List(list) | RawTournaments::Wrapped(list) => {
            list.iter().filter_map(summary_from).collect()
        }
        RawTournaments::Empty => Vec::new(),
    };
    Normalized {
        api_version,
        record,
    }
}
