// Canonical record types produced by the normalization layer.
//
// Every field is always populated: numbers default to 0, optional values to
// `None`, free-text status fields to "unknown", and collections to empty.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "unknown";

/// Maximum number of live rating points kept per version.
pub const MAX_ELO_POINTS: usize = 60;

/// Number of entries exposed in `EloBoard::top5`.
pub const TOP_VERSIONS: usize = 5;

fn unknown() -> String {
    UNKNOWN.to_string()
}

// ---------------------------------------------------------------------------
// Progress helpers
// ---------------------------------------------------------------------------

/// Clamp a fraction into `[0, 1]`; non-finite input yields `None`.
pub fn clamp_fraction(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Interpret a progress number that may be either a fraction (`<= 1`) or a
/// 0-100 percentage (`> 1`), returning a clamped fraction.
pub fn fraction_from_any_scale(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let fraction = if value > 1.0 { value / 100.0 } else { value };
    clamp_fraction(fraction)
}

/// Training progress as shown in the header bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Always `None` or within `[0, 1]`.
    pub percent: Option<f64>,
    pub text: Option<String>,
}

impl Progress {
    pub fn new(percent: Option<f64>, text: Option<String>) -> Self {
        Progress {
            percent: percent.and_then(clamp_fraction),
            text,
        }
    }
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingRecord {
    pub games: u64,
    pub loss: Option<f64>,
    pub lr: Option<f64>,
    pub target_games: Option<u64>,
    pub progress_percent: Option<f64>,
    pub progress_text: Option<String>,
    pub status_text: String,
    pub status_state: String,
    pub running: Option<bool>,
    pub started_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Default for TrainingRecord {
    fn default() -> Self {
        TrainingRecord {
            games: 0,
            loss: None,
            lr: None,
            target_games: None,
            progress_percent: None,
            progress_text: None,
            status_text: unknown(),
            status_state: unknown(),
            running: None,
            started_at: None,
            updated_at: None,
        }
    }
}

const RUNNING_WORDS: &[&str] = &["running", "training", "active", "in progress"];
const IDLE_WORDS: &[&str] = &[
    "stopped", "paused", "finished", "done", "idle", "complete", "error", "failed",
];

impl TrainingRecord {
    pub fn progress(&self) -> Progress {
        Progress::new(self.progress_percent, self.progress_text.clone())
    }

    /// Status line for display: explicit status text, else the state, else
    /// "unknown".
    pub fn display_status(&self) -> &str {
        if self.status_text != UNKNOWN && !self.status_text.is_empty() {
            &self.status_text
        } else {
            &self.status_state
        }
    }

    /// Heuristic "is training actively running" used by stall detection.
    ///
    /// An explicit boolean wins. Otherwise the state and status text are
    /// scanned: any idle word vetoes, any running word confirms.
    pub fn appears_running(&self) -> bool {
        if let Some(running) = self.running {
            return running;
        }
        let haystack = format!("{} {}", self.status_state, self.status_text).to_lowercase();
        if IDLE_WORDS.iter().any(|w| haystack.contains(w)) {
            return false;
        }
        RUNNING_WORDS.iter().any(|w| haystack.contains(w))
    }
}

// ---------------------------------------------------------------------------
// Ratings
// ---------------------------------------------------------------------------

/// One row of the top-versions leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EloEntry {
    pub version: String,
    pub elo: f64,
    pub games: u64,
    /// `(low, high)`; equals `(elo, elo)` when the backend sends no interval.
    pub confidence: (f64, f64),
}

/// Detailed evaluation record for one network version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    pub elo: f64,
    pub games: u64,
    pub wins: Option<u64>,
    pub losses: Option<u64>,
    pub draws: Option<u64>,
    pub status: String,
    pub sprt: String,
    pub confidence: (f64, f64),
}

impl VersionRecord {
    /// Explanation shown in the version detail panel.
    pub fn explain_note(&self) -> &'static str {
        match self.status.as_str() {
            "accepted" => "Statistically better than baseline.",
            "rejected" => "Failed SPRT or marked bad.",
            "regressed" => "Performance regression detected.",
            _ => "Stable version.",
        }
    }

    pub fn is_regression(&self) -> bool {
        matches!(self.status.as_str(), "regressed" | "rejected")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EloBoard {
    pub top5: Vec<EloEntry>,
    pub versions: BTreeMap<String, VersionRecord>,
}

impl EloBoard {
    /// Versions flagged as regressed or rejected, in version order.
    pub fn regressions(&self) -> Vec<&VersionRecord> {
        self.versions.values().filter(|v| v.is_regression()).collect()
    }
}

/// A single locally-accumulated rating sample.
#[derive(Debug, Clone, PartialEq)]
pub struct EloPoint {
    pub elo: f64,
    pub low: f64,
    pub high: f64,
    pub at: DateTime<Utc>,
}

/// Fixed-capacity series that evicts its oldest element on overflow.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedSeries<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> BoundedSeries<T> {
    pub fn new(cap: usize) -> Self {
        BoundedSeries {
            cap: cap.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        while self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

// ---------------------------------------------------------------------------
// Tournaments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentSummary {
    pub name: String,
    pub games: u64,
    pub winner: String,
    pub status: String,
}

impl Default for TournamentSummary {
    fn default() -> Self {
        TournamentSummary {
            name: unknown(),
            games: 0,
            winner: unknown(),
            status: unknown(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// One log line with its stable dedup key and pre-formatted display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: String,
    pub line: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_subsystem")]
    pub subsystem: String,
    #[serde(default)]
    pub message: String,
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_subsystem() -> String {
    "MISC".to_string()
}

impl LogEntry {
    /// Build an entry from its parts, deriving `key` and `line` when the
    /// backend did not supply them.
    pub fn from_parts(
        ts: &str,
        level: &str,
        subsystem: &str,
        message: &str,
        key: Option<&str>,
        line: Option<&str>,
    ) -> LogEntry {
        let key = match key {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => format!("{ts}|{level}|{subsystem}|{message}"),
        };
        let line = match line {
            Some(l) if !l.is_empty() => l.to_string(),
            _ if ts.is_empty() => format!("[{level}] [{subsystem}] {message}"),
            _ => format!("[{ts}] [{level}] [{subsystem}] {message}"),
        };
        LogEntry {
            key,
            line,
            ts: ts.to_string(),
            level: level.to_string(),
            subsystem: subsystem.to_string(),
            message: message.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Format an elapsed duration as `"{m}m"` or `"{h}h {m}m"`.
pub fn format_duration(elapsed: Duration) -> String {
    let total_min = elapsed.as_secs() / 60;
    let hours = total_min / 60;
    let minutes = total_min % 60;
    if hours == 0 {
        format!("{minutes}m")
    } else {
        format!("{hours}h {minutes}m")
    }
}
