// Application state published by the store.
//
// An `AppState` is never mutated after publication. Transitions clone the
// outer struct and swap the changed subtrees; the large subtrees are `Arc`s
// so unchanged data is shared between successive states.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::logs::view::LogFilter;
use crate::protocol::{ConnectionState, Domain, HeatmapPhase, Tab, TransportKind};
use crate::records::{
    BoundedSeries, EloBoard, EloPoint, LogEntry, Progress, TournamentSummary, TrainingRecord,
};

// ---------------------------------------------------------------------------
// Per-domain maps
// ---------------------------------------------------------------------------

/// One value per data domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerDomain<T> {
    pub training: T,
    pub elo: T,
    pub tournaments: T,
    pub logs: T,
}

impl<T> PerDomain<T> {
    pub fn get(&self, domain: Domain) -> &T {
        match domain {
            Domain::Training => &self.training,
            Domain::Elo => &self.elo,
            Domain::Tournaments => &self.tournaments,
            Domain::Logs => &self.logs,
        }
    }

    pub fn get_mut(&mut self, domain: Domain) -> &mut T {
        match domain {
            Domain::Training => &mut self.training,
            Domain::Elo => &mut self.elo,
            Domain::Tournaments => &mut self.tournaments,
            Domain::Logs => &mut self.logs,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Domain, &T)> {
        Domain::ALL.into_iter().map(move |d| (d, self.get(d)))
    }
}

impl<T: Clone + PartialEq> PerDomain<T> {
    /// Copy with one domain replaced, or `None` if the value is unchanged.
    pub fn with(&self, domain: Domain, value: T) -> Option<PerDomain<T>> {
        if *self.get(domain) == value {
            return None;
        }
        let mut next = self.clone();
        *next.get_mut(domain) = value;
        Some(next)
    }
}

/// Key-wise patch over a [`PerDomain`]; absent keys are left alone.
#[derive(Debug, Clone, PartialEq)]
pub struct PerDomainPatch<T> {
    pub training: Option<T>,
    pub elo: Option<T>,
    pub tournaments: Option<T>,
    pub logs: Option<T>,
}

impl<T> Default for PerDomainPatch<T> {
    fn default() -> Self {
        PerDomainPatch {
            training: None,
            elo: None,
            tournaments: None,
            logs: None,
        }
    }
}

impl<T> PerDomainPatch<T> {
    pub fn set(mut self, domain: Domain, value: T) -> Self {
        let slot = match domain {
            Domain::Training => &mut self.training,
            Domain::Elo => &mut self.elo,
            Domain::Tournaments => &mut self.tournaments,
            Domain::Logs => &mut self.logs,
        };
        *slot = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.training.is_none()
            && self.elo.is_none()
            && self.tournaments.is_none()
            && self.logs.is_none()
    }
}

impl<T: Clone + PartialEq> PerDomainPatch<T> {
    /// Merge one level deep. Returns `None` when no key changes.
    pub fn merged(&self, base: &PerDomain<T>) -> Option<PerDomain<T>> {
        let mut next = base.clone();
        let mut changed = false;
        for domain in Domain::ALL {
            let value = match domain {
                Domain::Training => &self.training,
                Domain::Elo => &self.elo,
                Domain::Tournaments => &self.tournaments,
                Domain::Logs => &self.logs,
            };
            if let Some(v) = value {
                if next.get(domain) != v {
                    *next.get_mut(domain) = v.clone();
                    changed = true;
                }
            }
        }
        changed.then_some(next)
    }
}

// ---------------------------------------------------------------------------
// Subtrees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Data {
    pub training: Option<Arc<TrainingRecord>>,
    pub elo: Option<Arc<EloBoard>>,
    pub elo_live_history: Arc<BTreeMap<String, BoundedSeries<EloPoint>>>,
    pub tournaments: Arc<Vec<TournamentSummary>>,
    pub logs: Arc<Vec<LogEntry>>,
    pub progress: Progress,
}

impl Default for Data {
    fn default() -> Self {
        Data {
            training: None,
            elo: None,
            elo_live_history: Arc::new(BTreeMap::new()),
            tournaments: Arc::new(Vec::new()),
            logs: Arc::new(Vec::new()),
            progress: Progress::default(),
        }
    }
}

impl Data {
    pub fn has(&self, domain: Domain) -> bool {
        match domain {
            Domain::Training => self.training.is_some(),
            Domain::Elo => self.elo.is_some(),
            Domain::Tournaments => !self.tournaments.is_empty(),
            Domain::Logs => !self.logs.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub state: ConnectionState,
    pub transport: TransportKind,
    pub retries: u32,
    pub last_change: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Warnings {
    pub stale: bool,
    pub dropped: bool,
    pub stall: bool,
    pub schema: bool,
}

impl Warnings {
    pub fn any(&self) -> bool {
        self.stale || self.dropped || self.stall || self.schema
    }
}

/// Progress markers used by stall detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingWatch {
    pub last_games: Option<u64>,
    pub last_games_at: Option<Instant>,
    pub last_log_key: Option<String>,
    pub last_log_at: Option<Instant>,
    pub last_advance_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offline {
    pub active: bool,
    pub last_ok: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct Meta {
    pub connection: Connection,
    pub warnings: Warnings,
    pub last_seen: PerDomain<Option<Instant>>,
    pub last_updated: PerDomain<Option<DateTime<Utc>>>,
    pub training_watch: TrainingWatch,
    pub offline: Offline,
    pub api_version: Option<String>,
    pub session_start: Option<DateTime<Utc>>,
    pub missing: PerDomain<u32>,
    pub log_resets: u32,
    pub started_at: Instant,
}

impl Meta {
    /// Newest receipt across all domains.
    pub fn newest_seen(&self) -> Option<Instant> {
        self.last_seen.iter().filter_map(|(_, t)| *t).max()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Explain {
    pub open: bool,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminResult {
    pub action: String,
    pub ok: bool,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminUi {
    pub enabled: bool,
    pub last_result: Option<AdminResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ui {
    pub explain: Explain,
    pub logs: LogFilter,
    pub admin: AdminUi,
    pub opened: BTreeSet<Tab>,
}

impl Default for Ui {
    fn default() -> Self {
        Ui {
            explain: Explain::default(),
            logs: LogFilter::default(),
            admin: AdminUi::default(),
            opened: BTreeSet::from([Tab::Overview]),
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AppState {
    pub active_tab: Tab,
    pub active_heatmap_phase: HeatmapPhase,
    pub loading: PerDomain<bool>,
    pub error: PerDomain<Option<String>>,
    pub data: Data,
    pub meta: Meta,
    pub ui: Ui,
}

impl AppState {
    pub fn new(started_at: Instant) -> Self {
        AppState {
            active_tab: Tab::default(),
            active_heatmap_phase: HeatmapPhase::default(),
            loading: PerDomain::default(),
            error: PerDomain::default(),
            data: Data::default(),
            meta: Meta {
                connection: Connection {
                    state: ConnectionState::Disconnected,
                    transport: TransportKind::Ws,
                    retries: 0,
                    last_change: started_at,
                },
                warnings: Warnings::default(),
                last_seen: PerDomain::default(),
                last_updated: PerDomain::default(),
                training_watch: TrainingWatch::default(),
                offline: Offline::default(),
                api_version: None,
                session_start: None,
                missing: PerDomain::default(),
                log_resets: 0,
                started_at,
            },
            ui: Ui::default(),
        }
    }
}

/// Monotonic and wall-clock time of a transition. Actions take the stamp as
/// an argument so they stay deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    pub now: Instant,
    pub wall: DateTime<Utc>,
}

impl Stamp {
    pub fn now() -> Self {
        Stamp {
            now: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub fn at(now: Instant) -> Self {
        Stamp {
            now,
            wall: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_domain_with_detects_no_change() {
        let map: PerDomain<bool> = PerDomain::default();
        assert!(map.with(Domain::Elo, false).is_none());
        let next = map.with(Domain::Elo, true).unwrap();
        assert!(next.elo);
        assert!(!next.training);
    }

    #[test]
    fn patch_merges_only_present_keys() {
        let base = PerDomain {
            training: true,
            elo: false,
            tournaments: true,
            logs: false,
        };
        let patch = PerDomainPatch::default().set(Domain::Elo, true);
        let merged = patch.merged(&base).unwrap();
        assert_eq!(
            merged,
            PerDomain {
                training: true,
                elo: true,
                tournaments: true,
                logs: false,
            }
        );

        let noop = PerDomainPatch::default().set(Domain::Training, true);
        assert!(noop.merged(&base).is_none());
    }

    #[test]
    fn initial_state_defaults() {
        let t0 = Instant::now();
        let s = AppState::new(t0);
        assert_eq!(s.active_tab, Tab::Overview);
        assert_eq!(s.meta.connection.state, ConnectionState::Disconnected);
        assert!(s.ui.opened.contains(&Tab::Overview));
        assert!(s.meta.newest_seen().is_none());
        assert!(!s.data.has(Domain::Logs));
    }
}
