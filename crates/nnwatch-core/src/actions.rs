// Pure state transitions.
//
// Each action takes the current state and returns the next one. When
// nothing changes the input `Arc` is returned as-is, so the store can skip
// notification by pointer comparison.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::health::Health;
use crate::logs::reconcile::{append_delta, reconcile, ReconcileMode, Reconciled};
use crate::logs::view::LogFilterPatch;
use crate::normalize::{LogUpdate, Normalized};
use crate::protocol::{ConnectionState, Domain, HeatmapPhase, Tab, TransportKind};
use crate::records::{
    BoundedSeries, EloBoard, EloPoint, Progress, TournamentSummary, TrainingRecord, MAX_ELO_POINTS,
};
use crate::state::{AdminResult, AppState, Stamp};

fn edit(state: &Arc<AppState>, f: impl FnOnce(&mut AppState)) -> Arc<AppState> {
    let mut next = AppState::clone(state);
    f(&mut next);
    Arc::new(next)
}

/// Bookkeeping shared by every successful receipt.
fn mark_received(s: &mut AppState, domain: Domain, api_version: Option<String>, at: Stamp) {
    *s.meta.last_seen.get_mut(domain) = Some(at.now);
    *s.meta.last_updated.get_mut(domain) = Some(at.wall);
    *s.error.get_mut(domain) = None;
    *s.meta.missing.get_mut(domain) = 0;
    s.meta.offline.last_ok = Some(at.now);
    if api_version.is_some() {
        s.meta.api_version = api_version;
    }
}

// ---------------------------------------------------------------------------
// Data receipts
// ---------------------------------------------------------------------------

pub fn receive_training(
    state: &Arc<AppState>,
    update: Normalized<TrainingRecord>,
    at: Stamp,
) -> Arc<AppState> {
    let Normalized {
        api_version,
        record,
    } = update;
    edit(state, |s| {
        let progress = record.progress();
        if progress.percent.is_some() || progress.text.is_some() {
            s.data.progress = progress;
        }

        let watch = &mut s.meta.training_watch;
        match watch.last_games {
            Some(prev) if record.games > prev => watch.last_advance_at = Some(at.now),
            None => watch.last_advance_at = watch.last_advance_at.or(Some(at.now)),
            _ => {}
        }
        if watch.last_games != Some(record.games) {
            watch.last_games = Some(record.games);
            watch.last_games_at = Some(at.now);
        }

        if s.meta.session_start.is_none() {
            let declared = record
                .started_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc));
            s.meta.session_start = Some(declared.unwrap_or(at.wall));
        }

        s.data.training = match &s.data.training {
            Some(existing) if **existing == record => Some(Arc::clone(existing)),
            _ => Some(Arc::new(record)),
        };
        mark_received(s, Domain::Training, api_version, at);
    })
}

pub fn receive_elo(
    state: &Arc<AppState>,
    update: Normalized<EloBoard>,
    at: Stamp,
) -> Arc<AppState> {
    let Normalized {
        api_version,
        record,
    } = update;
    edit(state, |s| {
        if !record.top5.is_empty() {
            let mut live: BTreeMap<String, BoundedSeries<EloPoint>> =
                s.data.elo_live_history.as_ref().clone();
            for entry in &record.top5 {
                live.entry(entry.version.clone())
                    .or_insert_with(|| BoundedSeries::new(MAX_ELO_POINTS))
                    .push(EloPoint {
                        elo: entry.elo,
                        low: entry.confidence.0,
                        high: entry.confidence.1,
                        at: at.wall,
                    });
            }
            s.data.elo_live_history = Arc::new(live);
        }

        s.data.elo = match &s.data.elo {
            Some(existing) if **existing == record => Some(Arc::clone(existing)),
            _ => Some(Arc::new(record)),
        };
        mark_received(s, Domain::Elo, api_version, at);
    })
}

pub fn receive_tournaments(
    state: &Arc<AppState>,
    update: Normalized<Vec<TournamentSummary>>,
    at: Stamp,
) -> Arc<AppState> {
    let Normalized {
        api_version,
        record,
    } = update;
    edit(state, |s| {
        if *s.data.tournaments != record {
            s.data.tournaments = Arc::new(record);
        }
        mark_received(s, Domain::Tournaments, api_version, at);
    })
}

pub fn receive_logs(
    state: &Arc<AppState>,
    update: Normalized<LogUpdate>,
    at: Stamp,
) -> Arc<AppState> {
    let Normalized {
        api_version,
        record,
    } = update;
    let Reconciled {
        mode,
        next,
        appended,
        history_reset,
    } = match &record {
        LogUpdate::Snapshot(entries) => reconcile(&state.data.logs, entries),
        LogUpdate::Delta(entries) => append_delta(&state.data.logs, entries),
    };

    edit(state, |s| {
        if history_reset {
            s.meta.log_resets += 1;
            warn!(
                previous = state.data.logs.len(),
                replacement = next.len(),
                resets = s.meta.log_resets,
                "log history reset: no overlap with the previous buffer"
            );
        }
        if mode != ReconcileMode::Noop {
            debug!(?mode, appended = appended.len(), total = next.len(), "logs reconciled");
            s.data.logs = Arc::new(next);
        }

        let last_key = s.data.logs.last().map(|e| e.key.clone());
        let watch = &mut s.meta.training_watch;
        if last_key.is_some() && last_key != watch.last_log_key {
            watch.last_log_key = last_key;
            watch.last_log_at = Some(at.now);
            watch.last_advance_at = Some(at.now);
        }
        mark_received(s, Domain::Logs, api_version, at);
    })
}

// ---------------------------------------------------------------------------
// Fetch bookkeeping
// ---------------------------------------------------------------------------

pub fn set_loading(state: &Arc<AppState>, domain: Domain, loading: bool) -> Arc<AppState> {
    match state.loading.with(domain, loading) {
        Some(next) => edit(state, |s| s.loading = next),
        None => Arc::clone(state),
    }
}

pub fn set_error(state: &Arc<AppState>, domain: Domain, message: Option<String>) -> Arc<AppState> {
    match state.error.with(domain, message) {
        Some(next) => edit(state, |s| s.error = next),
        None => Arc::clone(state),
    }
}

/// A refresh of `domain` failed at the transport level.
pub fn record_failure(state: &Arc<AppState>, domain: Domain) -> Arc<AppState> {
    set_error(state, domain, Some(domain.unavailable_message().to_string()))
}

/// The endpoint for `domain` answered 404. The backend is reachable, the
/// domain just has nothing to serve.
pub fn record_missing(state: &Arc<AppState>, domain: Domain, at: Stamp) -> Arc<AppState> {
    edit(state, |s| {
        *s.meta.missing.get_mut(domain) += 1;
        *s.error.get_mut(domain) = None;
        s.meta.offline.last_ok = Some(at.now);
    })
}

// ---------------------------------------------------------------------------
// Derived meta
// ---------------------------------------------------------------------------

pub fn set_connection(
    state: &Arc<AppState>,
    conn_state: ConnectionState,
    transport: TransportKind,
    retries: u32,
    at: Stamp,
) -> Arc<AppState> {
    let current = &state.meta.connection;
    if current.state == conn_state && current.transport == transport && current.retries == retries {
        return Arc::clone(state);
    }
    let moved = current.state != conn_state || current.transport != transport;
    edit(state, |s| {
        let c = &mut s.meta.connection;
        c.state = conn_state;
        c.transport = transport;
        c.retries = retries;
        if moved {
            c.last_change = at.now;
        }
    })
}

pub fn set_health(state: &Arc<AppState>, health: &Health) -> Arc<AppState> {
    if state.meta.warnings == health.warnings
        && state.meta.offline.active == health.offline_active
    {
        return Arc::clone(state);
    }
    edit(state, |s| {
        s.meta.warnings = health.warnings;
        s.meta.offline.active = health.offline_active;
    })
}

// ---------------------------------------------------------------------------
// UI
// ---------------------------------------------------------------------------

pub fn set_active_tab(state: &Arc<AppState>, tab: Tab) -> Arc<AppState> {
    if state.active_tab == tab && state.ui.opened.contains(&tab) {
        return Arc::clone(state);
    }
    edit(state, |s| {
        s.active_tab = tab;
        s.ui.opened.insert(tab);
    })
}

pub fn set_heatmap_phase(state: &Arc<AppState>, phase: HeatmapPhase) -> Arc<AppState> {
    if state.active_heatmap_phase == phase {
        return Arc::clone(state);
    }
    edit(state, |s| s.active_heatmap_phase = phase)
}

pub fn open_explain(state: &Arc<AppState>, version: &str) -> Arc<AppState> {
    let explain = &state.ui.explain;
    if explain.open && explain.version.as_deref() == Some(version) {
        return Arc::clone(state);
    }
    edit(state, |s| {
        s.ui.explain.open = true;
        s.ui.explain.version = Some(version.to_string());
    })
}

pub fn close_explain(state: &Arc<AppState>) -> Arc<AppState> {
    if !state.ui.explain.open && state.ui.explain.version.is_none() {
        return Arc::clone(state);
    }
    edit(state, |s| {
        s.ui.explain.open = false;
        s.ui.explain.version = None;
    })
}

pub fn set_log_filter(state: &Arc<AppState>, patch: &LogFilterPatch) -> Arc<AppState> {
    match state.ui.logs.patched(patch) {
        Some(filter) => edit(state, |s| s.ui.logs = filter),
        None => Arc::clone(state),
    }
}

pub fn set_admin_enabled(state: &Arc<AppState>, enabled: bool) -> Arc<AppState> {
    if state.ui.admin.enabled == enabled {
        return Arc::clone(state);
    }
    edit(state, |s| s.ui.admin.enabled = enabled)
}

pub fn set_admin_result(state: &Arc<AppState>, result: AdminResult) -> Arc<AppState> {
    edit(state, |s| s.ui.admin.last_result = Some(result))
}

pub fn set_progress(state: &Arc<AppState>, progress: Progress) -> Arc<AppState> {
    let progress = Progress::new(progress.percent, progress.text);
    if state.data.progress == progress {
        return Arc::clone(state);
    }
    edit(state, |s| s.data.progress = progress)
}
