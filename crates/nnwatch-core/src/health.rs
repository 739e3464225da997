// Connection health classification.
//
// Warnings are derived purely from receipt timestamps, the connection
// descriptor, the training watch and the declared API version. The monitor
// is the only writer of `meta.warnings` and `meta.offline.active`.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::actions;
use crate::protocol::ConnectionState;
use crate::state::{AppState, Warnings};
use crate::store::{Store, UpdateKind, UpdateMeta};

#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    pub dropped_after: Duration,
    pub stale_after: Duration,
    pub stall_after: Duration,
    pub offline_after: Duration,
    pub expected_api_version: String,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        HealthThresholds {
            dropped_after: Duration::from_secs(5),
            stale_after: Duration::from_secs(10),
            stall_after: Duration::from_secs(120),
            offline_after: Duration::from_secs(20),
            expected_api_version: "1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Health {
    pub warnings: Warnings,
    pub offline_active: bool,
}

fn older_than(now: Instant, at: Instant, limit: Duration) -> bool {
    now.saturating_duration_since(at) > limit
}

pub fn evaluate(state: &AppState, now: Instant, th: &HealthThresholds) -> Health {
    let meta = &state.meta;
    let reference = meta.newest_seen().unwrap_or(meta.started_at);

    let running = state
        .data
        .training
        .as_deref()
        .is_some_and(|t| t.appears_running());
    let advance = meta.training_watch.last_advance_at.unwrap_or(meta.started_at);
    let stall = running && older_than(now, advance, th.stall_after);

    let schema = meta
        .api_version
        .as_deref()
        .is_some_and(|v| v != th.expected_api_version);

    let last_ok = meta.offline.last_ok.unwrap_or(meta.started_at);
    let offline_active = meta.connection.state != ConnectionState::Connected
        && older_than(now, last_ok, th.offline_after);

    Health {
        warnings: Warnings {
            stale: older_than(now, reference, th.stale_after),
            dropped: older_than(now, reference, th.dropped_after),
            stall,
            schema,
        },
        offline_active,
    }
}

/// Runs [`evaluate`] against the store and writes back changes.
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        HealthMonitor { thresholds }
    }

    /// Returns true if the warnings changed.
    pub fn check(&self, store: &mut Store, now: Instant) -> bool {
        let state = store.state();
        let health = evaluate(&state, now, &self.thresholds);
        let before = Health {
            warnings: state.meta.warnings,
            offline_active: state.meta.offline.active,
        };
        if health == before {
            return false;
        }
        info!(
            stale = health.warnings.stale,
            dropped = health.warnings.dropped,
            stall = health.warnings.stall,
            schema = health.warnings.schema,
            offline = health.offline_active,
            "health changed"
        );
        store.update(
            |s| actions::set_health(s, &health),
            UpdateMeta::new(UpdateKind::Warnings),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize_logs, normalize_training};
    use crate::state::Stamp;
    use serde_json::json;
    use std::sync::Arc;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn stale_and_dropped_from_started_at() {
        let t0 = Instant::now();
        let s = AppState::new(t0);
        let th = HealthThresholds::default();

        let h = evaluate(&s, t0 + secs(4), &th);
        assert!(!h.warnings.dropped && !h.warnings.stale);

        let h = evaluate(&s, t0 + secs(6), &th);
        assert!(h.warnings.dropped);
        assert!(!h.warnings.stale);

        let h = evaluate(&s, t0 + secs(11), &th);
        assert!(h.warnings.stale);
    }

    #[test]
    fn receipt_resets_staleness() {
        let t0 = Instant::now();
        let s = Arc::new(AppState::new(t0));
        let s = actions::receive_training(
            &s,
            normalize_training(&json!({"games": 1})),
            Stamp::at(t0 + secs(30)),
        );
        let h = evaluate(&s, t0 + secs(32), &HealthThresholds::default());
        assert!(!h.warnings.stale && !h.warnings.dropped);
    }

    #[test]
    fn schema_mismatch() {
        let t0 = Instant::now();
        let s = Arc::new(AppState::new(t0));
        let s = actions::receive_training(
            &s,
            normalize_training(&json!({"api_version": "2.0", "payload": {}})),
            Stamp::at(t0),
        );
        assert!(evaluate(&s, t0, &HealthThresholds::default()).warnings.schema);

        let s = actions::receive_training(
            &s,
            normalize_training(&json!({"api_version": "1.0", "payload": {}})),
            Stamp::at(t0),
        );
        assert!(!evaluate(&s, t0, &HealthThresholds::default()).warnings.schema);
    }

    #[test]
    fn stall_requires_running_training() {
        let t0 = Instant::now();
        let th = HealthThresholds::default();
        let s = Arc::new(AppState::new(t0));

        let idle = actions::receive_training(
            &s,
            normalize_training(&json!({"games": 5, "state": "paused"})),
            Stamp::at(t0),
        );
        assert!(!evaluate(&idle, t0 + secs(500), &th).warnings.stall);

        let running = actions::receive_training(
            &s,
            normalize_training(&json!({"games": 5, "state": "running"})),
            Stamp::at(t0),
        );
        assert!(!evaluate(&running, t0 + secs(100), &th).warnings.stall);
        assert!(evaluate(&running, t0 + secs(121), &th).warnings.stall);

        let advanced = actions::receive_logs(
            &running,
            normalize_logs(&json!(["[INFO] [TRAIN] step"])),
            Stamp::at(t0 + secs(121)),
        );
        assert!(!evaluate(&advanced, t0 + secs(122), &th).warnings.stall);
    }

    #[test]
    fn offline_only_when_not_connected() {
        let t0 = Instant::now();
        let th = HealthThresholds::default();
        let s = AppState::new(t0);
        assert!(!evaluate(&s, t0 + secs(19), &th).offline_active);
        assert!(evaluate(&s, t0 + secs(21), &th).offline_active);

        let connected = actions::set_connection(
            &Arc::new(s),
            ConnectionState::Connected,
            crate::protocol::TransportKind::Poll,
            0,
            Stamp::at(t0),
        );
        assert!(!evaluate(&connected, t0 + secs(60), &th).offline_active);
    }

    #[test]
    fn monitor_writes_back_only_on_change() {
        let t0 = Instant::now();
        let mut store = Store::new(AppState::new(t0));
        let monitor = HealthMonitor::default();

        assert!(!monitor.check(&mut store, t0 + secs(1)));
        assert_eq!(store.version(), 0);

        assert!(monitor.check(&mut store, t0 + secs(6)));
        assert!(store.state().meta.warnings.dropped);
        assert!(!monitor.check(&mut store, t0 + secs(7)));
        assert_eq!(store.version(), 1);
    }
}
