// Durable snapshot of the parts of the state worth restoring after a
// restart: selected tab and phase, last training snapshot, the newest log
// lines, and the log filter.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::logs::view::{LevelFilter, LogFilter, LogWindow, SubsystemFilter};
use crate::logs::PERSISTED_LOG_LINES;
use crate::protocol::{HeatmapPhase, Tab};
use crate::records::{LogEntry, Progress, TrainingRecord};
use crate::state::AppState;
use crate::store::UpdateKind;

pub const STATE_KEY: &str = "nnwatch.state.v1";
pub const ADMIN_KEY: &str = "nnwatch.admin.v1";
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Minimal key-value storage.
pub trait KvStorage: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process storage, shared between clones. Used by tests and as a
/// fallback when no database is configured.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KvStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("storage is read-only");
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persisted layout
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState<'a> {
    active_tab: Tab,
    active_heatmap_phase: HeatmapPhase,
    data: PersistedData<'a>,
    ui: PersistedUi<'a>,
}

#[derive(Serialize)]
struct PersistedData<'a> {
    training: Option<&'a TrainingRecord>,
    progress: &'a Progress,
    logs: &'a [LogEntry],
}

#[derive(Serialize)]
struct PersistedUi<'a> {
    logs: &'a LogFilter,
    opened: &'a BTreeSet<Tab>,
}

fn serialize_state(state: &AppState) -> Result<String> {
    let logs = &state.data.logs[state.data.logs.len().saturating_sub(PERSISTED_LOG_LINES)..];
    let persisted = PersistedState {
        active_tab: state.active_tab,
        active_heatmap_phase: state.active_heatmap_phase,
        data: PersistedData {
            training: state.data.training.as_deref(),
            progress: &state.data.progress,
            logs,
        },
        ui: PersistedUi {
            logs: &state.ui.logs,
            opened: &state.ui.opened,
        },
    };
    Ok(serde_json::to_string(&persisted)?)
}

fn restore_log_filter(raw: &Map<String, Value>) -> LogFilter {
    let mut filter = LogFilter::default();
    let text = |key: &str| raw.get(key).and_then(Value::as_str);
    if let Some(level) = text("level").and_then(LevelFilter::parse) {
        filter.level = level;
    }
    if let Some(subsystem) = text("subsystem").and_then(SubsystemFilter::parse) {
        filter.subsystem = subsystem;
    }
    if let Some(window) = text("window").and_then(LogWindow::parse) {
        filter.window = window;
    }
    if let Some(n) = raw.get("n").and_then(Value::as_u64).filter(|n| *n >= 1) {
        filter.n = n as usize;
    }
    if let Some(paused) = raw.get("paused").and_then(Value::as_bool) {
        filter.paused = paused;
    }
    filter
}

/// Apply a persisted blob on top of `state`. Each field is restored on its
/// own; a missing or invalid field keeps the value already in `state`.
fn restore(state: &mut AppState, blob: &Map<String, Value>) {
    let tab = blob
        .get("activeTab")
        .and_then(Value::as_str)
        .and_then(Tab::from_name);
    if let Some(tab) = tab {
        state.active_tab = tab;
    }
    if let Some(phase) = blob.get("activeHeatmapPhase").and_then(Value::as_str) {
        state.active_heatmap_phase = HeatmapPhase::parse(phase);
    }

    if let Some(data) = blob.get("data").and_then(Value::as_object) {
        if let Some(training) = data
            .get("training")
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value::<TrainingRecord>(v.clone()).ok())
        {
            state.data.training = Some(Arc::new(training));
        }
        if let Some(progress) = data
            .get("progress")
            .and_then(|v| serde_json::from_value::<Progress>(v.clone()).ok())
        {
            state.data.progress = Progress::new(progress.percent, progress.text);
        }
        if let Some(list) = data.get("logs").and_then(Value::as_array) {
            let start = list.len().saturating_sub(PERSISTED_LOG_LINES);
            let logs: Vec<LogEntry> = list[start..]
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect();
            state.data.logs = Arc::new(logs);
        }
    }

    if let Some(ui) = blob.get("ui").and_then(Value::as_object) {
        if let Some(filter) = ui.get("logs").and_then(Value::as_object) {
            state.ui.logs = restore_log_filter(filter);
        }
        if let Some(opened) = ui.get("opened").and_then(Value::as_array) {
            state.ui.opened.extend(
                opened
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(Tab::from_name),
            );
        }
    }
    state.ui.opened.insert(state.active_tab);
}

// ---------------------------------------------------------------------------
// PersistenceManager
// ---------------------------------------------------------------------------

pub struct PersistenceManager {
    storage: Box<dyn KvStorage>,
    debounce: Duration,
    last_written: Option<String>,
    dirty: bool,
}

impl PersistenceManager {
    pub fn new(storage: Box<dyn KvStorage>, debounce: Duration) -> Self {
        PersistenceManager {
            storage,
            debounce,
            last_written: None,
            dirty: false,
        }
    }

    /// Restore persisted fields into `state`. Storage errors and malformed
    /// blobs leave the state fields untouched; the admin flag lives under
    /// its own key and is applied regardless.
    pub fn hydrate(&mut self, state: &Arc<AppState>) -> Arc<AppState> {
        let admin = self.load_admin_flag();
        let blob = self.load_blob();
        if blob.is_none() && admin == state.ui.admin.enabled {
            return Arc::clone(state);
        }

        let mut next = AppState::clone(state);
        next.ui.admin.enabled = admin;
        let Some(blob) = blob else {
            debug!(admin, "no persisted state; applied admin flag");
            return Arc::new(next);
        };
        restore(&mut next, &blob);
        info!(
            tab = next.active_tab.as_str(),
            logs = next.data.logs.len(),
            training = next.data.training.is_some(),
            "restored persisted state"
        );
        Arc::new(next)
    }

    fn load_blob(&self) -> Option<Map<String, Value>> {
        let raw = match self.storage.get(STATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("failed to read persisted state: {e:#}");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(blob)) => Some(blob),
            Ok(_) => {
                warn!("persisted state is not an object; ignoring");
                None
            }
            Err(e) => {
                warn!("persisted state is not valid JSON; ignoring: {e}");
                None
            }
        }
    }

    pub fn load_admin_flag(&self) -> bool {
        match self.storage.get(ADMIN_KEY) {
            Ok(Some(v)) => matches!(v.trim(), "true" | "1"),
            Ok(None) => false,
            Err(e) => {
                debug!("failed to read admin flag: {e:#}");
                false
            }
        }
    }

    pub fn save_admin(&mut self, enabled: bool) {
        let value = if enabled { "true" } else { "false" };
        if let Err(e) = self.storage.set(ADMIN_KEY, value) {
            warn!("failed to persist admin flag: {e:#}");
        }
    }

    /// Note a state transition. Returns the flush deadline when `kind`
    /// touches persisted fields; each qualifying call pushes it out again.
    pub fn observe(&mut self, kind: UpdateKind, now: Instant) -> Option<Instant> {
        let qualifies = matches!(
            kind,
            UpdateKind::ActiveTab
                | UpdateKind::HeatmapPhase
                | UpdateKind::Training
                | UpdateKind::Progress
                | UpdateKind::LogsSnapshot
                | UpdateKind::LogsAppend
                | UpdateKind::LogFilter
        );
        if !qualifies {
            return None;
        }
        self.dirty = true;
        Some(now + self.debounce)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the persisted layout of `state`. Skips the write when the
    /// payload is identical to the previous one. Returns true if written.
    pub fn flush(&mut self, state: &AppState) -> bool {
        self.dirty = false;
        let payload = match serialize_state(state) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to serialize state for persistence: {e:#}");
                return false;
            }
        };
        if self.last_written.as_deref() == Some(payload.as_str()) {
            return false;
        }
        match self.storage.set(STATE_KEY, &payload) {
            Ok(()) => {
                debug!(bytes = payload.len(), "persisted state");
                self.last_written = Some(payload);
                true
            }
            Err(e) => {
                warn!("failed to persist state: {e:#}");
                false
            }
        }
    }
}
