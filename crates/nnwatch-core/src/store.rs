// Versioned state container with change notification.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::protocol::{Domain, HeatmapPhase, Tab};
use crate::records::Progress;
use crate::state::{AppState, PerDomainPatch};

/// What kind of transition produced a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    ActiveTab,
    HeatmapPhase,
    Explain,
    LogFilter,
    Admin,
    Loading,
    Error,
    Missing,
    Training,
    Elo,
    Tournaments,
    LogsSnapshot,
    LogsAppend,
    Progress,
    Connection,
    Warnings,
    Hydrate,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateMeta {
    pub kind: UpdateKind,
    pub domain: Option<Domain>,
}

impl UpdateMeta {
    pub fn new(kind: UpdateKind) -> Self {
        UpdateMeta { kind, domain: None }
    }

    pub fn for_domain(kind: UpdateKind, domain: Domain) -> Self {
        UpdateMeta {
            kind,
            domain: Some(domain),
        }
    }
}

/// Partial update for [`Store::merge`]. Per-domain maps merge key-wise;
/// every other present field overwrites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub active_tab: Option<Tab>,
    pub active_heatmap_phase: Option<HeatmapPhase>,
    pub loading: PerDomainPatch<bool>,
    pub error: PerDomainPatch<Option<String>>,
    pub progress: Option<Progress>,
}

/// Apply a patch; returns the input `Arc` when nothing changes.
pub fn apply_patch(state: &Arc<AppState>, patch: &StatePatch) -> Arc<AppState> {
    let mut next: Option<AppState> = None;

    if let Some(tab) = patch.active_tab {
        if tab != state.active_tab {
            let s = next.get_or_insert_with(|| AppState::clone(state));
            s.active_tab = tab;
            s.ui.opened.insert(tab);
        }
    }
    if let Some(phase) = patch.active_heatmap_phase {
        if phase != state.active_heatmap_phase {
            next.get_or_insert_with(|| AppState::clone(state)).active_heatmap_phase = phase;
        }
    }
    if let Some(loading) = patch.loading.merged(&state.loading) {
        next.get_or_insert_with(|| AppState::clone(state)).loading = loading;
    }
    if let Some(error) = patch.error.merged(&state.error) {
        next.get_or_insert_with(|| AppState::clone(state)).error = error;
    }
    if let Some(progress) = &patch.progress {
        let progress = Progress::new(progress.percent, progress.text.clone());
        if progress != state.data.progress {
            next.get_or_insert_with(|| AppState::clone(state)).data.progress = progress;
        }
    }

    match next {
        Some(s) => Arc::new(s),
        None => Arc::clone(state),
    }
}

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&Arc<AppState>, &UpdateMeta) + Send>;

pub struct Store {
    state: Arc<AppState>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: SubscriptionId,
    version: u64,
}

impl Store {
    pub fn new(initial: AppState) -> Self {
        Store {
            state: Arc::new(initial),
            subscribers: Vec::new(),
            next_id: 1,
            version: 0,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Number of published transitions so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Run a transition. Subscribers are notified only if `f` returns a
    /// state that is not pointer-equal to the current one.
    pub fn update<F>(&mut self, f: F, meta: UpdateMeta) -> bool
    where
        F: FnOnce(&Arc<AppState>) -> Arc<AppState>,
    {
        let next = f(&self.state);
        if Arc::ptr_eq(&next, &self.state) {
            return false;
        }
        self.state = next;
        self.version += 1;
        debug!(kind = ?meta.kind, domain = ?meta.domain, version = self.version, "state updated");
        self.notify(&meta);
        true
    }

    pub fn merge(&mut self, patch: StatePatch, meta: UpdateMeta) -> bool {
        self.update(|s| apply_patch(s, &patch), meta)
    }

    pub fn subscribe<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&Arc<AppState>, &UpdateMeta) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, Box::new(f)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    fn notify(&mut self, meta: &UpdateMeta) {
        let state = Arc::clone(&self.state);
        for (id, subscriber) in self.subscribers.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber(&state, meta)));
            if outcome.is_err() {
                warn!(subscriber = *id, kind = ?meta.kind, "subscriber panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn store() -> Store {
        Store::new(AppState::new(Instant::now()))
    }

    #[test]
    fn notifies_only_on_new_arc() {
        let mut store = store();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        store.subscribe(move |_, meta| sink.lock().unwrap().push(meta.kind));

        let changed = store.update(Arc::clone, UpdateMeta::new(UpdateKind::Merge));
        assert!(!changed);
        assert!(hits.lock().unwrap().is_empty());
        assert_eq!(store.version(), 0);

        let changed = store.update(
            |s| {
                let mut next = AppState::clone(s);
                next.active_tab = Tab::Logs;
                Arc::new(next)
            },
            UpdateMeta::new(UpdateKind::ActiveTab),
        );
        assert!(changed);
        assert_eq!(*hits.lock().unwrap(), vec![UpdateKind::ActiveTab]);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn merge_without_change_keeps_same_arc() {
        let mut store = store();
        let before = store.state();
        let patch = StatePatch {
            active_tab: Some(Tab::Overview),
            loading: PerDomainPatch::default().set(Domain::Elo, false),
            ..Default::default()
        };
        assert!(!store.merge(patch, UpdateMeta::new(UpdateKind::Merge)));
        assert!(Arc::ptr_eq(&before, &store.state()));
    }

    #[test]
    fn merge_is_key_wise_for_per_domain_maps() {
        let mut store = store();
        store.merge(
            StatePatch {
                loading: PerDomainPatch::default().set(Domain::Training, true),
                ..Default::default()
            },
            UpdateMeta::new(UpdateKind::Loading),
        );
        store.merge(
            StatePatch {
                loading: PerDomainPatch::default().set(Domain::Elo, true),
                error: PerDomainPatch::default().set(Domain::Logs, Some("down".into())),
                ..Default::default()
            },
            UpdateMeta::new(UpdateKind::Loading),
        );
        let s = store.state();
        assert!(s.loading.training);
        assert!(s.loading.elo);
        assert_eq!(s.error.logs.as_deref(), Some("down"));

        // Explicit None overwrites.
        store.merge(
            StatePatch {
                error: PerDomainPatch::default().set(Domain::Logs, None),
                ..Default::default()
            },
            UpdateMeta::new(UpdateKind::Error),
        );
        assert!(store.state().error.logs.is_none());
    }

    #[test]
    fn merge_clamps_progress() {
        let mut store = store();
        store.merge(
            StatePatch {
                progress: Some(Progress {
                    percent: Some(3.0),
                    text: None,
                }),
                ..Default::default()
            },
            UpdateMeta::new(UpdateKind::Progress),
        );
        assert_eq!(store.state().data.progress.percent, Some(1.0));
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let mut store = store();
        let seen = Arc::new(Mutex::new(0));
        store.subscribe(|_, _| panic!("subscriber bug"));
        let sink = Arc::clone(&seen);
        store.subscribe(move |_, _| *sink.lock().unwrap() += 1);

        store.merge(
            StatePatch {
                active_tab: Some(Tab::Elo),
                ..Default::default()
            },
            UpdateMeta::new(UpdateKind::ActiveTab),
        );
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(store.state().active_tab, Tab::Elo);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut store = store();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |_, _| *sink.lock().unwrap() += 1);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));

        store.merge(
            StatePatch {
                active_tab: Some(Tab::Logs),
                ..Default::default()
            },
            UpdateMeta::new(UpdateKind::ActiveTab),
        );
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
