// Sync engine: owns the store, the transport machine and every timer, and
// drives them from a single select loop.
//
// Network work (push sources, poll batches, admin calls) runs in spawned
// tasks that report back over channels. Everything that touches state
// happens on the engine task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actions;
use crate::admin::{self, AdminAction, AdminApi, AdminError, DEFAULT_ADMIN_TIMEOUT};
use crate::health::{HealthMonitor, HealthThresholds};
use crate::logs::view::LogFilterPatch;
use crate::normalize::{normalize, normalize_snapshot, CanonicalRecord, LogUpdate, Normalized};
use crate::persist::{KvStorage, PersistenceManager, DEFAULT_DEBOUNCE};
use crate::protocol::{Domain, HeatmapPhase, PushMessage, Tab, TransportKind};
use crate::records::TrainingRecord;
use crate::scheduler::{Scheduler, TimerHandle, TimerKind};
use crate::state::{AdminResult, AppState, PerDomainPatch, Stamp};
use crate::store::{StatePatch, Store, SubscriptionId, UpdateKind, UpdateMeta};
use crate::transport::machine::{
    Action, Input, PollHealth, TransportMachine, DEFAULT_CONNECT_TIMEOUT,
};
use crate::transport::poll::{
    polled_domains, run_batch, FetchOutcome, Fetcher, PollBatch, DEFAULT_FETCH_TIMEOUT,
};
use crate::transport::{AttemptId, PushSource, TransportEvent, TransportEventKind};

const CHANNEL_CAPACITY: usize = 256;

/// Timing knobs and health thresholds for one engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub health_interval: Duration,
    pub connect_timeout: Duration,
    pub fetch_timeout: Duration,
    pub admin_timeout: Duration,
    pub persist_debounce: Duration,
    /// Upper bound of the uniform jitter added to reconnect backoff.
    pub max_jitter: Duration,
    pub thresholds: HealthThresholds,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval: Duration::from_secs(2),
            health_interval: Duration::from_secs(1),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            admin_timeout: DEFAULT_ADMIN_TIMEOUT,
            persist_debounce: DEFAULT_DEBOUNCE,
            max_jitter: Duration::from_millis(250),
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Requests from the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Unknown tab names select the overview.
    SetActiveTab(String),
    SetHeatmapPhase(String),
    OpenExplain(String),
    CloseExplain,
    SetLogFilter(LogFilterPatch),
    SetAdminEnabled(bool),
    Admin(AdminAction),
    RetryNow,
    Shutdown,
}

struct PushTask {
    attempt: AttemptId,
    handle: JoinHandle<()>,
}

pub struct Engine {
    settings: SyncSettings,
    store: Store,
    machine: TransportMachine,
    scheduler: Scheduler,
    health: HealthMonitor,
    persistence: PersistenceManager,

    fetcher: Arc<dyn Fetcher>,
    sources: Vec<Arc<dyn PushSource>>,
    admin: Option<Arc<dyn AdminApi>>,

    poll_health: PollHealth,
    poll_in_flight: bool,
    push_task: Option<PushTask>,
    connect_timer: Option<(AttemptId, TimerHandle)>,

    transport_tx: mpsc::Sender<TransportEvent>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    poll_tx: mpsc::Sender<PollBatch>,
    poll_rx: mpsc::Receiver<PollBatch>,
    admin_tx: mpsc::Sender<(AdminAction, Result<Value, AdminError>)>,
    admin_rx: mpsc::Receiver<(AdminAction, Result<Value, AdminError>)>,
}

impl Engine {
    /// Build an engine and restore persisted state from `storage`.
    pub fn new(
        settings: SyncSettings,
        storage: Box<dyn KvStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let mut persistence = PersistenceManager::new(storage, settings.persist_debounce);
        let initial = Arc::new(AppState::new(Instant::now()));
        let hydrated = persistence.hydrate(&initial);

        let (transport_tx, transport_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (poll_tx, poll_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (admin_tx, admin_rx) = mpsc::channel(CHANNEL_CAPACITY);

        Engine {
            machine: TransportMachine::new(settings.connect_timeout),
            health: HealthMonitor::new(settings.thresholds.clone()),
            store: Store::new(AppState::clone(&hydrated)),
            scheduler: Scheduler::new(),
            persistence,
            settings,
            fetcher,
            sources: Vec::new(),
            admin: None,
            poll_health: PollHealth::Unknown,
            poll_in_flight: false,
            push_task: None,
            connect_timer: None,
            transport_tx,
            transport_rx,
            poll_tx,
            poll_rx,
            admin_tx,
            admin_rx,
        }
    }

    /// Register a push transport. At most one source per kind is used.
    pub fn with_push_source(mut self, source: Arc<dyn PushSource>) -> Self {
        self.sources.retain(|s| s.kind() != source.kind());
        self.sources.push(source);
        self
    }

    pub fn with_admin(mut self, api: Arc<dyn AdminApi>) -> Self {
        self.admin = Some(api);
        self
    }

    pub fn subscribe<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&Arc<AppState>, &UpdateMeta) + Send + 'static,
    {
        self.store.subscribe(f)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    pub fn state(&self) -> Arc<AppState> {
        self.store.state()
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run until `Command::Shutdown` or until the command channel closes.
    /// Returns the final state after the shutdown flush.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) -> Arc<AppState> {
        info!("sync engine started");
        let now = Instant::now();
        self.scheduler
            .schedule(TimerKind::HealthTick, now, self.settings.health_interval);
        self.step(Input::Start);

        loop {
            let deadline = self.scheduler.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(event) = self.transport_rx.recv() => {
                    self.on_transport_event(event);
                }
                Some(batch) = self.poll_rx.recv() => {
                    self.on_poll_batch(batch);
                }
                Some((action, result)) = self.admin_rx.recv() => {
                    self.on_admin_result(action, result);
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) => {
                            info!("shutdown requested");
                            break;
                        }
                        Some(cmd) => self.on_command(cmd),
                        None => {
                            info!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = timer => {
                    self.on_timers();
                }
            }
        }

        self.shutdown()
    }

    fn shutdown(mut self) -> Arc<AppState> {
        if let Some(task) = self.push_task.take() {
            task.handle.abort();
        }
        let state = self.store.state();
        if self.persistence.is_dirty() {
            self.persistence.flush(&state);
        }
        info!(updates = self.store.version(), "sync engine stopped");
        state
    }

    // -----------------------------------------------------------------------
    // Store helpers
    // -----------------------------------------------------------------------

    /// Run a transition and arm the persistence debounce when it qualifies.
    fn apply<F>(&mut self, meta: UpdateMeta, f: F) -> bool
    where
        F: FnOnce(&Arc<AppState>) -> Arc<AppState>,
    {
        let changed = self.store.update(f, meta);
        if changed {
            self.observe(meta.kind);
        }
        changed
    }

    fn merge(&mut self, patch: StatePatch, meta: UpdateMeta) -> bool {
        let changed = self.store.merge(patch, meta);
        if changed {
            self.observe(meta.kind);
        }
        changed
    }

    fn observe(&mut self, kind: UpdateKind) {
        if let Some(deadline) = self.persistence.observe(kind, Instant::now()) {
            self.scheduler.schedule_at(TimerKind::PersistFlush, deadline);
        }
    }

    fn flush(&mut self) {
        let state = self.store.state();
        self.persistence.flush(&state);
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    fn jitter(&self) -> Duration {
        let max = self.settings.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// Feed one input to the machine and carry out the resulting actions.
    /// Actions can produce follow-up inputs (a spawn with no source fails
    /// at once); those are processed before returning.
    fn step(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let jitter = self.jitter();
            for action in self.machine.handle(input, jitter) {
                if let Some(follow_up) = self.execute(action) {
                    queue.push_back(follow_up);
                }
            }
        }
        self.refresh_connection();
    }

    fn execute(&mut self, action: Action) -> Option<Input> {
        let now = Instant::now();
        match action {
            Action::Spawn { kind, attempt } => return self.spawn_source(kind, attempt),
            Action::Abort { attempt } => {
                if self.push_task.as_ref().is_some_and(|t| t.attempt == attempt) {
                    if let Some(task) = self.push_task.take() {
                        task.handle.abort();
                    }
                }
            }
            Action::ArmConnectTimeout { attempt, after } => {
                let handle = self.scheduler.schedule(TimerKind::ConnectTimeout, now, after);
                self.connect_timer = Some((attempt, handle));
            }
            Action::CancelConnectTimeout => {
                if let Some((_, handle)) = self.connect_timer.take() {
                    self.scheduler.cancel(handle);
                }
            }
            Action::ScheduleReconnect { after } => {
                debug!(after_ms = after.as_millis() as u64, "reconnect scheduled");
                self.scheduler.schedule(TimerKind::Reconnect, now, after);
            }
            Action::CancelReconnect => {
                self.scheduler.cancel_kind(TimerKind::Reconnect);
            }
            Action::StartPolling => {
                info!("polling started");
                self.poll_health = PollHealth::Unknown;
                self.scheduler.schedule_at(TimerKind::PollTick, now);
            }
            Action::StopPolling => {
                info!("polling stopped");
                self.poll_health = PollHealth::Unknown;
                self.scheduler.cancel_kind(TimerKind::PollTick);
            }
        }
        None
    }

    fn spawn_source(&mut self, kind: TransportKind, attempt: AttemptId) -> Option<Input> {
        if let Some(previous) = self.push_task.take() {
            previous.handle.abort();
        }
        let Some(source) = self.sources.iter().find(|s| s.kind() == kind).cloned() else {
            debug!(transport = kind.as_str(), "no source configured for transport");
            return Some(Input::Failed { attempt });
        };
        let tx = self.transport_tx.clone();
        let handle = tokio::spawn(async move { source.run(attempt, tx).await });
        self.push_task = Some(PushTask { attempt, handle });
        None
    }

    fn refresh_connection(&mut self) {
        let (conn_state, kind) = self.machine.descriptor(self.poll_health);
        let retries = self.machine.retries();
        let at = Stamp::now();
        self.apply(UpdateMeta::new(UpdateKind::Connection), |s| {
            actions::set_connection(s, conn_state, kind, retries, at)
        });
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let attempt = event.attempt;
        if !self.machine.is_live(attempt) {
            debug!(
                attempt,
                transport = event.transport.as_str(),
                "discarding event from stale attempt"
            );
            return;
        }
        match event.kind {
            TransportEventKind::Opened => self.step(Input::Opened { attempt }),
            TransportEventKind::Message(text) => {
                self.step(Input::Message { attempt });
                self.dispatch_push(&text);
            }
            TransportEventKind::Closed => self.step(Input::Closed { attempt }),
            TransportEventKind::Failed(reason) => {
                warn!(
                    transport = event.transport.as_str(),
                    attempt,
                    "push transport failed: {reason}"
                );
                self.step(Input::Failed { attempt });
            }
        }
    }

    fn dispatch_push(&mut self, text: &str) {
        let Some(message) = PushMessage::parse(text) else {
            debug!("ignoring unrecognized push message");
            return;
        };
        debug!(kind = message.type_name(), "push message");
        let at = Stamp::now();
        match message {
            PushMessage::Training(raw) => self.receive(Domain::Training, &raw, at),
            PushMessage::Elo(raw) => self.receive(Domain::Elo, &raw, at),
            PushMessage::Tournaments(raw) => self.receive(Domain::Tournaments, &raw, at),
            PushMessage::Logs(raw) => self.receive(Domain::Logs, &raw, at),
            PushMessage::Snapshot(raw) => self.receive_snapshot(&raw, at),
        }
    }

    // -----------------------------------------------------------------------
    // Data receipts
    // -----------------------------------------------------------------------

    fn receive(&mut self, domain: Domain, raw: &Value, at: Stamp) {
        let Normalized {
            api_version,
            record,
        } = normalize(domain, raw);
        match record {
            CanonicalRecord::Training(record) => self.receive_training(api_version, record, at),
            CanonicalRecord::Elo(record) => {
                self.apply(UpdateMeta::for_domain(UpdateKind::Elo, domain), |s| {
                    actions::receive_elo(s, Normalized { api_version, record }, at)
                });
            }
            CanonicalRecord::Tournaments(record) => {
                self.apply(UpdateMeta::for_domain(UpdateKind::Tournaments, domain), |s| {
                    actions::receive_tournaments(s, Normalized { api_version, record }, at)
                });
            }
            CanonicalRecord::Logs(record) => self.receive_logs(api_version, record, at),
        }
    }

    fn receive_training(&mut self, api_version: Option<String>, record: TrainingRecord, at: Stamp) {
        self.apply(UpdateMeta::for_domain(UpdateKind::Training, Domain::Training), |s| {
            actions::receive_training(s, Normalized { api_version, record }, at)
        });
    }

    fn receive_logs(&mut self, api_version: Option<String>, record: LogUpdate, at: Stamp) {
        let kind = match record {
            LogUpdate::Snapshot(_) => UpdateKind::LogsSnapshot,
            LogUpdate::Delta(_) => UpdateKind::LogsAppend,
        };
        self.apply(UpdateMeta::for_domain(kind, Domain::Logs), |s| {
            actions::receive_logs(s, Normalized { api_version, record }, at)
        });
    }

    fn receive_snapshot(&mut self, raw: &Value, at: Stamp) {
        let bundle = normalize_snapshot(raw);
        if bundle.is_empty() {
            debug!("snapshot carried no recognized domains");
            return;
        }
        let version = bundle.api_version;
        if let Some(record) = bundle.training {
            self.receive_training(version.clone(), record, at);
        }
        if let Some(record) = bundle.elo {
            let api_version = version.clone();
            self.apply(UpdateMeta::for_domain(UpdateKind::Elo, Domain::Elo), |s| {
                actions::receive_elo(s, Normalized { api_version, record }, at)
            });
        }
        if let Some(record) = bundle.tournaments {
            let api_version = version.clone();
            self.apply(UpdateMeta::for_domain(UpdateKind::Tournaments, Domain::Tournaments), |s| {
                actions::receive_tournaments(s, Normalized { api_version, record }, at)
            });
        }
        if let Some(record) = bundle.logs {
            self.receive_logs(version, record, at);
        }
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    fn poll_tick(&mut self, now: Instant) {
        if !self.machine.is_polling() {
            return;
        }
        self.scheduler
            .schedule(TimerKind::PollTick, now, self.settings.poll_interval);
        if self.poll_in_flight {
            debug!("previous poll batch still in flight; tick dropped");
            return;
        }

        let state = self.store.state();
        let domains = polled_domains(&state.ui.opened);
        let loading = domains
            .iter()
            .filter(|d| !state.data.has(**d))
            .fold(PerDomainPatch::default(), |patch, d| patch.set(*d, true));
        if !loading.is_empty() {
            self.merge(
                StatePatch {
                    loading,
                    ..Default::default()
                },
                UpdateMeta::new(UpdateKind::Loading),
            );
        }

        self.poll_in_flight = true;
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.poll_tx.clone();
        let timeout = self.settings.fetch_timeout;
        tokio::spawn(async move {
            let batch = run_batch(fetcher, domains, timeout).await;
            let _ = tx.send(batch).await;
        });
    }

    fn on_poll_batch(&mut self, batch: PollBatch) {
        self.poll_in_flight = false;
        let done = batch
            .results
            .iter()
            .fold(PerDomainPatch::default(), |patch, (d, _)| patch.set(*d, false));
        self.merge(
            StatePatch {
                loading: done,
                ..Default::default()
            },
            UpdateMeta::new(UpdateKind::Loading),
        );

        if !self.machine.is_polling() {
            debug!("poll batch arrived after polling stopped; discarded");
            return;
        }

        let health = batch.health();
        let at = Stamp::now();
        for (domain, outcome) in batch.results {
            match outcome {
                FetchOutcome::Ok(raw) => self.receive(domain, &raw, at),
                FetchOutcome::NotFound => {
                    debug!(domain = domain.as_str(), "endpoint not found");
                    self.apply(UpdateMeta::for_domain(UpdateKind::Missing, domain), |s| {
                        actions::record_missing(s, domain, at)
                    });
                }
                FetchOutcome::Failed(err) => {
                    debug!(domain = domain.as_str(), "poll failed: {err}");
                    self.apply(UpdateMeta::for_domain(UpdateKind::Error, domain), |s| {
                        actions::record_failure(s, domain)
                    });
                }
            }
        }

        if health != self.poll_health {
            info!(?health, "poll health changed");
        }
        self.poll_health = health;
        self.refresh_connection();
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn on_timers(&mut self) {
        let now = Instant::now();
        for kind in self.scheduler.pop_due(now) {
            match kind {
                TimerKind::PollTick => self.poll_tick(now),
                TimerKind::HealthTick => {
                    self.health.check(&mut self.store, now);
                    self.scheduler
                        .schedule(TimerKind::HealthTick, now, self.settings.health_interval);
                }
                TimerKind::Reconnect => self.step(Input::ReconnectDue),
                TimerKind::ConnectTimeout => {
                    if let Some((attempt, _)) = self.connect_timer.take() {
                        debug!(attempt, "connect timeout");
                        self.step(Input::ConnectTimeout { attempt });
                    }
                }
                TimerKind::PersistFlush => self.flush(),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetActiveTab(name) => {
                let tab = Tab::parse(&name);
                let before = polled_domains(&self.store.state().ui.opened);
                self.apply(UpdateMeta::new(UpdateKind::ActiveTab), |s| {
                    actions::set_active_tab(s, tab)
                });
                let after = polled_domains(&self.store.state().ui.opened);
                if after != before && self.machine.is_polling() {
                    self.scheduler.schedule_at(TimerKind::PollTick, Instant::now());
                }
            }
            Command::SetHeatmapPhase(name) => {
                let phase = HeatmapPhase::parse(&name);
                self.apply(UpdateMeta::new(UpdateKind::HeatmapPhase), |s| {
                    actions::set_heatmap_phase(s, phase)
                });
            }
            Command::OpenExplain(version) => {
                self.apply(UpdateMeta::new(UpdateKind::Explain), |s| {
                    actions::open_explain(s, &version)
                });
            }
            Command::CloseExplain => {
                self.apply(UpdateMeta::new(UpdateKind::Explain), actions::close_explain);
            }
            Command::SetLogFilter(patch) => {
                self.apply(UpdateMeta::new(UpdateKind::LogFilter), |s| {
                    actions::set_log_filter(s, &patch)
                });
            }
            Command::SetAdminEnabled(enabled) => {
                self.apply(UpdateMeta::new(UpdateKind::Admin), |s| {
                    actions::set_admin_enabled(s, enabled)
                });
                self.persistence.save_admin(enabled);
            }
            Command::Admin(action) => self.start_admin(action),
            Command::RetryNow => {
                info!("manual retry requested");
                self.step(Input::RetryNow);
            }
            Command::Shutdown => {}
        }
    }

    // -----------------------------------------------------------------------
    // Admin
    // -----------------------------------------------------------------------

    fn start_admin(&mut self, action: AdminAction) {
        if let Err(e) = admin::ensure_enabled(&self.store.state()) {
            self.on_admin_result(action, Err(e));
            return;
        }
        let Some(api) = self.admin.clone() else {
            self.on_admin_result(action, Err(AdminError::NotConfigured));
            return;
        };
        info!(action = action.as_str(), "admin request");
        let tx = self.admin_tx.clone();
        let timeout = self.settings.admin_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, api.execute(action)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(AdminError::Timeout),
            };
            let _ = tx.send((action, result)).await;
        });
    }

    fn on_admin_result(&mut self, action: AdminAction, result: Result<Value, AdminError>) {
        let (ok, message) = match &result {
            Ok(_) => (true, action.success_message().to_string()),
            Err(e) => {
                warn!(action = action.as_str(), "admin request failed: {e}");
                (false, e.to_string())
            }
        };
        let record = AdminResult {
            action: action.as_str().to_string(),
            ok,
            message,
            at: Utc::now(),
        };
        self.apply(UpdateMeta::new(UpdateKind::Admin), |s| {
            actions::set_admin_result(s, record)
        });

        if let (AdminAction::Snapshot, Ok(body)) = (action, result) {
            if !body.is_null() {
                self.receive_snapshot(&body, Stamp::now());
            }
        }
    }
}
