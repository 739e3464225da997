// Transport selection state machine.
//
// Pure: it consumes inputs and returns the actions the engine must carry
// out. Preference order is WebSocket, then SSE, then polling. Polling runs
// whenever no push transport is open.

use std::time::Duration;

use tracing::{debug, info};

use super::AttemptId;
use crate::protocol::{ConnectionState, TransportKind};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

const BACKOFF_BASE: Duration = Duration::from_millis(800);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const BACKOFF_MAX_EXPONENT: u32 = 6;

/// `min(30s, 800ms * 2^min(6, retries))`, before jitter.
pub fn backoff_delay(retries: u32) -> Duration {
    let factor = 1u32 << retries.min(BACKOFF_MAX_EXPONENT);
    (BACKOFF_BASE * factor).min(BACKOFF_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// `initial` is set while walking the hierarchy after start (or a
    /// manual retry); a failure then advances to the next transport.
    Connecting {
        kind: TransportKind,
        attempt: AttemptId,
        initial: bool,
    },
    Open {
        kind: TransportKind,
        attempt: AttemptId,
        messages: u64,
        initial: bool,
    },
    /// `exhausted` means the initial walk ran out of push transports and
    /// nothing will be retried until a manual retry.
    Polling {
        reconnect_to: Option<TransportKind>,
        exhausted: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Start,
    Opened { attempt: AttemptId },
    Message { attempt: AttemptId },
    Closed { attempt: AttemptId },
    Failed { attempt: AttemptId },
    ConnectTimeout { attempt: AttemptId },
    ReconnectDue,
    RetryNow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Spawn { kind: TransportKind, attempt: AttemptId },
    Abort { attempt: AttemptId },
    ArmConnectTimeout { attempt: AttemptId, after: Duration },
    CancelConnectTimeout,
    ScheduleReconnect { after: Duration },
    CancelReconnect,
    StartPolling,
    StopPolling,
}

/// What the poll loop has observed since polling (re)started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollHealth {
    #[default]
    Unknown,
    /// The last batch had at least one success or 404.
    Ok,
    /// Every request of the last batch failed.
    Failing,
}

#[derive(Debug)]
pub struct TransportMachine {
    phase: Phase,
    last_attempt: AttemptId,
    retries: u32,
    polling: bool,
    connect_timeout: Duration,
}

impl Default for TransportMachine {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TransportMachine {
    pub fn new(connect_timeout: Duration) -> Self {
        TransportMachine {
            phase: Phase::Idle,
            last_attempt: 0,
            retries: 0,
            polling: false,
            connect_timeout,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    fn current_attempt(&self) -> Option<AttemptId> {
        match self.phase {
            Phase::Connecting { attempt, .. } | Phase::Open { attempt, .. } => Some(attempt),
            _ => None,
        }
    }

    /// Whether events from `attempt` should still be processed.
    pub fn is_live(&self, attempt: AttemptId) -> bool {
        self.current_attempt() == Some(attempt)
    }

    /// Connection descriptor for display.
    pub fn descriptor(&self, poll: PollHealth) -> (ConnectionState, TransportKind) {
        match self.phase {
            Phase::Open { kind, .. } => (ConnectionState::Connected, kind),
            Phase::Idle => (ConnectionState::Disconnected, TransportKind::Poll),
            phase => {
                let state = match poll {
                    PollHealth::Ok => ConnectionState::Connected,
                    PollHealth::Failing => ConnectionState::Disconnected,
                    PollHealth::Unknown => match phase {
                        Phase::Connecting { .. }
                        | Phase::Polling {
                            reconnect_to: Some(_),
                            ..
                        } => ConnectionState::Reconnecting,
                        _ => ConnectionState::Disconnected,
                    },
                };
                (state, TransportKind::Poll)
            }
        }
    }

    pub fn handle(&mut self, input: Input, jitter: Duration) -> Vec<Action> {
        let mut actions = Vec::new();
        match (self.phase, input) {
            (Phase::Idle, Input::Start) | (Phase::Idle, Input::RetryNow) => {
                self.retries = 0;
                self.connect(TransportKind::Ws, true, &mut actions);
                self.start_polling(&mut actions);
            }

            (Phase::Open { .. }, Input::RetryNow) => {
                debug!("retry requested while a push transport is open; ignored");
            }

            (_, Input::RetryNow) => {
                if let Some(attempt) = self.current_attempt() {
                    actions.push(Action::Abort { attempt });
                }
                actions.push(Action::CancelReconnect);
                self.retries = 0;
                info!("manual retry: restarting from websocket");
                self.connect(TransportKind::Ws, true, &mut actions);
                self.start_polling(&mut actions);
            }

            (
                Phase::Connecting {
                    kind,
                    attempt,
                    initial,
                },
                Input::Opened { attempt: a },
            ) if a == attempt => {
                info!(transport = kind.as_str(), attempt, "push transport open");
                self.phase = Phase::Open {
                    kind,
                    attempt,
                    messages: 0,
                    initial,
                };
                self.retries = 0;
                actions.push(Action::CancelConnectTimeout);
                self.stop_polling(&mut actions);
            }

            (
                Phase::Connecting {
                    kind,
                    attempt,
                    initial,
                },
                Input::Failed { attempt: a }
                | Input::Closed { attempt: a }
                | Input::ConnectTimeout { attempt: a },
            ) if a == attempt => {
                debug!(transport = kind.as_str(), attempt, ?input, "connect attempt failed");
                actions.push(Action::Abort { attempt });
                self.fail_attempt(kind, initial, jitter, &mut actions);
            }

            (Phase::Open { attempt, .. }, Input::Message { attempt: a }) if a == attempt => {
                if let Phase::Open { messages, .. } = &mut self.phase {
                    *messages += 1;
                }
            }

            (
                Phase::Open {
                    kind,
                    attempt,
                    messages,
                    initial,
                },
                Input::Closed { attempt: a } | Input::Failed { attempt: a },
            ) if a == attempt => {
                actions.push(Action::Abort { attempt });
                if messages == 0 {
                    info!(transport = kind.as_str(), "transport closed before any message");
                    self.fail_attempt(kind, initial, jitter, &mut actions);
                } else {
                    info!(
                        transport = kind.as_str(),
                        messages,
                        "push transport lost; polling until reconnect"
                    );
                    self.start_polling(&mut actions);
                    self.schedule_reconnect(kind, jitter, &mut actions);
                }
            }

            (
                Phase::Polling {
                    reconnect_to: Some(kind),
                    ..
                },
                Input::ReconnectDue,
            ) => {
                info!(transport = kind.as_str(), retries = self.retries, "reconnecting");
                self.connect(kind, false, &mut actions);
            }

            (phase, input) => {
                debug!(?phase, ?input, "transport input ignored");
            }
        }
        actions
    }

    fn next_attempt(&mut self) -> AttemptId {
        self.last_attempt += 1;
        self.last_attempt
    }

    fn connect(&mut self, kind: TransportKind, initial: bool, actions: &mut Vec<Action>) {
        let attempt = self.next_attempt();
        self.phase = Phase::Connecting {
            kind,
            attempt,
            initial,
        };
        actions.push(Action::Spawn { kind, attempt });
        actions.push(Action::ArmConnectTimeout {
            attempt,
            after: self.connect_timeout,
        });
    }

    fn fail_attempt(
        &mut self,
        kind: TransportKind,
        initial: bool,
        jitter: Duration,
        actions: &mut Vec<Action>,
    ) {
        self.start_polling(actions);
        if !initial {
            actions.push(Action::CancelConnectTimeout);
            self.schedule_reconnect(kind, jitter, actions);
            return;
        }
        self.retries += 1;
        match kind.next_push() {
            Some(next) => {
                info!(from = kind.as_str(), to = next.as_str(), "falling back");
                self.connect(next, true, actions);
            }
            None => {
                info!("push transports exhausted; polling only");
                actions.push(Action::CancelConnectTimeout);
                self.phase = Phase::Polling {
                    reconnect_to: None,
                    exhausted: true,
                };
            }
        }
    }

    fn schedule_reconnect(
        &mut self,
        kind: TransportKind,
        jitter: Duration,
        actions: &mut Vec<Action>,
    ) {
        let after = backoff_delay(self.retries) + jitter;
        self.retries += 1;
        self.phase = Phase::Polling {
            reconnect_to: Some(kind),
            exhausted: false,
        };
        actions.push(Action::ScheduleReconnect { after });
    }

    fn start_polling(&mut self, actions: &mut Vec<Action>) {
        if !self.polling {
            self.polling = true;
            actions.push(Action::StartPolling);
        }
    }

    fn stop_polling(&mut self, actions: &mut Vec<Action>) {
        if self.polling {
            self.polling = false;
            actions.push(Action::StopPolling);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_JITTER: Duration = Duration::ZERO;

    fn spawned(actions: &[Action]) -> Option<(TransportKind, AttemptId)> {
        actions.iter().find_map(|a| match a {
            Action::Spawn { kind, attempt } => Some((*kind, *attempt)),
            _ => None,
        })
    }

    fn reconnect_after(actions: &[Action]) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            Action::ScheduleReconnect { after } => Some(*after),
            _ => None,
        })
    }

    fn started() -> (TransportMachine, AttemptId) {
        let mut m = TransportMachine::default();
        let actions = m.handle(Input::Start, NO_JITTER);
        let (kind, attempt) = spawned(&actions).unwrap();
        assert_eq!(kind, TransportKind::Ws);
        (m, attempt)
    }

    // -- Backoff --

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(800));
        assert_eq!(backoff_delay(1), Duration::from_millis(1600));
        assert_eq!(backoff_delay(5), Duration::from_millis(25_600));
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(40), Duration::from_secs(30));
    }

    // -- Initial walk --

    #[test]
    fn start_spawns_ws_with_timeout_and_polling() {
        let mut m = TransportMachine::default();
        let actions = m.handle(Input::Start, NO_JITTER);
        assert_eq!(
            actions,
            vec![
                Action::Spawn {
                    kind: TransportKind::Ws,
                    attempt: 1
                },
                Action::ArmConnectTimeout {
                    attempt: 1,
                    after: DEFAULT_CONNECT_TIMEOUT
                },
                Action::StartPolling,
            ]
        );
        assert_eq!(
            m.descriptor(PollHealth::Unknown),
            (ConnectionState::Reconnecting, TransportKind::Poll)
        );
    }

    #[test]
    fn open_stops_polling_and_resets_retries() {
        let (mut m, a) = started();
        let actions = m.handle(Input::Opened { attempt: a }, NO_JITTER);
        assert_eq!(actions, vec![Action::CancelConnectTimeout, Action::StopPolling]);
        assert_eq!(
            m.descriptor(PollHealth::Failing),
            (ConnectionState::Connected, TransportKind::Ws)
        );
        assert_eq!(m.retries(), 0);
    }

    #[test]
    fn ws_failure_falls_back_to_sse() {
        let (mut m, a) = started();
        let actions = m.handle(Input::Failed { attempt: a }, NO_JITTER);
        assert_eq!(actions[0], Action::Abort { attempt: a });
        let (kind, b) = spawned(&actions).unwrap();
        assert_eq!(kind, TransportKind::Sse);
        assert_ne!(a, b);
        assert_eq!(m.retries(), 1);
        assert!(!m.is_live(a));
        assert!(m.is_live(b));
    }

    #[test]
    fn open_then_close_without_messages_advances_hierarchy() {
        let (mut m, a) = started();
        m.handle(Input::Opened { attempt: a }, NO_JITTER);
        let actions = m.handle(Input::Closed { attempt: a }, NO_JITTER);
        assert!(actions.contains(&Action::StartPolling));
        assert_eq!(spawned(&actions).unwrap().0, TransportKind::Sse);
    }

    #[test]
    fn sse_timeout_exhausts_into_terminal_polling() {
        let (mut m, a) = started();
        let actions = m.handle(Input::ConnectTimeout { attempt: a }, NO_JITTER);
        let (_, b) = spawned(&actions).unwrap();
        let actions = m.handle(Input::ConnectTimeout { attempt: b }, NO_JITTER);
        assert_eq!(actions, vec![Action::Abort { attempt: b }, Action::CancelConnectTimeout]);
        assert_eq!(
            m.phase(),
            Phase::Polling {
                reconnect_to: None,
                exhausted: true
            }
        );
        assert!(m.is_polling());
        assert!(m.handle(Input::ReconnectDue, NO_JITTER).is_empty());
        assert_eq!(
            m.descriptor(PollHealth::Ok),
            (ConnectionState::Connected, TransportKind::Poll)
        );
        assert_eq!(
            m.descriptor(PollHealth::Failing),
            (ConnectionState::Disconnected, TransportKind::Poll)
        );
    }

    // -- Established connections --

    #[test]
    fn loss_after_messages_schedules_backoff_reconnect() {
        let (mut m, a) = started();
        m.handle(Input::Opened { attempt: a }, NO_JITTER);
        m.handle(Input::Message { attempt: a }, NO_JITTER);
        let actions = m.handle(Input::Closed { attempt: a }, Duration::from_millis(100));
        assert_eq!(
            actions,
            vec![
                Action::Abort { attempt: a },
                Action::StartPolling,
                Action::ScheduleReconnect {
                    after: Duration::from_millis(900)
                },
            ]
        );
        assert_eq!(m.retries(), 1);

        let actions = m.handle(Input::ReconnectDue, NO_JITTER);
        let (kind, b) = spawned(&actions).unwrap();
        assert_eq!(kind, TransportKind::Ws);

        // A failed reconnect goes back to polling with a longer backoff
        // rather than walking the hierarchy.
        let actions = m.handle(Input::Failed { attempt: b }, NO_JITTER);
        assert_eq!(reconnect_after(&actions), Some(Duration::from_millis(1600)));
        assert!(spawned(&actions).is_none());
        assert_eq!(
            m.phase(),
            Phase::Polling {
                reconnect_to: Some(TransportKind::Ws),
                exhausted: false
            }
        );
    }

    #[test]
    fn pending_reconnect_reads_as_reconnecting() {
        let (mut m, a) = started();
        m.handle(Input::Opened { attempt: a }, NO_JITTER);
        m.handle(Input::Message { attempt: a }, NO_JITTER);
        m.handle(Input::Closed { attempt: a }, NO_JITTER);
        assert_eq!(
            m.phase(),
            Phase::Polling {
                reconnect_to: Some(TransportKind::Ws),
                exhausted: false
            }
        );
        assert_eq!(
            m.descriptor(PollHealth::Unknown),
            (ConnectionState::Reconnecting, TransportKind::Poll)
        );
        assert_eq!(
            m.descriptor(PollHealth::Ok),
            (ConnectionState::Connected, TransportKind::Poll)
        );
        assert_eq!(
            m.descriptor(PollHealth::Failing),
            (ConnectionState::Disconnected, TransportKind::Poll)
        );
    }

    #[test]
    fn stale_attempt_events_are_ignored() {
        let (mut m, a) = started();
        m.handle(Input::Failed { attempt: a }, NO_JITTER);
        let before = m.phase();
        assert!(m.handle(Input::Opened { attempt: a }, NO_JITTER).is_empty());
        assert!(m.handle(Input::Message { attempt: a }, NO_JITTER).is_empty());
        assert!(m.handle(Input::Closed { attempt: a }, NO_JITTER).is_empty());
        assert_eq!(m.phase(), before);
    }

    // -- Manual retry --

    #[test]
    fn retry_now_restarts_from_ws() {
        let (mut m, a) = started();
        let actions = m.handle(Input::ConnectTimeout { attempt: a }, NO_JITTER);
        let (_, b) = spawned(&actions).unwrap();
        m.handle(Input::ConnectTimeout { attempt: b }, NO_JITTER);
        assert_eq!(m.retries(), 2);

        let actions = m.handle(Input::RetryNow, NO_JITTER);
        assert!(actions.contains(&Action::CancelReconnect));
        let (kind, c) = spawned(&actions).unwrap();
        assert_eq!(kind, TransportKind::Ws);
        assert!(m.is_live(c));
        assert_eq!(m.retries(), 0);
    }

    #[test]
    fn retry_now_aborts_inflight_attempt() {
        let (mut m, a) = started();
        let actions = m.handle(Input::RetryNow, NO_JITTER);
        assert_eq!(actions[0], Action::Abort { attempt: a });
        assert!(!m.is_live(a));
    }

    #[test]
    fn retry_now_is_ignored_while_open() {
        let (mut m, a) = started();
        m.handle(Input::Opened { attempt: a }, NO_JITTER);
        assert!(m.handle(Input::RetryNow, NO_JITTER).is_empty());
        assert!(m.is_live(a));
    }
}
