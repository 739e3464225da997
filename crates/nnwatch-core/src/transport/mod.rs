// Transport layer: push sources, the polling fetcher, and the state machine
// that decides which of them is active.

pub mod machine;
pub mod poll;
pub mod sse;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::TransportKind;

/// Identifies one connection attempt. Every spawn gets a fresh id; events
/// carrying an older id are discarded.
pub type AttemptId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Opened,
    /// Raw text frame, expected to hold a `{type, payload}` message.
    Message(String),
    Closed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub attempt: AttemptId,
    pub transport: TransportKind,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(attempt: AttemptId, transport: TransportKind, kind: TransportEventKind) -> Self {
        TransportEvent {
            attempt,
            transport,
            kind,
        }
    }
}

/// A push transport. `run` connects, reports `Opened`, forwards every text
/// frame as `Message`, and finishes with `Closed` or `Failed`. The engine
/// aborts the task when it gives up on the attempt.
#[async_trait]
pub trait PushSource: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    async fn run(&self, attempt: AttemptId, tx: mpsc::Sender<TransportEvent>);
}
