// WebSocket push source.

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::{AttemptId, PushSource, TransportEvent, TransportEventKind};
use crate::protocol::TransportKind;

/// How a message stream finished.
#[derive(Debug, PartialEq)]
pub enum StreamEnd {
    Closed,
    Error(String),
}

/// Connects to the backend's WebSocket endpoint and forwards text frames.
pub struct WsSource {
    url: String,
}

impl WsSource {
    pub fn new(url: impl Into<String>) -> Self {
        WsSource { url: url.into() }
    }
}

#[async_trait]
impl PushSource for WsSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Ws
    }

    async fn run(&self, attempt: AttemptId, tx: mpsc::Sender<TransportEvent>) {
        let event = |kind| TransportEvent::new(attempt, TransportKind::Ws, kind);

        let stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(url = %self.url, "websocket connect failed: {e}");
                let _ = tx.send(event(TransportEventKind::Failed(e.to_string()))).await;
                return;
            }
        };
        info!(url = %self.url, attempt, "websocket connected");
        if tx.send(event(TransportEventKind::Opened)).await.is_err() {
            return;
        }

        let (_write, read) = stream.split();
        let end = match pump_messages(read, &tx, attempt).await {
            Ok(end) => end,
            Err(()) => return,
        };
        let kind = match end {
            StreamEnd::Closed => TransportEventKind::Closed,
            StreamEnd::Error(reason) => TransportEventKind::Failed(reason),
        };
        let _ = tx.send(event(kind)).await;
    }
}

/// Forward text frames from any message stream as `Message` events.
///
/// Returns `Err(())` if the receiver is gone. Generic over the stream so it
/// can be driven by in-memory streams in tests.
pub async fn pump_messages<St>(
    mut stream: St,
    tx: &mpsc::Sender<TransportEvent>,
    attempt: AttemptId,
) -> Result<StreamEnd, ()>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = TransportEvent::new(
                    attempt,
                    TransportKind::Ws,
                    TransportEventKind::Message(text.to_string()),
                );
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(attempt, ?frame, "server sent close frame");
                return Ok(StreamEnd::Closed);
            }
            Err(e) => {
                warn!(attempt, "websocket error: {e}");
                return Ok(StreamEnd::Error(e.to_string()));
            }
            _ => {
                // Binary, Ping, Pong and raw frames carry no dashboard data.
            }
        }
    }
    Ok(StreamEnd::Closed)
}
