// Server-sent events push source, using reqwest-eventsource.
//
// The backend either sends framed `{type, payload}` JSON as the default
// `message` event, or names the event after the domain and sends the bare
// payload as data. Both are turned into the framed form.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AttemptId, PushSource, TransportEvent, TransportEventKind};
use crate::protocol::{Domain, TransportKind};

pub struct SseSource {
    http: reqwest::Client,
    url: String,
}

impl SseSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        SseSource {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PushSource for SseSource {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn run(&self, attempt: AttemptId, tx: mpsc::Sender<TransportEvent>) {
        let event = |kind| TransportEvent::new(attempt, TransportKind::Sse, kind);

        let mut es = match self.http.get(&self.url).eventsource() {
            Ok(es) => es,
            Err(e) => {
                let _ = tx
                    .send(event(TransportEventKind::Failed(format!(
                        "failed to create event source: {e}"
                    ))))
                    .await;
                return;
            }
        };

        let mut opened = false;
        while let Some(next) = es.next().await {
            let kind = match next {
                Ok(Event::Open) => {
                    if opened {
                        continue;
                    }
                    opened = true;
                    info!(url = %self.url, attempt, "event stream opened");
                    TransportEventKind::Opened
                }
                Ok(Event::Message(msg)) => match frame_sse_message(&msg.event, &msg.data) {
                    Some(text) => TransportEventKind::Message(text),
                    None => {
                        debug!(event = msg.event.as_str(), "ignoring SSE event");
                        continue;
                    }
                },
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    es.close();
                    let _ = tx.send(event(TransportEventKind::Closed)).await;
                    return;
                }
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    es.close();
                    let _ = tx
                        .send(event(TransportEventKind::Failed(describe_error(&err))))
                        .await;
                    return;
                }
            };
            if tx.send(event(kind)).await.is_err() {
                es.close();
                return;
            }
        }
        let _ = tx.send(event(TransportEventKind::Closed)).await;
    }
}

/// Turn an SSE event into a framed push message. Returns `None` for events
/// that carry no dashboard data (heartbeats, comments, unknown names).
pub fn frame_sse_message(event: &str, data: &str) -> Option<String> {
    match event {
        "" | "message" => Some(data.to_string()),
        name if name == "snapshot" || Domain::from_name(name).is_some() => {
            let payload = serde_json::from_str::<Value>(data)
                .unwrap_or_else(|_| Value::String(data.to_string()));
            Some(json!({ "type": name, "payload": payload }).to_string())
        }
        _ => None,
    }
}

fn describe_error(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            format!("server returned status {status}")
        }
        reqwest_eventsource::Error::InvalidContentType(content_type, _response) => {
            format!("unexpected content type {content_type:?}")
        }
        reqwest_eventsource::Error::Transport(e) => format!("network error: {e}"),
        other => format!("stream error: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PushMessage;

    #[test]
    fn default_event_passes_data_through() {
        let data = r#"{"type":"elo","payload":[]}"#;
        assert_eq!(frame_sse_message("message", data).as_deref(), Some(data));
        assert_eq!(frame_sse_message("", data).as_deref(), Some(data));
    }

    #[test]
    fn named_domain_event_is_framed() {
        let text = frame_sse_message("training", r#"{"games":4}"#).unwrap();
        assert_eq!(
            PushMessage::parse(&text),
            Some(PushMessage::Training(json!({"games": 4})))
        );
    }

    #[test]
    fn named_logs_event_with_plain_text() {
        let text = frame_sse_message("logs", "[INFO] [IO] saved").unwrap();
        assert_eq!(
            PushMessage::parse(&text),
            Some(PushMessage::Logs(json!("[INFO] [IO] saved")))
        );
    }

    #[test]
    fn heartbeat_events_are_dropped() {
        assert!(frame_sse_message("ping", "").is_none());
        assert!(frame_sse_message("heartbeat", "{}").is_none());
    }
}
