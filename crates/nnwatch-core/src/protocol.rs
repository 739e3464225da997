// Shared vocabulary: data domains, dashboard tabs, transports, and push
// message framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Data domains
// ---------------------------------------------------------------------------

/// A backend data domain. Each domain has its own poll endpoint and its own
/// canonical record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Training,
    Elo,
    Tournaments,
    Logs,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Training,
        Domain::Elo,
        Domain::Tournaments,
        Domain::Logs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Training => "training",
            Domain::Elo => "elo",
            Domain::Tournaments => "tournaments",
            Domain::Logs => "logs",
        }
    }

    pub fn from_name(name: &str) -> Option<Domain> {
        match name {
            "training" => Some(Domain::Training),
            "elo" => Some(Domain::Elo),
            "tournaments" => Some(Domain::Tournaments),
            "logs" => Some(Domain::Logs),
            _ => None,
        }
    }

    /// Poll endpoint file name, relative to the backend base URL.
    pub fn file_name(self) -> &'static str {
        match self {
            Domain::Training => "training.json",
            Domain::Elo => "elo.json",
            Domain::Tournaments => "tournaments.json",
            Domain::Logs => "logs.json",
        }
    }

    /// Message stored in `error.<domain>` when a refresh fails.
    pub fn unavailable_message(self) -> &'static str {
        match self {
            Domain::Training => "Training data unavailable.",
            Domain::Elo => "ELO data unavailable.",
            Domain::Tournaments => "Tournaments data unavailable.",
            Domain::Logs => "Logs unavailable.",
        }
    }
}

// ---------------------------------------------------------------------------
// UI selectors
// ---------------------------------------------------------------------------

/// Dashboard tab. Unknown names normalize to `Overview`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Overview,
    Elo,
    Heatmap,
    Tournaments,
    Logs,
}

impl Tab {
    pub const ALL: [Tab; 5] = [Tab::Overview, Tab::Elo, Tab::Heatmap, Tab::Tournaments, Tab::Logs];

    pub fn as_str(self) -> &'static str {
        match self {
            Tab::Overview => "overview",
            Tab::Elo => "elo",
            Tab::Heatmap => "heatmap",
            Tab::Tournaments => "tournaments",
            Tab::Logs => "logs",
        }
    }

    pub fn from_name(name: &str) -> Option<Tab> {
        Tab::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Lenient parse used on every write path: anything unknown becomes
    /// the default tab.
    pub fn parse(name: &str) -> Tab {
        Tab::from_name(name.trim()).unwrap_or_default()
    }

    /// Data domains this tab displays. Training is polled regardless of the
    /// opened tabs, see [`crate::transport::poll::polled_domains`].
    pub fn domains(self) -> &'static [Domain] {
        match self {
            Tab::Overview => &[Domain::Training],
            Tab::Elo => &[Domain::Elo],
            Tab::Heatmap => &[],
            Tab::Tournaments => &[Domain::Tournaments],
            Tab::Logs => &[Domain::Logs],
        }
    }
}

/// Phase selector for the activity heatmap.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HeatmapPhase {
    #[default]
    Opening,
    Midgame,
    Endgame,
}

impl HeatmapPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HeatmapPhase::Opening => "opening",
            HeatmapPhase::Midgame => "midgame",
            HeatmapPhase::Endgame => "endgame",
        }
    }

    pub fn parse(name: &str) -> HeatmapPhase {
        match name.trim() {
            "midgame" => HeatmapPhase::Midgame,
            "endgame" => HeatmapPhase::Endgame,
            _ => HeatmapPhase::Opening,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport vocabulary
// ---------------------------------------------------------------------------

/// The three transports, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ws,
    Sse,
    Poll,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Ws => "ws",
            TransportKind::Sse => "sse",
            TransportKind::Poll => "poll",
        }
    }

    /// The next push transport to try after this one fails. `None` means
    /// the hierarchy is exhausted and polling takes over.
    pub fn next_push(self) -> Option<TransportKind> {
        match self {
            TransportKind::Ws => Some(TransportKind::Sse),
            TransportKind::Sse | TransportKind::Poll => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Reconnecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Connected => "connected",
        }
    }
}

// ---------------------------------------------------------------------------
// Push message framing
// ---------------------------------------------------------------------------

/// A message delivered by a push transport: `{type, payload}`.
///
/// Payloads stay as raw JSON here; the normalization layer resolves them.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Training(Value),
    Elo(Value),
    Logs(Value),
    Tournaments(Value),
    /// Several domains bundled in one payload.
    Snapshot(Value),
}

impl PushMessage {
    /// Parse a framed push message. Returns `None` for invalid JSON or an
    /// unknown `type`; a missing payload becomes `null`.
    pub fn parse(text: &str) -> Option<PushMessage> {
        let value: Value = serde_json::from_str(text).ok()?;
        let kind = value.get("type")?.as_str()?;
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        match kind {
            "training" => Some(PushMessage::Training(payload)),
            "elo" => Some(PushMessage::Elo(payload)),
            "logs" => Some(PushMessage::Logs(payload)),
            "tournaments" => Some(PushMessage::Tournaments(payload)),
            "snapshot" => Some(PushMessage::Snapshot(payload)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PushMessage::Training(_) => "training",
            PushMessage::Elo(_) => "elo",
            PushMessage::Logs(_) => "logs",
            PushMessage::Tournaments(_) => "tournaments",
            PushMessage::Snapshot(_) => "snapshot",
        }
    }
}
