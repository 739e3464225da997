// Admin control surface: remote shutdown and on-demand snapshot.
//
// Only available while the client-side admin flag is set. There is no
// authentication beyond that flag.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::state::AppState;

pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Shutdown,
    Snapshot,
}

impl AdminAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminAction::Shutdown => "shutdown",
            AdminAction::Snapshot => "snapshot",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            AdminAction::Shutdown => "control/shutdown",
            AdminAction::Snapshot => "control/snapshot",
        }
    }

    /// Message recorded in `ui.admin.last_result` on success.
    pub fn success_message(self) -> &'static str {
        match self {
            AdminAction::Shutdown => "Shutdown requested.",
            AdminAction::Snapshot => "Snapshot received.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdminError {
    #[error("admin controls are disabled")]
    Disabled,
    #[error("no admin endpoint configured")]
    NotConfigured,
    #[error("admin request timed out")]
    Timeout,
    #[error("admin request failed with status {0}")]
    Status(u16),
    #[error("admin request failed: {0}")]
    Network(String),
}

impl From<reqwest::Error> for AdminError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdminError::Timeout
        } else {
            AdminError::Network(e.to_string())
        }
    }
}

pub fn ensure_enabled(state: &AppState) -> Result<(), AdminError> {
    if state.ui.admin.enabled {
        Ok(())
    } else {
        Err(AdminError::Disabled)
    }
}

pub fn control_url(base_url: &str, action: AdminAction) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), action.path())
}

#[async_trait]
pub trait AdminApi: Send + Sync + 'static {
    /// Perform the action. The returned value is the decoded response body,
    /// `Null` when the body is empty or not JSON.
    async fn execute(&self, action: AdminAction) -> Result<Value, AdminError>;
}

pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
}

impl AdminClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        AdminClient {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AdminApi for AdminClient {
    async fn execute(&self, action: AdminAction) -> Result<Value, AdminError> {
        let url = control_url(&self.base_url, action);
        let request = match action {
            AdminAction::Shutdown => self.http.post(&url),
            AdminAction::Snapshot => self.http.get(&url),
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdminError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
    }
}
