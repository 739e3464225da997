// Headless status reporting: turns published states into log lines.

use std::sync::Arc;

use tracing::{info, warn};

use nnwatch_core::logs::view::filtered_view;
use nnwatch_core::records::format_duration;
use nnwatch_core::state::{AppState, Warnings};

/// New backend log lines echoed per update, at most.
const MAX_ECHOED_LINES: usize = 50;

/// The parts of a state worth reporting, flattened for comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub connection: String,
    pub warnings: Warnings,
    pub offline: bool,
    pub training: Option<String>,
    pub errors: Vec<String>,
    pub regressions: Vec<String>,
    pub explain: Option<String>,
    pub admin: Option<String>,
    pub admin_failed: bool,
}

impl Summary {
    pub fn of(state: &AppState) -> Summary {
        let conn = &state.meta.connection;
        let training = state.data.training.as_deref().map(|t| {
            let mut line = format!("games={} status={}", t.games, t.display_status());
            if let Some(pct) = state.data.progress.percent {
                line.push_str(&format!(" progress={:.0}%", pct * 100.0));
            }
            if let Some(loss) = t.loss {
                line.push_str(&format!(" loss={loss:.4}"));
            }
            line
        });
        let errors = state
            .error
            .iter()
            .filter_map(|(d, e)| e.as_ref().map(|msg| format!("{}: {msg}", d.as_str())))
            .collect();
        let regressions = state
            .data
            .elo
            .as_deref()
            .map(|b| b.regressions().iter().map(|v| v.version.clone()).collect())
            .unwrap_or_default();
        let explain = state.ui.explain.version.as_ref().map(|v| {
            let note = state
                .data
                .elo
                .as_deref()
                .and_then(|b| b.versions.get(v))
                .map(|r| r.explain_note())
                .unwrap_or("No evaluation record.");
            format!("{v}: {note}")
        });
        let last_admin = state.ui.admin.last_result.as_ref();
        let admin = last_admin.map(|r| {
            let outcome = if r.ok { "ok" } else { "failed" };
            format!("{} {outcome}: {}", r.action, r.message)
        });

        Summary {
            connection: format!(
                "{}/{} retries={}",
                conn.state.as_str(),
                conn.transport.as_str(),
                conn.retries
            ),
            warnings: state.meta.warnings,
            offline: state.meta.offline.active,
            training,
            errors,
            regressions,
            explain,
            admin,
            admin_failed: last_admin.is_some_and(|r| !r.ok),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
}

/// One reportable difference between two summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub severity: Severity,
    pub text: String,
}

impl Change {
    fn info(text: String) -> Self {
        Change {
            severity: Severity::Info,
            text,
        }
    }

    fn warn(text: String) -> Self {
        Change {
            severity: Severity::Warn,
            text,
        }
    }
}

/// Human-readable differences between two summaries.
pub fn changes(prev: Option<&Summary>, next: &Summary) -> Vec<Change> {
    let mut out = Vec::new();
    let same = |f: fn(&Summary) -> bool| prev.is_some_and(|p| f(p) == f(next));

    if prev.map(|p| &p.connection) != Some(&next.connection) {
        out.push(Change::info(format!("connection {}", next.connection)));
    }
    let flags: [(&str, fn(&Summary) -> bool); 5] = [
        ("stale", |s| s.warnings.stale),
        ("dropped", |s| s.warnings.dropped),
        ("stall", |s| s.warnings.stall),
        ("schema", |s| s.warnings.schema),
        ("offline", |s| s.offline),
    ];
    for (name, flag) in flags {
        if !same(flag) && (prev.is_some() || flag(next)) {
            if flag(next) {
                out.push(Change::warn(format!("warning {name} raised")));
            } else {
                out.push(Change::info(format!("warning {name} cleared")));
            }
        }
    }
    if let Some(training) = &next.training {
        if prev.and_then(|p| p.training.as_ref()) != Some(training) {
            out.push(Change::info(format!("training {training}")));
        }
    }
    for error in &next.errors {
        if !prev.is_some_and(|p| p.errors.contains(error)) {
            out.push(Change::warn(format!("error {error}")));
        }
    }
    if !next.regressions.is_empty() && prev.map(|p| &p.regressions) != Some(&next.regressions) {
        let text = format!("regressions {}", next.regressions.join(", "));
        out.push(Change::info(text));
    }
    if let Some(explain) = &next.explain {
        if prev.and_then(|p| p.explain.as_ref()) != Some(explain) {
            out.push(Change::info(format!("explain {explain}")));
        }
    }
    if let Some(admin) = &next.admin {
        if prev.and_then(|p| p.admin.as_ref()) != Some(admin) {
            let text = format!("admin {admin}");
            out.push(if next.admin_failed {
                Change::warn(text)
            } else {
                Change::info(text)
            });
        }
    }
    out
}

/// Store subscriber that logs what changed since the previous state.
#[derive(Debug, Default)]
pub struct StatusReporter {
    last: Option<Summary>,
    last_log_key: Option<String>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, state: &Arc<AppState>) {
        let summary = Summary::of(state);
        for change in changes(self.last.as_ref(), &summary) {
            match change.severity {
                Severity::Warn => warn!("{}", change.text),
                Severity::Info => info!("{}", change.text),
            }
        }
        if let Some(start) = state.meta.session_start {
            if self.last.as_ref().and_then(|s| s.training.as_ref()) != summary.training.as_ref() {
                let elapsed = (chrono::Utc::now() - start).to_std().unwrap_or_default();
                info!("session running for {}", format_duration(elapsed));
            }
        }
        self.last = Some(summary);

        for line in self.new_log_lines(state) {
            info!(target: "nnwatch::backend", "{line}");
        }
    }

    /// Visible log lines after the last one echoed.
    fn new_log_lines(&mut self, state: &AppState) -> Vec<String> {
        if state.ui.logs.paused {
            return Vec::new();
        }
        let visible = filtered_view(&state.data.logs, &state.ui.logs);
        let start = match &self.last_log_key {
            Some(key) => visible
                .iter()
                .rposition(|e| &e.key == key)
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };
        if let Some(last) = visible.last() {
            self.last_log_key = Some(last.key.clone());
        }
        let fresh = &visible[start.min(visible.len())..];
        let skip = fresh.len().saturating_sub(MAX_ECHOED_LINES);
        fresh[skip..].iter().map(|e| e.line.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnwatch_core::actions;
    use nnwatch_core::health::Health;
    use nnwatch_core::normalize::{normalize_logs, normalize_training};
    use nnwatch_core::protocol::{ConnectionState, Domain, TransportKind};
    use nnwatch_core::state::{AdminResult, Stamp};
    use serde_json::json;
    use tokio::time::Instant;

    fn fresh() -> Arc<AppState> {
        Arc::new(AppState::new(Instant::now()))
    }

    fn texts(changes: &[Change]) -> Vec<&str> {
        changes.iter().map(|c| c.text.as_str()).collect()
    }

    fn severity_of(changes: &[Change], text: &str) -> Option<Severity> {
        changes.iter().find(|c| c.text == text).map(|c| c.severity)
    }

    fn admin_result(ok: bool, message: &str) -> AdminResult {
        AdminResult {
            action: "snapshot".to_string(),
            ok,
            message: message.to_string(),
            at: chrono::Utc::now(),
        }
    }

    fn logs(lines: &[&str]) -> Arc<AppState> {
        actions::receive_logs(&fresh(), normalize_logs(&json!(lines)), Stamp::now())
    }

    #[test]
    fn first_report_lists_connection_only() {
        let s = fresh();
        let lines = changes(None, &Summary::of(&s));
        assert_eq!(texts(&lines), vec!["connection disconnected/ws retries=0"]);
        assert_eq!(lines[0].severity, Severity::Info);
    }

    #[test]
    fn reports_connection_training_and_warnings() {
        let s0 = fresh();
        let before = Summary::of(&s0);
        let s1 = actions::set_connection(
            &s0,
            ConnectionState::Connected,
            TransportKind::Poll,
            2,
            Stamp::now(),
        );
        let s1 = actions::receive_training(
            &s1,
            normalize_training(&json!({"games": 12, "state": "running", "progress": 40})),
            Stamp::now(),
        );
        let mut health = Health::default();
        health.warnings.stale = true;
        let s1 = actions::set_health(&s1, &health);

        let lines = changes(Some(&before), &Summary::of(&s1));
        let text = texts(&lines);
        assert!(text.contains(&"connection connected/poll retries=2"));
        assert!(text.contains(&"training games=12 status=running progress=40%"));
        assert!(!text.iter().any(|l| l.contains("dropped")));
        assert_eq!(
            severity_of(&lines, "warning stale raised"),
            Some(Severity::Warn)
        );
        assert_eq!(
            severity_of(&lines, "connection connected/poll retries=2"),
            Some(Severity::Info)
        );
    }

    #[test]
    fn cleared_warning_and_new_error() {
        let mut health = Health::default();
        health.warnings.stall = true;
        let s0 = actions::set_health(&fresh(), &health);
        let before = Summary::of(&s0);
        let s1 = actions::set_health(&s0, &Health::default());
        let s1 = actions::record_failure(&s1, Domain::Elo);

        let lines = changes(Some(&before), &Summary::of(&s1));
        assert_eq!(
            severity_of(&lines, "warning stall cleared"),
            Some(Severity::Info)
        );
        assert_eq!(
            severity_of(&lines, "error elo: ELO data unavailable."),
            Some(Severity::Warn)
        );
    }

    #[test]
    fn severity_follows_the_change_not_its_wording() {
        let s0 = fresh();
        let before = Summary::of(&s0);
        let failed = actions::set_admin_result(&s0, admin_result(false, "error: raised"));
        let lines = changes(Some(&before), &Summary::of(&failed));
        assert_eq!(
            severity_of(&lines, "admin snapshot failed: error: raised"),
            Some(Severity::Warn)
        );

        let before = Summary::of(&failed);
        let ok = actions::set_admin_result(&failed, admin_result(true, "error log raised"));
        let lines = changes(Some(&before), &Summary::of(&ok));
        assert_eq!(
            severity_of(&lines, "admin snapshot ok: error log raised"),
            Some(Severity::Info)
        );
    }

    #[test]
    fn echoes_only_new_log_lines() {
        let mut reporter = StatusReporter::new();
        let s = logs(&["[a] [INFO] [IO] one"]);
        assert_eq!(reporter.new_log_lines(&s), vec!["[a] [INFO] [IO] one".to_string()]);

        let s = actions::receive_logs(
            &s,
            normalize_logs(&json!(["[a] [INFO] [IO] one", "[b] [INFO] [IO] two"])),
            Stamp::now(),
        );
        assert_eq!(reporter.new_log_lines(&s), vec!["[b] [INFO] [IO] two".to_string()]);
        assert!(reporter.new_log_lines(&s).is_empty());
    }

    #[test]
    fn paused_filter_suppresses_echo() {
        let mut reporter = StatusReporter::new();
        let s = logs(&["[a] [INFO] [IO] one"]);
        let s = actions::set_log_filter(
            &s,
            &nnwatch_core::logs::view::LogFilterPatch {
                paused: Some(true),
                ..Default::default()
            },
        );
        assert!(reporter.new_log_lines(&s).is_empty());
    }
}
