// Log classification and the filtered view shown in the logs tab.

use serde::{Deserialize, Serialize};

use crate::records::LogEntry;

/// Number of entries shown by the `latest` window.
pub const LATEST_WINDOW: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tournament,
    Train,
    Eval,
    Io,
    Misc,
}

impl Category {
    fn from_tag(tag: &str) -> Option<Category> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "TOURNAMENT" => Some(Category::Tournament),
            "TRAIN" => Some(Category::Train),
            "EVAL" => Some(Category::Eval),
            "IO" => Some(Category::Io),
            _ => None,
        }
    }
}

fn severity_from_tag(tag: &str) -> Option<Severity> {
    match tag.trim().to_ascii_uppercase().as_str() {
        "ERROR" | "FATAL" => Some(Severity::Error),
        "WARN" | "WARNING" => Some(Severity::Warn),
        "INFO" | "DEBUG" | "TRACE" => Some(Severity::Info),
        _ => None,
    }
}

/// Derive severity and category for an entry. Structured fields win; when
/// they carry nothing recognisable the display line is scanned for the
/// bracketed tags.
pub fn classify(entry: &LogEntry) -> (Severity, Category) {
    let severity = severity_from_tag(&entry.level).unwrap_or_else(|| {
        let upper = entry.line.to_ascii_uppercase();
        if upper.contains("[ERROR]") || upper.contains("[FATAL]") {
            Severity::Error
        } else if upper.contains("[WARN]") {
            Severity::Warn
        } else {
            Severity::Info
        }
    });

    let category = Category::from_tag(&entry.subsystem).unwrap_or_else(|| {
        let upper = entry.line.to_ascii_uppercase();
        [
            ("[TOURNAMENT]", Category::Tournament),
            ("[TRAIN]", Category::Train),
            ("[EVAL]", Category::Eval),
            ("[IO]", Category::Io),
        ]
        .into_iter()
        .find(|(tag, _)| upper.contains(tag))
        .map(|(_, c)| c)
        .unwrap_or(Category::Misc)
    });

    (severity, category)
}

// ---------------------------------------------------------------------------
// Filter settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelFilter {
    #[default]
    All,
    Info,
    Warn,
    Error,
}

impl LevelFilter {
    pub fn parse(name: &str) -> Option<LevelFilter> {
        match name.trim() {
            "all" => Some(LevelFilter::All),
            "info" => Some(LevelFilter::Info),
            "warn" => Some(LevelFilter::Warn),
            "error" => Some(LevelFilter::Error),
            _ => None,
        }
    }

    fn admits(self, severity: Severity) -> bool {
        match self {
            LevelFilter::All => true,
            LevelFilter::Info => severity == Severity::Info,
            LevelFilter::Warn => severity == Severity::Warn,
            LevelFilter::Error => severity == Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemFilter {
    #[default]
    All,
    Tournament,
    Train,
    Eval,
    Io,
    Misc,
}

impl SubsystemFilter {
    pub fn parse(name: &str) -> Option<SubsystemFilter> {
        match name.trim() {
            "all" => Some(SubsystemFilter::All),
            "tournament" => Some(SubsystemFilter::Tournament),
            "train" => Some(SubsystemFilter::Train),
            "eval" => Some(SubsystemFilter::Eval),
            "io" => Some(SubsystemFilter::Io),
            "misc" => Some(SubsystemFilter::Misc),
            _ => None,
        }
    }

    fn admits(self, category: Category) -> bool {
        match self {
            SubsystemFilter::All => true,
            SubsystemFilter::Tournament => category == Category::Tournament,
            SubsystemFilter::Train => category == Category::Train,
            SubsystemFilter::Eval => category == Category::Eval,
            SubsystemFilter::Io => category == Category::Io,
            SubsystemFilter::Misc => category == Category::Misc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogWindow {
    #[default]
    #[serde(rename = "latest")]
    Latest,
    #[serde(rename = "lastN")]
    LastN,
    #[serde(rename = "all")]
    All,
}

impl LogWindow {
    pub fn parse(name: &str) -> Option<LogWindow> {
        match name.trim() {
            "latest" => Some(LogWindow::Latest),
            "lastN" | "lastn" | "last" => Some(LogWindow::LastN),
            "all" => Some(LogWindow::All),
            _ => None,
        }
    }
}

fn default_n() -> usize {
    200
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(default)]
    pub level: LevelFilter,
    #[serde(default)]
    pub subsystem: SubsystemFilter,
    #[serde(default)]
    pub window: LogWindow,
    #[serde(default = "default_n")]
    pub n: usize,
    #[serde(default)]
    pub paused: bool,
}

impl Default for LogFilter {
    fn default() -> Self {
        LogFilter {
            level: LevelFilter::All,
            subsystem: SubsystemFilter::All,
            window: LogWindow::Latest,
            n: default_n(),
            paused: false,
        }
    }
}

/// Key-wise patch for [`LogFilter`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilterPatch {
    pub level: Option<LevelFilter>,
    pub subsystem: Option<SubsystemFilter>,
    pub window: Option<LogWindow>,
    pub n: Option<usize>,
    pub paused: Option<bool>,
}

impl LogFilter {
    /// Apply a patch, returning `None` when it changes nothing.
    pub fn patched(&self, patch: &LogFilterPatch) -> Option<LogFilter> {
        let next = LogFilter {
            level: patch.level.unwrap_or(self.level),
            subsystem: patch.subsystem.unwrap_or(self.subsystem),
            window: patch.window.unwrap_or(self.window),
            n: patch.n.map(|n| n.max(1)).unwrap_or(self.n),
            paused: patch.paused.unwrap_or(self.paused),
        };
        (next != *self).then_some(next)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Index range of the buffer visible under the filter's window.
pub fn visible_slice(len: usize, filter: &LogFilter) -> std::ops::Range<usize> {
    let keep = match filter.window {
        LogWindow::All => len,
        LogWindow::Latest => LATEST_WINDOW,
        LogWindow::LastN => filter.n.max(1),
    };
    len.saturating_sub(keep)..len
}

/// Entries visible in the logs tab: window first, then level and subsystem.
pub fn filtered_view<'a>(logs: &'a [LogEntry], filter: &LogFilter) -> Vec<&'a LogEntry> {
    logs[visible_slice(logs.len(), filter)]
        .iter()
        .filter(|entry| {
            let (severity, category) = classify(entry);
            filter.level.admits(severity) && filter.subsystem.admits(category)
        })
        .collect()
}
