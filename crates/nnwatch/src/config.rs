// Configuration loading and validation (config/nnwatch.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use nnwatch_core::engine::SyncSettings;
use nnwatch_core::health::HealthThresholds;

pub const CONFIG_FILE: &str = "nnwatch.toml";

const EMBEDDED_DEFAULTS: &str = include_str!("../defaults/nnwatch.toml");

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// nnwatch.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub timing: TimingConfig,
    pub health: HealthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub sse_url: Option<String>,
}

impl ServerConfig {
    /// WebSocket URL, or `None` when unset or empty.
    pub fn ws(&self) -> Option<&str> {
        self.ws_url.as_deref().filter(|u| !u.trim().is_empty())
    }

    pub fn sse(&self) -> Option<&str> {
        self.sse_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub health_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub admin_timeout_ms: u64,
    pub persist_debounce_ms: u64,
    pub max_jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    pub dropped_after_secs: u64,
    pub stale_after_secs: u64,
    pub stall_after_secs: u64,
    pub offline_after_secs: u64,
    pub expected_api_version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub db_path: String,
}

impl Config {
    pub fn sync_settings(&self) -> SyncSettings {
        let t = &self.timing;
        let h = &self.health;
        SyncSettings {
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            health_interval: Duration::from_millis(t.health_interval_ms),
            connect_timeout: Duration::from_millis(t.connect_timeout_ms),
            fetch_timeout: Duration::from_millis(t.fetch_timeout_ms),
            admin_timeout: Duration::from_millis(t.admin_timeout_ms),
            persist_debounce: Duration::from_millis(t.persist_debounce_ms),
            max_jitter: Duration::from_millis(t.max_jitter_ms),
            thresholds: HealthThresholds {
                dropped_after: Duration::from_secs(h.dropped_after_secs),
                stale_after: Duration::from_secs(h.stale_after_secs),
                stall_after: Duration::from_secs(h.stall_after_secs),
                offline_after: Duration::from_secs(h.offline_after_secs),
                expected_api_version: h.expected_api_version.clone(),
            },
        }
    }

    /// Database location: the configured path, else `nnwatch.db` in the
    /// platform data directory, else the working directory.
    pub fn db_path(&self) -> PathBuf {
        if !self.storage.db_path.trim().is_empty() {
            return PathBuf::from(&self.storage.db_path);
        }
        match directories::ProjectDirs::from("", "", "nnwatch") {
            Some(dirs) => dirs.data_dir().join("nnwatch.db"),
            None => PathBuf::from("nnwatch.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/nnwatch.toml` relative to `base_dir`. Does not
/// copy defaults; see [`load_config`].
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;
    validate(&config)?;
    Ok(config)
}

/// Copy files missing from `config/` out of `defaults/`. Returns the list
/// of files that were copied.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Load config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    if cwd.join("defaults").exists() {
        ensure_config_files(&cwd)?;
    } else {
        write_embedded_defaults(&cwd)?;
    }
    load_config_from(&cwd)
}

/// Seed `config/` from the defaults compiled into the binary when no
/// `defaults/` directory ships alongside it.
pub fn write_embedded_defaults(base_dir: &Path) -> Result<bool, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(false);
    }
    let copy_err = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to write {}: {e}", target.display()),
    };
    std::fs::create_dir_all(base_dir.join("config")).map_err(copy_err)?;
    std::fs::write(&target, EMBEDDED_DEFAULTS).map_err(copy_err)?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let server = &config.server;
    if !(server.base_url.starts_with("http://") || server.base_url.starts_with("https://")) {
        return Err(invalid("server.base_url", "must start with http:// or https://"));
    }
    if let Some(ws) = server.ws() {
        if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
            return Err(invalid("server.ws_url", "must start with ws:// or wss://"));
        }
    }
    if let Some(sse) = server.sse() {
        if !(sse.starts_with("http://") || sse.starts_with("https://")) {
            return Err(invalid("server.sse_url", "must start with http:// or https://"));
        }
    }

    let t = &config.timing;
    let positive: &[(&str, u64)] = &[
        ("timing.poll_interval_ms", t.poll_interval_ms),
        ("timing.health_interval_ms", t.health_interval_ms),
        ("timing.connect_timeout_ms", t.connect_timeout_ms),
        ("timing.fetch_timeout_ms", t.fetch_timeout_ms),
        ("timing.admin_timeout_ms", t.admin_timeout_ms),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(invalid(name, "must be > 0"));
        }
    }

    let h = &config.health;
    if h.dropped_after_secs == 0 || h.stale_after_secs == 0 || h.offline_after_secs == 0 {
        return Err(invalid("health", "thresholds must be > 0"));
    }
    if h.dropped_after_secs > h.stale_after_secs {
        return Err(invalid(
            "health.dropped_after_secs",
            format!(
                "must not exceed stale_after_secs ({} > {})",
                h.dropped_after_secs, h.stale_after_secs
            ),
        ));
    }
    if h.stall_after_secs == 0 {
        return Err(invalid("health.stall_after_secs", "must be > 0"));
    }
    if h.expected_api_version.trim().is_empty() {
        return Err(invalid("health.expected_api_version", "must not be empty"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// The crate directory holds `defaults/`.
    fn project_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    }

    fn default_text() -> String {
        fs::read_to_string(project_root().join("defaults").join(CONFIG_FILE)).unwrap()
    }

    /// Write `text` as config/nnwatch.toml under a fresh temp dir.
    fn temp_config(name: &str, text: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), text).unwrap();
        tmp
    }

    #[test]
    fn defaults_load_and_convert() {
        let tmp = temp_config("nnwatch_config_defaults", &default_text());
        let config = load_config_from(&tmp).expect("defaults should be valid");

        assert_eq!(config.server.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.server.ws(), Some("ws://127.0.0.1:8000/ws"));

        let settings = config.sync_settings();
        assert_eq!(settings, SyncSettings::default());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn empty_push_urls_disable_transports() {
        let text = default_text()
            .replace("ws_url = \"ws://127.0.0.1:8000/ws\"", "ws_url = \"\"")
            .replace("sse_url = \"http://127.0.0.1:8000/events\"\n", "");
        let tmp = temp_config("nnwatch_config_no_push", &text);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.server.ws(), None);
        assert_eq!(config.server.sse(), None);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn explicit_db_path_wins() {
        let text = default_text().replace("db_path = \"\"", "db_path = \"state/dash.db\"");
        let tmp = temp_config("nnwatch_config_db_path", &text);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("state/dash.db"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let text = default_text().replace("poll_interval_ms = 2000", "poll_interval_ms = 0");
        let tmp = temp_config("nnwatch_config_zero_poll", &text);
        let err = load_config_from(&tmp).unwrap_err();
        assert!(
            matches!(
                &err,
                ConfigError::ValidationError { field, .. } if field == "timing.poll_interval_ms"
            ),
            "unexpected error: {err}"
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_bad_ws_scheme() {
        let text = default_text().replace("ws://127.0.0.1:8000/ws", "http://127.0.0.1:8000/ws");
        let tmp = temp_config("nnwatch_config_bad_ws", &text);
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ValidationError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_dropped_after_stale() {
        let text = default_text().replace("dropped_after_secs = 5", "dropped_after_secs = 30");
        let tmp = temp_config("nnwatch_config_dropped_gt_stale", &text);
        assert!(load_config_from(&tmp).is_err());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_names_the_file() {
        let tmp = temp_config("nnwatch_config_parse_error", "[server\nbase_url = ");
        match load_config_from(&tmp) {
            Err(ConfigError::ParseError { path, .. }) => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected parse error, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_file_is_reported() {
        let tmp = std::env::temp_dir().join("nnwatch_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::FileNotFound { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_once() {
        let tmp = std::env::temp_dir().join("nnwatch_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults").join(CONFIG_FILE), default_text()).unwrap();

        let copied = ensure_config_files(&tmp).unwrap();
        assert_eq!(copied, vec![tmp.join("config").join(CONFIG_FILE)]);
        assert!(ensure_config_files(&tmp).unwrap().is_empty());
        assert!(load_config_from(&tmp).is_ok());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn embedded_defaults_seed_missing_config() {
        let tmp = std::env::temp_dir().join("nnwatch_config_embedded");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        assert!(write_embedded_defaults(&tmp).unwrap());
        assert!(!write_embedded_defaults(&tmp).unwrap());
        let written = fs::read_to_string(tmp.join("config").join(CONFIG_FILE)).unwrap();
        assert_eq!(written, default_text());
        assert!(load_config_from(&tmp).is_ok());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_without_any_dir_errors() {
        let tmp = std::env::temp_dir().join("nnwatch_config_nothing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        assert!(matches!(
            ensure_config_files(&tmp),
            Err(ConfigError::DefaultsCopyError { .. })
        ));
        let _ = fs::remove_dir_all(&tmp);
    }
}
