// SQLite key-value storage backing the persisted dashboard state.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};

use crate::persist::KvStorage;

/// SQLite-backed key-value store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure the table
    /// exists. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn save_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load the value stored under `key`, or `None` if the key is absent.
    pub fn load_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT value FROM kv_state WHERE key = ?1")
            .context("failed to prepare load_state query")?;

        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .context("failed to query state")?;

        match rows.next() {
            Some(row_result) => Ok(Some(row_result.context("failed to read state row")?)),
            None => Ok(None),
        }
    }
}

impl KvStorage for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.load_state(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.save_state(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{PersistenceManager, DEFAULT_DEBOUNCE, STATE_KEY};
    use crate::protocol::Tab;
    use crate::state::AppState;
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    #[test]
    fn open_creates_table() {
        let db = test_db();
        let conn = db.conn().unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"kv_state".to_string()));
    }

    #[test]
    fn save_and_load_round_trip() {
        let db = test_db();
        db.save_state("k", r#"{"activeTab":"logs"}"#).unwrap();
        assert_eq!(
            db.load_state("k").unwrap().as_deref(),
            Some(r#"{"activeTab":"logs"}"#)
        );
    }

    #[test]
    fn load_returns_none_for_missing_key() {
        let db = test_db();
        assert!(db.load_state("nonexistent").unwrap().is_none());
    }

    #[test]
    fn save_overwrites_previous_value() {
        let db = test_db();
        db.save_state("key", "1").unwrap();
        db.save_state("key", "2").unwrap();
        assert_eq!(db.load_state("key").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn serves_as_persistence_backend() {
        let path = std::env::temp_dir().join(format!("nnwatch-db-test-{}.db", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        {
            let db = Database::open(&path_str).unwrap();
            let mut pm = PersistenceManager::new(Box::new(db), DEFAULT_DEBOUNCE);
            let state = Arc::new(AppState::new(Instant::now()));
            let state = crate::actions::set_active_tab(&state, Tab::Tournaments);
            assert!(pm.flush(&state));
            pm.save_admin(true);
        }

        let db = Database::open(&path_str).unwrap();
        assert!(db.load_state(STATE_KEY).unwrap().is_some());
        let mut pm = PersistenceManager::new(Box::new(db), DEFAULT_DEBOUNCE);
        let restored = pm.hydrate(&Arc::new(AppState::new(Instant::now())));
        assert_eq!(restored.active_tab, Tab::Tournaments);
        assert!(restored.ui.admin.enabled);

        let _ = std::fs::remove_file(&path);
    }
}
