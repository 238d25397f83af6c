//! SQLite-backed local settings.
//!
//! A single `local_settings` (category/key/value) table holds client-side
//! preferences when no OS keyring is available. Session keys live under the
//! `session` category.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{DineError, DineResult};
use crate::storage::SessionStore;

const SESSION_CATEGORY: &str = "session";

pub struct LocalSettings {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl LocalSettings {
    /// Open (or create) the settings database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DineResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DineError::Storage(format!("create settings dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        configure(&conn)?;
        run_migrations(&conn)?;
        info!(path = %path.display(), "local settings opened");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> DineResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> DineResult<T>) -> DineResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DineError::Storage(e.to_string()))?;
        f(&conn)
    }
}

fn configure(conn: &Connection) -> DineResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> DineResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (setting_category, setting_key)
        );",
    )?;
    Ok(())
}

/// `Ok(None)` when the key is absent; any other SQLite failure is an error.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> DineResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
            params![category, key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> DineResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> DineResult<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )?;
    Ok(())
}

impl SessionStore for LocalSettings {
    fn get(&self, key: &str) -> DineResult<Option<String>> {
        self.with_conn(|conn| get_setting(conn, SESSION_CATEGORY, key))
    }

    fn set(&self, key: &str, value: &str) -> DineResult<()> {
        self.with_conn(|conn| set_setting(conn, SESSION_CATEGORY, key, value))
    }

    fn clear(&self, key: &str) -> DineResult<()> {
        self.with_conn(|conn| delete_setting(conn, SESSION_CATEGORY, key))
    }
}
