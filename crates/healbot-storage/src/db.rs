//! SQLite-backed key/value storage.
//!
//! One `kv` table standing in for the browser's local storage: string keys,
//! string values, last write wins.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use healbot_core::error::HealbotError;

use crate::migrations;

/// Thread-safe SQLite database holding the key/value table.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Creates the parent directory if needed and runs all pending
    /// migrations.
    pub fn new(path: &Path) -> Result<Self, HealbotError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| HealbotError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| HealbotError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, HealbotError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HealbotError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` against the connection while holding the lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, HealbotError>
    where
        F: FnOnce(&Connection) -> Result<T, HealbotError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| HealbotError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Read the value stored under `key`.
    pub fn get_value(&self, key: &str) -> Result<Option<String>, HealbotError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| HealbotError::Storage(format!("Failed to read {}: {}", key, e)))
        })
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put_value(&self, key: &str, value: &str) -> Result<(), HealbotError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value],
            )
            .map_err(|e| HealbotError::Storage(format!("Failed to write {}: {}", key, e)))?;
            Ok(())
        })
    }

    /// Remove `key`. Returns whether a value was stored.
    pub fn delete_value(&self, key: &str) -> Result<bool, HealbotError> {
        self.with_conn(|conn| {
            let removed = conn
                .execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| HealbotError::Storage(format!("Failed to delete {}: {}", key, e)))?;
            Ok(removed > 0)
        })
    }

    pub fn count_values(&self) -> Result<usize, HealbotError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| HealbotError::Storage(format!("Failed to count values: {}", e)))
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database_starts_empty() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.count_values().unwrap(), 0);
        assert_eq!(db.get_value("patientName").unwrap(), None);
    }

    #[test]
    fn test_put_overwrites_and_delete_reports() {
        let db = Database::in_memory().unwrap();
        db.put_value("session_Alice", "s1").unwrap();
        db.put_value("session_Alice", "s2").unwrap();
        assert_eq!(db.get_value("session_Alice").unwrap().as_deref(), Some("s2"));
        assert_eq!(db.count_values().unwrap(), 1);

        assert!(db.delete_value("session_Alice").unwrap());
        assert!(!db.delete_value("session_Alice").unwrap());
        assert_eq!(db.get_value("session_Alice").unwrap(), None);
    }

    #[test]
    fn test_file_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.db");
        let db = Database::new(&path).unwrap();

        assert_eq!(db.count_values().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.db");
        {
            let db = Database::new(&path).unwrap();
            db.put_value("patientName", "Bob").unwrap();
        }

        let db = Database::new(&path).unwrap();
        assert_eq!(db.get_value("patientName").unwrap().as_deref(), Some("Bob"));
        let version: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                    row.get(0)
                })
                .map_err(|e| HealbotError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(version, 1);
    }
}
