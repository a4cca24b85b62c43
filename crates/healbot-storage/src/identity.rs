//! Persistent patient identity store.
//!
//! Maps a patient display name to the last session identifier the service
//! issued for it, and remembers the most recently used name. Keys follow the
//! layout `patientName` and `session_<name>`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use healbot_core::error::HealbotError;
use healbot_core::types::SessionId;

use crate::db::Database;

const LAST_NAME_KEY: &str = "patientName";

fn session_key(name: &str) -> String {
    format!("session_{}", name)
}

fn validate_name(name: &str) -> Result<&str, HealbotError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(HealbotError::Storage(
            "patient name must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Durable name -> session identifier mapping.
///
/// Every write is an upsert: one record per name, replaced wholesale.
pub trait IdentityStore: Send + Sync {
    /// The display name saved by the last successful session start.
    fn last_name(&self) -> Result<Option<String>, HealbotError>;

    fn save_name(&self, name: &str) -> Result<(), HealbotError>;

    fn session_for(&self, name: &str) -> Result<Option<SessionId>, HealbotError>;

    fn save_session_for(&self, name: &str, id: &SessionId) -> Result<(), HealbotError>;

    /// Drop the stored identifier for `name`. Missing records are not an error.
    fn forget_session_for(&self, name: &str) -> Result<(), HealbotError>;
}

// =============================================================================
// SQLite-backed store
// =============================================================================

/// Identity store persisted in the `kv` table.
#[derive(Debug, Clone)]
pub struct SqliteIdentityStore {
    db: Arc<Database>,
}

impl SqliteIdentityStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn last_name(&self) -> Result<Option<String>, HealbotError> {
        self.db.get_value(LAST_NAME_KEY)
    }

    fn save_name(&self, name: &str) -> Result<(), HealbotError> {
        let name = validate_name(name)?;
        self.db.put_value(LAST_NAME_KEY, name)?;
        debug!(patient = %name, "Saved patient name");
        Ok(())
    }

    fn session_for(&self, name: &str) -> Result<Option<SessionId>, HealbotError> {
        let name = validate_name(name)?;
        Ok(self.db.get_value(&session_key(name))?.map(SessionId::from))
    }

    fn save_session_for(&self, name: &str, id: &SessionId) -> Result<(), HealbotError> {
        let name = validate_name(name)?;
        self.db.put_value(&session_key(name), id.as_str())?;
        debug!(patient = %name, session_id = %id, "Saved session for patient");
        Ok(())
    }

    fn forget_session_for(&self, name: &str) -> Result<(), HealbotError> {
        let name = validate_name(name)?;
        if self.db.delete_value(&session_key(name))? {
            debug!(patient = %name, "Forgot session for patient");
        }
        Ok(())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Non-durable identity store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> T,
    ) -> Result<T, HealbotError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| HealbotError::Storage(format!("identity lock poisoned: {}", e)))?;
        Ok(f(&mut entries))
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn last_name(&self) -> Result<Option<String>, HealbotError> {
        self.with_entries(|e| e.get(LAST_NAME_KEY).cloned())
    }

    fn save_name(&self, name: &str) -> Result<(), HealbotError> {
        let name = validate_name(name)?;
        self.with_entries(|e| {
            e.insert(LAST_NAME_KEY.to_string(), name.to_string());
        })
    }

    fn session_for(&self, name: &str) -> Result<Option<SessionId>, HealbotError> {
        let key = session_key(validate_name(name)?);
        self.with_entries(|e| e.get(&key).cloned().map(SessionId::from))
    }

    fn save_session_for(&self, name: &str, id: &SessionId) -> Result<(), HealbotError> {
        let key = session_key(validate_name(name)?);
        self.with_entries(|e| {
            e.insert(key, id.to_string());
        })
    }

    fn forget_session_for(&self, name: &str) -> Result<(), HealbotError> {
        let key = session_key(validate_name(name)?);
        self.with_entries(|e| {
            e.remove(&key);
        })
    }
}
