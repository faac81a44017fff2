//! Session storage.
//!
//! [`MemorySessionStore`] keeps sessions in a concurrent map.
//! [`RedbSessionStore`] persists them in a redb embedded database so they
//! survive restarts.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use tracing::{debug, warn};

use super::types::{Session, SessionId};
use crate::error::SessionError;

/// Backing store for sessions.
///
/// `insert_new` must be an atomic check-and-insert.
pub trait SessionStore: Send + Sync {
    /// Store a session under an unused ID, failing with `Collision` otherwise.
    fn insert_new(&self, session: Session) -> Result<(), SessionError>;

    /// Load a session. Expiry is the caller's concern.
    fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError>;

    /// Delete a session. Returns whether it existed.
    fn remove(&self, id: &SessionId) -> Result<bool, SessionError>;

    /// Delete all sessions for a subject (for logout).
    fn remove_by_subject(&self, subject: &str) -> Result<usize, SessionError>;

    /// Delete sessions expired at `now`. Returns the number removed.
    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError>;

    /// Number of stored sessions.
    fn len(&self) -> Result<usize, SessionError>;
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert_new(&self, session: Session) -> Result<(), SessionError> {
        match self.sessions.entry(session.id) {
            Entry::Occupied(_) => Err(SessionError::Collision),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    fn remove(&self, id: &SessionId) -> Result<bool, SessionError> {
        Ok(self.sessions.remove(id).is_some())
    }

    fn remove_by_subject(&self, subject: &str) -> Result<usize, SessionError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.subject != subject);
        Ok(before.saturating_sub(self.sessions.len()))
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok(before.saturating_sub(self.sessions.len()))
    }

    fn len(&self) -> Result<usize, SessionError> {
        Ok(self.sessions.len())
    }
}

/// redb table for sessions (key: session_id hex, value: MessagePack bytes).
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("saml_sessions");

/// Session store backed by redb embedded database.
pub struct RedbSessionStore {
    /// redb database handle.
    db: Database,
}

impl RedbSessionStore {
    /// Open or create a session store at the given path.
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SessionError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let db = Database::create(path).map_err(SessionError::storage)?;

        // Initialize tables
        let write_txn = db.begin_write().map_err(SessionError::storage)?;
        {
            let _ = write_txn
                .open_table(SESSIONS_TABLE)
                .map_err(SessionError::storage)?;
        }
        write_txn.commit().map_err(SessionError::storage)?;

        let store = Self { db };
        debug!(
            path = %path.display(),
            sessions = store.len()?,
            "Opened session database"
        );
        Ok(store)
    }

    fn decode(bytes: &[u8]) -> Result<Session, SessionError> {
        rmp_serde::from_slice(bytes).map_err(SessionError::storage)
    }

    /// Collect keys of stored sessions matching `pred`. Undecodable records are included.
    fn keys_where(&self, pred: impl Fn(&Session) -> bool) -> Result<Vec<String>, SessionError> {
        let read_txn = self.db.begin_read().map_err(SessionError::storage)?;
        let table = read_txn
            .open_table(SESSIONS_TABLE)
            .map_err(SessionError::storage)?;

        let mut keys = Vec::new();
        for entry in table.iter().map_err(SessionError::storage)? {
            let (key, value) = entry.map_err(SessionError::storage)?;
            match Self::decode(value.value()) {
                Ok(session) if pred(&session) => keys.push(key.value().to_string()),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize session, marking for deletion");
                    keys.push(key.value().to_string());
                }
            }
        }
        Ok(keys)
    }

    fn remove_keys(&self, keys: &[String]) -> Result<usize, SessionError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let write_txn = self.db.begin_write().map_err(SessionError::storage)?;
        let mut removed = 0;
        {
            let mut table = write_txn
                .open_table(SESSIONS_TABLE)
                .map_err(SessionError::storage)?;
            for key in keys {
                if table
                    .remove(key.as_str())
                    .map_err(SessionError::storage)?
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(SessionError::storage)?;
        Ok(removed)
    }
}

impl SessionStore for RedbSessionStore {
    fn insert_new(&self, session: Session) -> Result<(), SessionError> {
        let data = rmp_serde::to_vec(&session).map_err(SessionError::storage)?;
        let key = session.id.to_hex();

        // redb serializes write transactions, so check-then-insert is atomic.
        let write_txn = self.db.begin_write().map_err(SessionError::storage)?;
        {
            let mut table = write_txn
                .open_table(SESSIONS_TABLE)
                .map_err(SessionError::storage)?;
            let exists = table
                .get(key.as_str())
                .map_err(SessionError::storage)?
                .is_some();
            if exists {
                return Err(SessionError::Collision);
            }
            table
                .insert(key.as_str(), data.as_slice())
                .map_err(SessionError::storage)?;
        }
        write_txn.commit().map_err(SessionError::storage)?;
        Ok(())
    }

    fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        let read_txn = self.db.begin_read().map_err(SessionError::storage)?;
        let table = read_txn
            .open_table(SESSIONS_TABLE)
            .map_err(SessionError::storage)?;

        let key = id.to_hex();
        match table.get(key.as_str()).map_err(SessionError::storage)? {
            Some(value) => Self::decode(value.value()).map(Some),
            None => Ok(None),
        }
    }

    fn remove(&self, id: &SessionId) -> Result<bool, SessionError> {
        Ok(self.remove_keys(&[id.to_hex()])? > 0)
    }

    fn remove_by_subject(&self, subject: &str) -> Result<usize, SessionError> {
        let keys = self.keys_where(|s| s.subject == subject)?;
        self.remove_keys(&keys)
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let keys = self.keys_where(|s| s.is_expired_at(now))?;
        self.remove_keys(&keys)
    }

    fn len(&self) -> Result<usize, SessionError> {
        let read_txn = self.db.begin_read().map_err(SessionError::storage)?;
        let table = read_txn
            .open_table(SESSIONS_TABLE)
            .map_err(SessionError::storage)?;
        let len = table.len().map_err(SessionError::storage)?;
        Ok(usize::try_from(len).unwrap_or(usize::MAX))
    }
}
