//! Outstanding AuthnRequests awaiting a Response.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::authn::AuthnRequest;
use crate::error::SpError;

/// Short-lived store of AuthnRequests keyed by request ID.
///
/// `consume` must remove atomically with the lookup: it is what makes a
/// request ID usable at most once.
pub trait PendingRequestStore: Send + Sync {
    /// Register a new request. Duplicate IDs are rejected.
    fn insert(&self, request: AuthnRequest) -> Result<(), SpError>;

    /// Remove and return the request if it is still live at `now`.
    fn consume(&self, id: &str, now: DateTime<Utc>) -> Option<AuthnRequest>;

    /// Drop requests whose correlation window has closed. Returns how many.
    fn evict_expired(&self, now: DateTime<Utc>) -> usize;

    /// Number of stored requests, expired ones included.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process pending-request store.
#[derive(Debug)]
pub struct MemoryPendingStore {
    requests: DashMap<String, AuthnRequest>,
    max_entries: usize,
}

impl MemoryPendingStore {
    /// Store holding at most `max_entries` requests.
    pub fn new(max_entries: usize) -> Self {
        Self {
            requests: DashMap::new(),
            max_entries,
        }
    }
}

impl PendingRequestStore for MemoryPendingStore {
    fn insert(&self, request: AuthnRequest) -> Result<(), SpError> {
        if self.requests.len() >= self.max_entries {
            self.evict_expired(request.issue_instant);
            if self.requests.len() >= self.max_entries {
                return Err(SpError::PendingStore(format!(
                    "{} outstanding requests",
                    self.max_entries
                )));
            }
        }

        match self.requests.entry(request.id.clone()) {
            Entry::Occupied(_) => Err(SpError::PendingStore("duplicate request ID".into())),
            Entry::Vacant(slot) => {
                slot.insert(request);
                Ok(())
            }
        }
    }

    fn consume(&self, id: &str, now: DateTime<Utc>) -> Option<AuthnRequest> {
        self.requests
            .remove(id)
            .map(|(_, request)| request)
            .filter(|request| now < request.expires_at)
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.requests.len();
        self.requests.retain(|_, request| now < request.expires_at);
        before.saturating_sub(self.requests.len())
    }

    fn len(&self) -> usize {
        self.requests.len()
    }
}
