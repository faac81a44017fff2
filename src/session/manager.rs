//! Session issue, lookup and revocation.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::store::SessionStore;
use super::types::{Session, SessionId};
use crate::clock::SharedClock;
use crate::error::SessionError;
use crate::response::Assertion;

/// Fresh IDs to try before giving up on a colliding store.
const MAX_ISSUE_ATTEMPTS: usize = 3;

/// Turns validated assertions into sessions and resolves them again.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: SharedClock,
    ttl: Duration,
}

impl SessionManager {
    /// Manager over `store` issuing sessions that last at most `ttl`.
    pub fn new(store: Arc<dyn SessionStore>, clock: SharedClock, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Create and persist a session for a validated assertion.
    pub fn issue(&self, assertion: &Assertion) -> Result<Session, SessionError> {
        let now = self.clock.now();
        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let session = Session::from_assertion(assertion, now, self.ttl);
            match self.store.insert_new(session.clone()) {
                Ok(()) => {
                    info!(
                        user_id = %session.subject,
                        idp = %session.idp_entity_id,
                        expires_at = %session.expires_at,
                        "Session issued"
                    );
                    return Ok(session);
                }
                Err(SessionError::Collision) => {
                    warn!("Session ID collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }
        Err(SessionError::Collision)
    }

    /// Look up a live session.
    ///
    /// An expired session is removed on sight and reported as `Expired`.
    pub fn resolve(&self, id: &SessionId) -> Result<Session, SessionError> {
        let session = self.store.get(id)?.ok_or(SessionError::NotFound)?;
        if session.is_expired_at(self.clock.now()) {
            if let Err(e) = self.store.remove(id) {
                debug!(error = %e, "Failed to evict expired session");
            }
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// Resolve the hex token carried in a cookie. Malformed tokens are `NotFound`.
    pub fn resolve_token(&self, token: &str) -> Result<Session, SessionError> {
        let id = SessionId::from_hex(token).ok_or(SessionError::NotFound)?;
        self.resolve(&id)
    }

    /// End one session. Returns whether it existed.
    pub fn revoke(&self, id: &SessionId) -> Result<bool, SessionError> {
        let removed = self.store.remove(id)?;
        if removed {
            debug!("Session revoked");
        }
        Ok(removed)
    }

    /// End every session of a subject.
    pub fn revoke_subject(&self, subject: &str) -> Result<usize, SessionError> {
        let count = self.store.remove_by_subject(subject)?;
        info!(user_id = %subject, sessions = count, "Revoked sessions for subject");
        Ok(count)
    }

    /// Remove all expired sessions.
    pub fn sweep(&self) -> Result<usize, SessionError> {
        self.store.evict_expired(self.clock.now())
    }

    /// Number of stored sessions, live or not yet swept.
    pub fn len(&self) -> Result<usize, SessionError> {
        self.store.len()
    }
}
