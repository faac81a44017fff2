//! Session management for SAML authentication.
//!
//! Sessions live in a [`SessionStore`]: in memory by default, or in redb when
//! they must survive restarts. Expiry is checked on every lookup and swept in
//! the background.

pub mod cleanup;
pub mod manager;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use manager::SessionManager;
pub use store::{MemorySessionStore, RedbSessionStore, SessionStore};
pub use types::{Session, SessionId};
