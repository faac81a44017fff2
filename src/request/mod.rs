//! AuthnRequest building and correlation.

pub mod authn;
pub mod pending;

pub use authn::{generate_id, AuthnRequest, RequestBuilder};
pub use pending::{MemoryPendingStore, PendingRequestStore};
