//! SAML 2.0 service-provider session gate.
//!
//! Sits in front of an axum application: unauthenticated browsers are sent
//! to the IdP with a signed AuthnRequest, the IdP's Response is validated at
//! the Assertion Consumer Service, and a session cookie carries the resulting
//! identity on later requests.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metadata;
pub mod request;
pub mod response;
pub mod server;
pub mod service;
pub mod session;
pub mod signature;
pub mod xml;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{SpConfig, SpConfigJson};
pub use dispatcher::{dispatch, Flow, Pipeline, Stage};
pub use error::{ConfigError, MetadataError, ProtocolError, SessionError, SpError, SpResult};
pub use metadata::{IdpMetadata, MetadataSource, MetadataStore};
pub use response::Assertion;
pub use server::{echo_session, router};
pub use service::{LoginOutcome, ServiceProvider, ServiceProviderBuilder, SweepReport};
pub use session::{Session, SessionId, SessionManager, SessionStore};
pub use signature::SpKeyPair;
