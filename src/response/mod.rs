//! Inbound SAML Response handling.

pub mod assertion;
pub mod replay;
pub mod validator;

pub use assertion::{Assertion, SamlAttribute};
pub use replay::AssertionReplayCache;
pub use validator::ResponseValidator;
