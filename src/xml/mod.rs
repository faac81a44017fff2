//! XML handling for SAML messages.
//!
//! A small element tree plus exclusive canonicalization, enough to verify and
//! produce enveloped XML signatures.

pub mod c14n;
pub mod tree;

pub use c14n::{canonicalize, canonicalize_excluding, escape_attr, escape_text, serialize};
pub use tree::{parse, Attribute, Element, Node};

/// SAML 2.0 protocol namespace.
pub const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// SAML 2.0 assertion namespace.
pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// SAML 2.0 metadata namespace.
pub const MD_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
/// XML-DSig namespace.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
