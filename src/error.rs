//! Error taxonomy for the service provider.
//!
//! Startup problems surface as [`ConfigError`] or [`MetadataError`], per-request
//! SAML failures as [`ProtocolError`], and session lookups as [`SessionError`].
//! [`SpError`] wraps all of them for callers that do not care which stage failed.

use thiserror::Error;

/// Result alias for service-provider operations.
pub type SpResult<T> = Result<T, SpError>;

/// Invalid or incomplete configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A setting was provided but is unusable.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A file referenced by the configuration could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Key material could not be loaded.
    #[error("key material: {0}")]
    Keys(#[from] CryptoError),
}

/// IdP metadata could not be obtained or used.
///
/// A `Fetch` failure during a background refresh is transient: it is logged
/// and the previous snapshot stays in effect.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Network or HTTP failure while fetching the metadata document.
    #[error("failed to fetch IdP metadata: {0}")]
    Fetch(String),

    /// The document was fetched but does not describe a usable IdP.
    #[error("invalid IdP metadata: {0}")]
    InvalidMetadata(String),

    /// No metadata has been loaded yet.
    #[error("IdP metadata not initialized")]
    NotInitialized,
}

/// A SAML Response was rejected.
///
/// Every variant maps to HTTP 400 and a stable reason code for logs.
/// Messages never carry key material or raw signature bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The document is not well-formed or not a SAML Response.
    #[error("malformed SAML message: {0}")]
    MalformedXml(String),

    /// A mandatory element or attribute is absent.
    #[error("missing required element: {0}")]
    MissingElement(&'static str),

    /// No trusted certificate verifies the signature.
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// The assertion is past its NotOnOrAfter (plus clock skew).
    #[error("assertion expired")]
    Expired,

    /// The assertion is before its NotBefore (minus clock skew).
    #[error("assertion not yet valid")]
    NotYetValid,

    /// The audience restriction does not name this SP.
    #[error("audience mismatch: expected {expected}")]
    AudienceMismatch {
        /// This SP's entity ID.
        expected: String,
        /// Audiences found in the assertion.
        actual: Vec<String>,
    },

    /// The issuer is not the IdP from the current metadata.
    #[error("unknown issuer: {0}")]
    IssuerUnknown(String),

    /// InResponseTo names no live pending request (unknown, expired or consumed),
    /// or an unsolicited assertion ID was already seen.
    #[error("unknown, expired or already consumed request ID")]
    ReplayedRequestId,

    /// The response has no InResponseTo and unsolicited responses are disabled.
    #[error("unsolicited response not accepted")]
    Unsolicited,

    /// Destination or Recipient does not equal this SP's ACS URL.
    #[error("destination mismatch: expected {expected}, got {actual}")]
    DestinationMismatch {
        /// ACS URL of this SP.
        expected: String,
        /// Value found in the message.
        actual: String,
    },

    /// The IdP reported a non-success status.
    #[error("IdP returned status {0}")]
    StatusNotSuccess(String),
}

impl ProtocolError {
    /// Stable identifier for logs and error pages.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::MalformedXml(_) => "MALFORMED_XML",
            Self::MissingElement(_) => "MISSING_ELEMENT",
            Self::SignatureInvalid(_) => "SIGNATURE_INVALID",
            Self::Expired => "EXPIRED",
            Self::NotYetValid => "NOT_YET_VALID",
            Self::AudienceMismatch { .. } => "AUDIENCE_MISMATCH",
            Self::IssuerUnknown(_) => "ISSUER_UNKNOWN",
            Self::ReplayedRequestId => "REPLAYED_REQUEST_ID",
            Self::Unsolicited => "UNSOLICITED_RESPONSE",
            Self::DestinationMismatch { .. } => "DESTINATION_MISMATCH",
            Self::StatusNotSuccess(_) => "STATUS_NOT_SUCCESS",
        }
    }
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(err: quick_xml::Error) -> Self {
        Self::MalformedXml(err.to_string())
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedXml(format!("base64: {err}"))
    }
}

/// Session lookup or storage failure.
///
/// `NotFound` and `Expired` send the browser back through login rather than
/// to an error page.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with that ID.
    #[error("session not found")]
    NotFound,

    /// The session existed but its expiry has passed.
    #[error("session expired")]
    Expired,

    /// A freshly generated ID was already taken.
    #[error("session ID collision")]
    Collision,

    /// The backing store failed.
    #[error("session storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Wrap any displayable backend error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Key, certificate or signing failure.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// PEM armour or base64 payload is broken.
    #[error("invalid PEM: {0}")]
    Pem(String),

    /// Key type or curve is not supported.
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    /// X.509 certificate could not be parsed.
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// The private key refused to sign.
    #[error("signing failed")]
    Signing,

    /// The content to sign could not be canonicalized.
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
}

/// Umbrella error for service-provider operations.
#[derive(Debug, Error)]
pub enum SpError {
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// See [`MetadataError`].
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// See [`ProtocolError`].
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// See [`SessionError`].
    #[error(transparent)]
    Session(#[from] SessionError),

    /// See [`CryptoError`].
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The pending AuthnRequest store refused the request.
    #[error("pending request store: {0}")]
    PendingStore(String),

    /// An outgoing message could not be encoded.
    #[error("message encoding failed: {0}")]
    Encoding(String),
}

impl SpError {
    /// HTTP status used when this error reaches the browser.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Protocol(_) => 400,
            Self::Session(SessionError::NotFound | SessionError::Expired) => 401,
            Self::Metadata(_) | Self::PendingStore(_) => 503,
            _ => 500,
        }
    }

    /// Reason code for logs.
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.reason_code(),
            Self::Config(_) => "CONFIG_ERROR",
            Self::Metadata(_) => "METADATA_UNAVAILABLE",
            Self::Session(_) => "SESSION_ERROR",
            Self::Crypto(_) => "CRYPTO_ERROR",
            Self::PendingStore(_) => "PENDING_STORE_FULL",
            Self::Encoding(_) => "ENCODING_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_bad_requests() {
        let err: SpError = ProtocolError::Expired.into();
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.reason_code(), "EXPIRED");

        let err: SpError = ProtocolError::SignatureInvalid("digest mismatch".into()).into();
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.reason_code(), "SIGNATURE_INVALID");
    }

    #[test]
    fn session_and_metadata_statuses() {
        assert_eq!(SpError::from(SessionError::NotFound).http_status(), 401);
        assert_eq!(
            SpError::from(SessionError::Storage("disk".into())).http_status(),
            500
        );
        assert_eq!(SpError::from(MetadataError::NotInitialized).http_status(), 503);
    }

    #[test]
    fn audience_message_does_not_list_actual_values() {
        let err = ProtocolError::AudienceMismatch {
            expected: "https://sp.example.com".into(),
            actual: vec!["https://other.example.com".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("https://sp.example.com"));
        assert!(!msg.contains("other.example.com"));
    }
}
