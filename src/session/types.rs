//! Local sessions minted from validated assertions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::response::Assertion;

/// Unique session identifier (32-byte random value, hex-encoded for cookies).
///
/// Unrelated to any SAML identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; 32]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Convert to hex string for storage/cookies.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An authenticated session with the subject's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session ID.
    pub id: SessionId,

    /// Subject NameID of the assertion.
    pub subject: String,

    /// SAML NameID format (e.g., emailAddress, persistent).
    pub name_id_format: Option<String>,

    /// IdP entity ID that issued this session.
    pub idp_entity_id: String,

    /// AuthnStatement SessionIndex, kept for IdP logout.
    pub session_index: Option<String>,

    /// Assertion this session was created from.
    pub assertion_id: String,

    /// SAML assertion attributes as key → values, keyed by FriendlyName
    /// when the IdP provides one.
    pub attributes: BTreeMap<String, Vec<String>>,

    /// Session creation time.
    pub created_at: DateTime<Utc>,

    /// Session expiry time. Never later than the assertion's validity.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// New session for a validated assertion.
    ///
    /// Expires after `ttl` or when the assertion does, whichever is first.
    pub fn from_assertion(assertion: &Assertion, now: DateTime<Utc>, ttl: Duration) -> Self {
        let mut expires_at = now + ttl;
        if let Some(not_on_or_after) = assertion.not_on_or_after {
            expires_at = expires_at.min(not_on_or_after);
        }

        let mut attributes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for attr in &assertion.attributes {
            let key = attr.friendly_name.clone().unwrap_or_else(|| attr.name.clone());
            attributes
                .entry(key)
                .or_default()
                .extend(attr.values.iter().cloned());
        }

        Self {
            id: SessionId::new(),
            subject: assertion.subject.clone(),
            name_id_format: assertion.name_id_format.clone(),
            idp_entity_id: assertion.issuer.clone(),
            session_index: assertion.session_index.clone(),
            assertion_id: assertion.id.clone(),
            attributes,
            created_at: now,
            expires_at,
        }
    }

    /// Check if the session is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds left, for the cookie `Max-Age`.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }

    /// Get a single-valued attribute.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::SamlAttribute;

    fn assertion(not_on_or_after: Option<DateTime<Utc>>) -> Assertion {
        Assertion {
            id: "_a1".to_string(),
            issuer: "https://idp.example.com".to_string(),
            subject: "user@example.com".to_string(),
            name_id_format: None,
            session_index: Some("_s1".to_string()),
            attributes: vec![
                SamlAttribute {
                    name: "urn:oid:0.9.2342.19200300.100.1.3".to_string(),
                    friendly_name: Some("mail".to_string()),
                    values: vec!["user@example.com".to_string()],
                },
                SamlAttribute {
                    name: "groups".to_string(),
                    friendly_name: None,
                    values: vec!["admin".to_string(), "users".to_string()],
                },
            ],
            not_before: None,
            not_on_or_after,
            audiences: vec![],
            in_response_to: None,
            relay_state: None,
            signature_reference: "_a1".to_string(),
        }
    }

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        let parsed = SessionId::from_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_session_id_invalid_hex() {
        assert!(SessionId::from_hex("not-valid-hex").is_none());
        assert!(SessionId::from_hex("abcd").is_none()); // too short
        assert!(SessionId::from_hex("").is_none());
    }

    #[test]
    fn test_session_expiry_capped_by_assertion() {
        let now = Utc::now();
        let session = Session::from_assertion(
            &assertion(Some(now + Duration::minutes(5))),
            now,
            Duration::hours(8),
        );
        assert_eq!(session.expires_at, now + Duration::minutes(5));
        assert!(!session.is_expired_at(now));
        assert!(session.is_expired_at(now + Duration::minutes(5)));
        assert_eq!(session.remaining_secs(now), 300);
        assert_eq!(session.remaining_secs(now + Duration::hours(1)), 0);
    }

    #[test]
    fn test_session_expiry_from_ttl() {
        let now = Utc::now();
        let session = Session::from_assertion(&assertion(None), now, Duration::hours(1));
        assert_eq!(session.expires_at, now + Duration::hours(1));
    }

    #[test]
    fn test_session_attributes() {
        let session = Session::from_assertion(&assertion(None), Utc::now(), Duration::hours(1));
        assert_eq!(session.get_attribute("mail"), Some("user@example.com"));
        assert_eq!(session.get_attribute("groups"), Some("admin")); // first value
        assert_eq!(session.get_attribute("missing"), None);
        assert_eq!(session.session_index.as_deref(), Some("_s1"));
    }
}
