//! SP-initiated AuthnRequest construction (HTTP-Redirect binding).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

use super::pending::PendingRequestStore;
use crate::clock::SharedClock;
use crate::error::SpError;
use crate::metadata::{MetadataStore, BINDING_POST};
use crate::signature::{sign_redirect_query, SpKeyPair};
use crate::xml::{escape_attr, escape_text, SAMLP_NS, SAML_NS};

/// One login attempt, kept until answered or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    /// Unguessable request ID (`_` + 160 random bits, hex).
    pub id: String,
    /// When the request was issued.
    pub issue_instant: DateTime<Utc>,
    /// IdP SSO endpoint it was addressed to.
    pub destination: String,
    /// Where to send the browser after login.
    pub relay_state: Option<String>,
    /// End of the correlation window.
    pub expires_at: DateTime<Utc>,
}

/// Fresh SAML identifier with 160 bits of entropy.
pub fn generate_id() -> String {
    format!("_{}", hex::encode(rand::random::<[u8; 20]>()))
}

/// Builds AuthnRequests and registers them for later correlation.
pub struct RequestBuilder {
    metadata: Arc<MetadataStore>,
    pending: Arc<dyn PendingRequestStore>,
    keys: Arc<SpKeyPair>,
    clock: SharedClock,
    entity_id: String,
    acs_url: String,
    name_id_format: Option<String>,
    sign_requests: bool,
    request_ttl: Duration,
}

impl RequestBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<MetadataStore>,
        pending: Arc<dyn PendingRequestStore>,
        keys: Arc<SpKeyPair>,
        clock: SharedClock,
        entity_id: String,
        acs_url: String,
        name_id_format: Option<String>,
        sign_requests: bool,
        request_ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            pending,
            keys,
            clock,
            entity_id,
            acs_url,
            name_id_format,
            sign_requests,
            request_ttl,
        }
    }

    /// Create an AuthnRequest and return it with the redirect URL to the IdP.
    ///
    /// Requests are signed when configured to, or when the IdP metadata asks
    /// for signed requests.
    pub fn build(&self, relay_state: Option<&str>) -> Result<(AuthnRequest, String), SpError> {
        let metadata = self.metadata.current()?;
        let now = self.clock.now();

        let request = AuthnRequest {
            id: generate_id(),
            issue_instant: now,
            destination: metadata.sso_url().to_string(),
            relay_state: relay_state.map(str::to_string),
            expires_at: now + self.request_ttl,
        };

        let xml = self.render(&request);
        let encoded = deflate_and_encode(&xml)?;

        let query = if self.sign_requests || metadata.want_authn_requests_signed {
            sign_redirect_query(&self.keys.key, "SAMLRequest", &encoded, relay_state)?
        } else {
            let mut query = format!("SAMLRequest={}", urlencoding::encode(&encoded));
            if let Some(state) = relay_state.filter(|s| !s.is_empty()) {
                query.push_str(&format!("&RelayState={}", urlencoding::encode(state)));
            }
            query
        };

        let separator = if request.destination.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", request.destination, separator, query);

        self.pending.insert(request.clone())?;

        debug!(request_id = %request.id, destination = %request.destination, "Created SAML AuthnRequest redirect");
        Ok((request, url))
    }

    fn render(&self, request: &AuthnRequest) -> String {
        let name_id_policy = match &self.name_id_format {
            Some(format) => format!(
                r#"<samlp:NameIDPolicy Format="{}" AllowCreate="true"/>"#,
                escape_attr(format)
            ),
            None => r#"<samlp:NameIDPolicy AllowCreate="true"/>"#.to_string(),
        };

        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="{samlp}" xmlns:saml="{saml}" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" ProtocolBinding="{binding}" AssertionConsumerServiceURL="{acs}"><saml:Issuer>{issuer}</saml:Issuer>{policy}</samlp:AuthnRequest>"#,
            samlp = SAMLP_NS,
            saml = SAML_NS,
            id = request.id,
            instant = request.issue_instant.format("%Y-%m-%dT%H:%M:%SZ"),
            destination = escape_attr(&request.destination),
            binding = BINDING_POST,
            acs = escape_attr(&self.acs_url),
            issuer = escape_text(&self.entity_id),
            policy = name_id_policy,
        )
    }
}

/// Deflate and base64 encode for SAML redirect binding.
fn deflate_and_encode(xml: &str) -> Result<String, SpError> {
    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .and_then(|_| encoder.finish())
        .map(|compressed| BASE64.encode(compressed))
        .map_err(|e| SpError::Encoding(format!("deflate: {e}")))
}
