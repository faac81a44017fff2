//! Test fixtures: throw-away keypairs, a fake IdP that issues signed
//! Responses, and a wired-up service provider.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use rcgen::{CertificateParams, DnType, KeyPair};
use std::io::Read;
use std::sync::Arc;

use crate::clock::ManualClock;
use crate::config::SpConfig;
use crate::metadata::{IdpMetadata, MetadataStore, BINDING_REDIRECT};
use crate::request::generate_id;
use crate::response::{Assertion, SamlAttribute};
use crate::service::ServiceProvider;
use crate::signature::{sign_enveloped, SpKeyPair};
use crate::xml::{parse, serialize, DSIG_NS, MD_NS, SAMLP_NS, SAML_NS};

pub(crate) const SP_ENTITY_ID: &str = "https://sp.example.com/saml/metadata";
pub(crate) const SP_ACS_URL: &str = "https://sp.example.com/saml/acs";

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const NAMEID_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// Self-signed ECDSA P-256 certificate and PKCS#8 key, both PEM.
pub(crate) fn generate_identity(common_name: &str) -> (String, String) {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, "saml-sp-gate test");

    let key_pair = KeyPair::generate().expect("Failed to generate key pair");
    let cert = params
        .self_signed(&key_pair)
        .expect("Failed to generate certificate");

    (cert.pem(), key_pair.serialize_pem())
}

pub(crate) fn sp_keys() -> SpKeyPair {
    let (cert, key) = generate_identity("sp.example.com");
    SpKeyPair::from_pem(&cert, &key).expect("generated SP keypair loads")
}

/// Valid SP configuration rooted at `https://sp.example.com`.
pub(crate) fn sp_config() -> SpConfig {
    SpConfig {
        root_url: "https://sp.example.com".to_string(),
        idp_metadata_url: Some(TestIdp::ENTITY_ID.to_string()),
        ..Default::default()
    }
}

/// Decoded value of a query parameter in `url`.
pub(crate) fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?').map_or(url, |(_, q)| q);
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != name {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}

/// The AuthnRequest XML carried by a redirect-binding URL.
pub(crate) fn inflate_saml_request(url: &str) -> String {
    let encoded = query_param(url, "SAMLRequest").expect("URL carries SAMLRequest");
    let compressed = STANDARD.decode(encoded).expect("SAMLRequest is base64");
    let mut xml = String::new();
    flate2::read::DeflateDecoder::new(compressed.as_slice())
        .read_to_string(&mut xml)
        .expect("SAMLRequest inflates");
    xml
}

/// Bare assertion for session tests.
pub(crate) fn test_assertion(not_on_or_after: DateTime<Utc>) -> Assertion {
    let id = generate_id();
    Assertion {
        id: id.clone(),
        issuer: TestIdp::ENTITY_ID.to_string(),
        subject: "alice@example.com".to_string(),
        name_id_format: Some(NAMEID_EMAIL.to_string()),
        session_index: None,
        attributes: vec![SamlAttribute {
            name: "groups".to_string(),
            friendly_name: None,
            values: vec!["admin".to_string()],
        }],
        not_before: None,
        not_on_or_after: Some(not_on_or_after),
        audiences: vec![SP_ENTITY_ID.to_string()],
        in_response_to: None,
        relay_state: None,
        signature_reference: id,
    }
}

/// Provider over a fresh [`TestIdp`], driven by `clock`.
pub(crate) fn test_service(clock: Arc<ManualClock>) -> (Arc<ServiceProvider>, TestIdp) {
    let idp = TestIdp::new();
    let provider = ServiceProvider::builder(sp_config())
        .keys(sp_keys())
        .metadata(Arc::new(MetadataStore::with_metadata(idp.metadata())))
        .clock(clock)
        .build()
        .expect("test service builds");
    (Arc::new(provider), idp)
}

/// What the fake IdP puts in its Response.
#[derive(Debug, Clone)]
pub(crate) struct ResponseOptions {
    pub in_response_to: Option<String>,
    pub subject: String,
    pub issuer: String,
    pub audience: String,
    pub destination: String,
    pub status: String,
    pub assertion_id: String,
    /// Defaults to one minute before `now`.
    pub not_before: Option<DateTime<Utc>>,
    /// Conditions and subject confirmation expiry. Defaults to an hour after `now`.
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub session_not_on_or_after: Option<DateTime<Utc>>,
    pub sign_assertion: bool,
    pub sign_response: bool,
}

impl ResponseOptions {
    /// A successful Response to the request `request_id`.
    pub fn answering(request_id: &str) -> Self {
        Self {
            in_response_to: Some(request_id.to_string()),
            ..Self::unsolicited()
        }
    }

    /// A successful IdP-initiated Response.
    pub fn unsolicited() -> Self {
        Self {
            in_response_to: None,
            subject: "alice@example.com".to_string(),
            issuer: TestIdp::ENTITY_ID.to_string(),
            audience: SP_ENTITY_ID.to_string(),
            destination: SP_ACS_URL.to_string(),
            status: STATUS_SUCCESS.to_string(),
            assertion_id: generate_id(),
            not_before: None,
            not_on_or_after: None,
            session_not_on_or_after: None,
            sign_assertion: true,
            sign_response: false,
        }
    }
}

/// A fake IdP with its own signing identity.
pub(crate) struct TestIdp {
    keys: SpKeyPair,
}

impl TestIdp {
    pub const ENTITY_ID: &'static str = "https://idp.example.com/metadata";
    pub const SSO_URL: &'static str = "https://idp.example.com/sso";
    pub const SLO_URL: &'static str = "https://idp.example.com/slo";

    pub fn new() -> Self {
        let (cert, key) = generate_identity("idp.example.com");
        Self {
            keys: SpKeyPair::from_pem(&cert, &key).expect("generated IdP keypair loads"),
        }
    }

    pub fn metadata_xml(&self) -> String {
        format!(
            r#"<md:EntityDescriptor xmlns:md="{MD_NS}" xmlns:ds="{DSIG_NS}" entityID="{entity}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo>
        <ds:X509Data>
          <ds:X509Certificate>{cert}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleLogoutService Binding="{BINDING_REDIRECT}" Location="{slo}"/>
    <md:NameIDFormat>{NAMEID_EMAIL}</md:NameIDFormat>
    <md:SingleSignOnService Binding="{BINDING_REDIRECT}" Location="{sso}"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#,
            entity = Self::ENTITY_ID,
            cert = self.keys.certificate.to_base64(),
            slo = Self::SLO_URL,
            sso = Self::SSO_URL,
        )
    }

    pub fn metadata(&self) -> IdpMetadata {
        IdpMetadata::parse(&self.metadata_xml()).expect("test IdP metadata parses")
    }

    /// A signed Response document issued at `now`.
    pub fn response_xml(&self, options: &ResponseOptions, now: DateTime<Utc>) -> String {
        let instant = |t: DateTime<Utc>| t.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let response_id = generate_id();
        let issued = instant(now);
        let not_before = instant(options.not_before.unwrap_or(now - Duration::minutes(1)));
        let not_on_or_after =
            instant(options.not_on_or_after.unwrap_or(now + Duration::hours(1)));
        let in_response_to = options
            .in_response_to
            .as_deref()
            .map(|id| format!(r#" InResponseTo="{id}""#))
            .unwrap_or_default();
        let session_end = options
            .session_not_on_or_after
            .map(|t| format!(r#" SessionNotOnOrAfter="{}""#, instant(t)))
            .unwrap_or_default();

        let xml = format!(
            concat!(
                r#"<samlp:Response xmlns:samlp="{samlp}" xmlns:saml="{saml}" ID="{response_id}" Version="2.0" IssueInstant="{issued}" Destination="{destination}"{irt}>"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
                r#"<saml:Assertion ID="{assertion_id}" Version="2.0" IssueInstant="{issued}">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"<saml:Subject>"#,
                r#"<saml:NameID Format="{email}">{subject}</saml:NameID>"#,
                r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">"#,
                r#"<saml:SubjectConfirmationData{irt} NotOnOrAfter="{noa}" Recipient="{destination}"/>"#,
                r#"</saml:SubjectConfirmation>"#,
                r#"</saml:Subject>"#,
                r#"<saml:Conditions NotBefore="{nb}" NotOnOrAfter="{noa}">"#,
                r#"<saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>"#,
                r#"</saml:Conditions>"#,
                r#"<saml:AuthnStatement AuthnInstant="{issued}" SessionIndex="_session1"{session_end}>"#,
                r#"<saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext>"#,
                r#"</saml:AuthnStatement>"#,
                r#"<saml:AttributeStatement>"#,
                r#"<saml:Attribute Name="groups"><saml:AttributeValue>admin</saml:AttributeValue><saml:AttributeValue>users</saml:AttributeValue></saml:Attribute>"#,
                r#"<saml:Attribute Name="urn:oid:0.9.2342.19200300.100.1.3" FriendlyName="mail"><saml:AttributeValue>{subject}</saml:AttributeValue></saml:Attribute>"#,
                r#"</saml:AttributeStatement>"#,
                r#"</saml:Assertion>"#,
                r#"</samlp:Response>"#
            ),
            samlp = SAMLP_NS,
            saml = SAML_NS,
            response_id = response_id,
            issued = issued,
            destination = options.destination,
            irt = in_response_to,
            issuer = options.issuer,
            status = options.status,
            assertion_id = options.assertion_id,
            email = NAMEID_EMAIL,
            subject = options.subject,
            noa = not_on_or_after,
            nb = not_before,
            audience = options.audience,
            session_end = session_end,
        );

        let mut document = parse(&xml).expect("test response parses");
        if options.sign_assertion {
            sign_enveloped(
                &mut document,
                &options.assertion_id,
                &self.keys.key,
                &self.keys.certificate,
            )
            .expect("assertion signs");
        }
        if options.sign_response {
            sign_enveloped(
                &mut document,
                &response_id,
                &self.keys.key,
                &self.keys.certificate,
            )
            .expect("response signs");
        }
        serialize(&document)
    }

    /// Base64 `SAMLResponse` form value.
    pub fn encoded_response(&self, options: &ResponseOptions, now: DateTime<Utc>) -> String {
        STANDARD.encode(self.response_xml(options, now))
    }
}
