//! IdP metadata document parsing.

use tracing::{debug, warn};

use crate::error::MetadataError;
use crate::signature::TrustedCertificate;
use crate::xml::{parse, Element, DSIG_NS, MD_NS};

/// HTTP-Redirect binding URI.
pub const BINDING_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
/// HTTP-POST binding URI.
pub const BINDING_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// What the SP needs to know about its IdP. Replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct IdpMetadata {
    /// IdP entity ID; responses must be issued by it.
    pub entity_id: String,
    /// SingleSignOnService with the HTTP-Redirect binding.
    pub sso_redirect_url: Option<String>,
    /// SingleSignOnService with the HTTP-POST binding.
    pub sso_post_url: Option<String>,
    /// SingleLogoutService (HTTP-Redirect), if advertised.
    pub slo_url: Option<String>,
    /// Signing certificates, in document order.
    pub certificates: Vec<TrustedCertificate>,
    /// `WantAuthnRequestsSigned` from the IDPSSODescriptor.
    pub want_authn_requests_signed: bool,
    /// Advertised NameID formats.
    pub name_id_formats: Vec<String>,
}

impl IdpMetadata {
    /// Parse an `EntityDescriptor`, or the first IdP inside an `EntitiesDescriptor`.
    pub fn parse(xml: &str) -> Result<Self, MetadataError> {
        let root = parse(xml).map_err(|e| MetadataError::InvalidMetadata(e.to_string()))?;
        let entity = find_idp_entity(&root).ok_or_else(|| {
            MetadataError::InvalidMetadata("no EntityDescriptor with an IDPSSODescriptor".into())
        })?;

        let entity_id = entity
            .attr("entityID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MetadataError::InvalidMetadata("missing entityID".into()))?
            .to_string();

        let descriptor = entity
            .child(MD_NS, "IDPSSODescriptor")
            .ok_or_else(|| MetadataError::InvalidMetadata("missing IDPSSODescriptor".into()))?;

        let endpoint = |element: &str, binding: &str| {
            descriptor
                .children_named(MD_NS, element)
                .find(|e| e.attr("Binding") == Some(binding))
                .and_then(|e| e.attr("Location"))
                .map(str::to_string)
        };
        let sso_redirect_url = endpoint("SingleSignOnService", BINDING_REDIRECT);
        let sso_post_url = endpoint("SingleSignOnService", BINDING_POST);
        let slo_url = endpoint("SingleLogoutService", BINDING_REDIRECT);

        if sso_redirect_url.is_none() && sso_post_url.is_none() {
            return Err(MetadataError::InvalidMetadata(
                "no SingleSignOnService endpoint".into(),
            ));
        }

        let mut certificates = Vec::new();
        for key in descriptor.children_named(MD_NS, "KeyDescriptor") {
            // Skip encryption keys
            if key.attr("use") == Some("encryption") {
                continue;
            }
            let encoded = key
                .child(DSIG_NS, "KeyInfo")
                .and_then(|info| info.child(DSIG_NS, "X509Data"))
                .into_iter()
                .flat_map(|data| data.children_named(DSIG_NS, "X509Certificate"));
            for cert in encoded {
                match TrustedCertificate::from_base64(&cert.text()) {
                    Ok(cert) => {
                        debug!(subject = %cert.subject(), "Loaded IdP signing certificate");
                        certificates.push(cert);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to parse IdP certificate, skipping");
                    }
                }
            }
        }

        if certificates.is_empty() {
            return Err(MetadataError::InvalidMetadata(
                "no usable signing certificate".into(),
            ));
        }

        let name_id_formats = descriptor
            .children_named(MD_NS, "NameIDFormat")
            .map(Element::trimmed_text)
            .filter(|f| !f.is_empty())
            .collect();

        Ok(Self {
            entity_id,
            sso_redirect_url,
            sso_post_url,
            slo_url,
            certificates,
            want_authn_requests_signed: descriptor.attr("WantAuthnRequestsSigned") == Some("true"),
            name_id_formats,
        })
    }

    /// Endpoint AuthnRequests are redirected to. Prefers the Redirect binding.
    pub fn sso_url(&self) -> &str {
        self.sso_redirect_url
            .as_deref()
            .or(self.sso_post_url.as_deref())
            .unwrap_or_default()
    }
}

fn find_idp_entity(element: &Element) -> Option<&Element> {
    if element.is(MD_NS, "EntityDescriptor") {
        return element
            .child(MD_NS, "IDPSSODescriptor")
            .map(|_| element);
    }
    if element.is(MD_NS, "EntitiesDescriptor") {
        return element.elements().find_map(find_idp_entity);
    }
    None
}
