//! This SP's own metadata document.

use crate::config::SpConfig;
use crate::error::CryptoError;
use crate::signature::{sign_enveloped, SpKeyPair};
use crate::xml::{escape_attr, escape_text, parse, serialize};

use super::idp::{BINDING_POST, BINDING_REDIRECT};

const DEFAULT_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Render the SP `EntityDescriptor`, signed when `sign_metadata` is set.
pub fn sp_metadata_xml(config: &SpConfig, keys: &SpKeyPair) -> Result<String, CryptoError> {
    let entity_id = config.effective_entity_id();
    let descriptor_id = format!("_{}", hex::encode(short_digest(entity_id.as_bytes())));
    let name_id_format = config
        .name_id_format
        .as_deref()
        .unwrap_or(DEFAULT_NAME_ID_FORMAT);

    let xml = format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" entityID="{entity_id}" ID="{descriptor_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="{signed}" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo>
        <ds:X509Data>
          <ds:X509Certificate>{certificate}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleLogoutService Binding="{redirect}" Location="{logout}"/>
    <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="{post}" Location="{acs}" index="1" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = escape_attr(&entity_id),
        descriptor_id = descriptor_id,
        signed = config.sign_authn_requests,
        certificate = keys.certificate.to_base64(),
        redirect = BINDING_REDIRECT,
        logout = escape_attr(&config.logout_url()),
        name_id_format = escape_text(name_id_format),
        post = BINDING_POST,
        acs = escape_attr(&config.acs_url()),
    );

    if !config.sign_metadata {
        return Ok(xml);
    }

    let mut document = parse(&xml).map_err(|e| CryptoError::Pem(e.to_string()))?;
    sign_enveloped(&mut document, &descriptor_id, &keys.key, &keys.certificate)?;
    Ok(serialize(&document))
}

// Stable descriptor ID derived from the entity ID (truncated SHA-256).
fn short_digest(data: &[u8]) -> Vec<u8> {
    ring::digest::digest(&ring::digest::SHA256, data).as_ref()[..16].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::verify_enveloped;
    use crate::testing::{sp_config, sp_keys};
    use crate::xml::{MD_NS, SAML_NS};
    use chrono::Utc;

    #[test]
    fn describes_acs_and_certificate() {
        let config = sp_config();
        let keys = sp_keys();
        let xml = sp_metadata_xml(&config, &keys).unwrap();

        let root = parse(&xml).unwrap();
        assert!(root.is(MD_NS, "EntityDescriptor"));
        assert_eq!(root.attr("entityID"), Some(config.effective_entity_id().as_str()));

        let descriptor = root.child(MD_NS, "SPSSODescriptor").unwrap();
        assert_eq!(descriptor.attr("AuthnRequestsSigned"), Some("true"));
        let acs = descriptor.child(MD_NS, "AssertionConsumerService").unwrap();
        assert_eq!(acs.attr("Location"), Some(config.acs_url().as_str()));
        assert_eq!(acs.attr("Binding"), Some(BINDING_POST));
        assert!(xml.contains(&keys.certificate.to_base64()));
        assert_eq!(root.count_descendants(SAML_NS, "Issuer"), 0);
    }

    #[test]
    fn signed_metadata_verifies() {
        let mut config = sp_config();
        config.sign_metadata = true;
        let keys = sp_keys();

        let xml = sp_metadata_xml(&config, &keys).unwrap();
        let root = parse(&xml).unwrap();
        verify_enveloped(&root, &[keys.certificate.clone()], Utc::now()).unwrap();
    }
}
