//! Signing with the SP key.

use base64::{engine::general_purpose::STANDARD, Engine};

use super::keys::{SigningKey, TrustedCertificate};
use super::{digest_sha256, DIGEST_SHA256, ENVELOPED_SIGNATURE, EXC_C14N};
use crate::error::CryptoError;
use crate::xml::{canonicalize, parse, Element, Node, DSIG_NS, SAML_NS};

/// Build a signed HTTP-Redirect query string.
///
/// `param` is `SAMLRequest` or `SAMLResponse` and `encoded` its deflated,
/// base64 value. The signature covers the exact URL-encoded bytes
/// `param=..&RelayState=..&SigAlg=..`, as the receiving side re-derives them.
pub fn sign_redirect_query(
    key: &SigningKey,
    param: &str,
    encoded: &str,
    relay_state: Option<&str>,
) -> Result<String, CryptoError> {
    let mut query = format!("{param}={}", urlencoding::encode(encoded));
    if let Some(state) = relay_state.filter(|s| !s.is_empty()) {
        query.push_str("&RelayState=");
        query.push_str(&urlencoding::encode(state));
    }
    query.push_str("&SigAlg=");
    query.push_str(&urlencoding::encode(key.algorithm().uri()));

    let signature = key.sign(query.as_bytes())?;
    query.push_str("&Signature=");
    query.push_str(&urlencoding::encode(&STANDARD.encode(signature)));
    Ok(query)
}

/// Add an enveloped signature to the element of `document` whose `ID` is `id`.
///
/// The `ds:Signature` is inserted after the element's `saml:Issuer` when it
/// has one, otherwise as its first child. Serialize the result with
/// [`serialize`](crate::xml::serialize) so the signed bytes survive.
pub fn sign_enveloped(
    document: &mut Element,
    id: &str,
    key: &SigningKey,
    certificate: &TrustedCertificate,
) -> Result<(), CryptoError> {
    let target = document
        .find_by_id_mut(id)
        .ok_or_else(|| CryptoError::Pem(format!("no element with ID {id}")))?;

    let canonical =
        canonicalize(target).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    let digest = digest_sha256(canonical.as_bytes());
    let signed_info = format!(
        concat!(
            r#"<ds:SignedInfo xmlns:ds="{ds}">"#,
            r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"#,
            r#"<ds:SignatureMethod Algorithm="{alg}"/>"#,
            r##"<ds:Reference URI="#{id}">"##,
            r#"<ds:Transforms>"#,
            r#"<ds:Transform Algorithm="{enveloped}"/>"#,
            r#"<ds:Transform Algorithm="{c14n}"/>"#,
            r#"</ds:Transforms>"#,
            r#"<ds:DigestMethod Algorithm="{digest_alg}"/>"#,
            r#"<ds:DigestValue>{digest}</ds:DigestValue>"#,
            r#"</ds:Reference>"#,
            r#"</ds:SignedInfo>"#
        ),
        ds = DSIG_NS,
        c14n = EXC_C14N,
        alg = key.algorithm().uri(),
        id = id,
        enveloped = ENVELOPED_SIGNATURE,
        digest_alg = DIGEST_SHA256,
        digest = digest,
    );
    let signed_info = parse(&signed_info).map_err(|e| CryptoError::Pem(e.to_string()))?;
    let signed_info_c14n =
        canonicalize(&signed_info).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    let signature_value = STANDARD.encode(key.sign(signed_info_c14n.as_bytes())?);

    let signature = format!(
        concat!(
            r#"<ds:Signature xmlns:ds="{ds}">{signed_info}"#,
            r#"<ds:SignatureValue>{value}</ds:SignatureValue>"#,
            r#"<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"#,
            r#"</ds:Signature>"#
        ),
        ds = DSIG_NS,
        signed_info = signed_info_c14n,
        value = signature_value,
        cert = certificate.to_base64(),
    );
    let signature = parse(&signature).map_err(|e| CryptoError::Pem(e.to_string()))?;

    let position = target
        .children
        .iter()
        .position(|n| matches!(n, Node::Element(e) if e.is(SAML_NS, "Issuer")))
        .map_or(0, |i| i + 1);
    target.children.insert(position, Node::Element(signature));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{SignatureAlgorithm, SpKeyPair};
    use crate::testing::generate_identity;

    #[test]
    fn redirect_signature_covers_query() {
        let (cert, key) = generate_identity("sp.example.com");
        let pair = SpKeyPair::from_pem(&cert, &key).unwrap();

        let query = sign_redirect_query(&pair.key, "SAMLRequest", "abc+/=", Some("/app")).unwrap();
        let (signed, signature) = query.split_once("&Signature=").unwrap();
        assert!(signed.starts_with("SAMLRequest=abc%2B%2F%3D&RelayState=%2Fapp&SigAlg="));

        let signature = STANDARD
            .decode(urlencoding::decode(signature).unwrap().as_bytes())
            .unwrap();
        assert!(pair
            .certificate
            .verify(SignatureAlgorithm::EcdsaSha256, signed.as_bytes(), &signature));
    }

    #[test]
    fn signature_follows_issuer() {
        let (cert, key) = generate_identity("sp.example.com");
        let pair = SpKeyPair::from_pem(&cert, &key).unwrap();
        let mut doc = parse(
            r#"<a:Assertion xmlns:a="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1"><a:Issuer>idp</a:Issuer><a:Subject/></a:Assertion>"#,
        )
        .unwrap();
        sign_enveloped(&mut doc, "_a1", &pair.key, &pair.certificate).unwrap();

        let names: Vec<_> = doc.elements().map(|e| e.local.as_str()).collect();
        assert_eq!(names, ["Issuer", "Signature", "Subject"]);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let (cert, key) = generate_identity("sp.example.com");
        let pair = SpKeyPair::from_pem(&cert, &key).unwrap();
        let mut doc = parse(r#"<a ID="_x"/>"#).unwrap();
        assert!(sign_enveloped(&mut doc, "_missing", &pair.key, &pair.certificate).is_err());
    }
}
