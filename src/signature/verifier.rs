//! Enveloped XML signature verification.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::keys::TrustedCertificate;
use super::{decode_wrapped_base64, digest_sha256, SignatureAlgorithm};
use super::{DIGEST_SHA256, ENVELOPED_SIGNATURE, EXC_C14N};
use crate::error::ProtocolError;
use crate::xml::{canonicalize, canonicalize_excluding, Element, DSIG_NS};

/// The `ds:Signature` directly under `element`, if any.
pub fn signature_of(element: &Element) -> Option<&Element> {
    element.child(DSIG_NS, "Signature")
}

/// Verify the enveloped signature of `element` against the trusted set.
///
/// The signature must be a direct child of `element` and its single
/// Reference must point at `element`'s own `ID`, so the verified bytes are
/// exactly the subtree the caller goes on to read. Any one trusted certificate
/// that is valid at `now` and verifies the SignedInfo is sufficient.
pub fn verify_enveloped(
    element: &Element,
    trusted: &[TrustedCertificate],
    now: DateTime<Utc>,
) -> Result<(), ProtocolError> {
    let id = element
        .attr("ID")
        .ok_or(ProtocolError::MissingElement("ID"))?;
    let signature = signature_of(element).ok_or_else(|| invalid("element is not signed"))?;
    let signed_info = signature
        .child(DSIG_NS, "SignedInfo")
        .ok_or(ProtocolError::MissingElement("SignedInfo"))?;

    let c14n_method = signed_info
        .child(DSIG_NS, "CanonicalizationMethod")
        .and_then(|m| m.attr("Algorithm"));
    if c14n_method != Some(EXC_C14N) {
        return Err(invalid("unsupported canonicalization method"));
    }

    let algorithm = signed_info
        .child(DSIG_NS, "SignatureMethod")
        .and_then(|m| m.attr("Algorithm"))
        .and_then(SignatureAlgorithm::from_uri)
        .ok_or_else(|| invalid("unsupported signature method"))?;

    let mut references = signed_info.children_named(DSIG_NS, "Reference");
    let reference = references
        .next()
        .ok_or(ProtocolError::MissingElement("Reference"))?;
    if references.next().is_some() {
        return Err(invalid("more than one reference"));
    }

    let expected_uri = format!("#{id}");
    if reference.attr("URI") != Some(expected_uri.as_str()) {
        return Err(invalid("reference does not cover the signed element"));
    }

    if let Some(transforms) = reference.child(DSIG_NS, "Transforms") {
        for transform in transforms.children_named(DSIG_NS, "Transform") {
            match transform.attr("Algorithm") {
                Some(ENVELOPED_SIGNATURE) | Some(EXC_C14N) => {}
                _ => return Err(invalid("unsupported transform")),
            }
        }
    }

    let digest_method = reference
        .child(DSIG_NS, "DigestMethod")
        .and_then(|m| m.attr("Algorithm"));
    if digest_method != Some(DIGEST_SHA256) {
        return Err(invalid("unsupported digest method"));
    }

    let digest_value = reference
        .child(DSIG_NS, "DigestValue")
        .ok_or(ProtocolError::MissingElement("DigestValue"))?
        .text();
    let digest_value: String = digest_value.chars().filter(|c| !c.is_whitespace()).collect();

    let signed_bytes = canonicalize_excluding(element, Some(signature))?;
    if digest_sha256(signed_bytes.as_bytes()) != digest_value {
        return Err(invalid("digest mismatch"));
    }

    let signature_value = signature
        .child(DSIG_NS, "SignatureValue")
        .ok_or(ProtocolError::MissingElement("SignatureValue"))?
        .text();
    let signature_value = decode_wrapped_base64(&signature_value)
        .map_err(|_| invalid("SignatureValue is not base64"))?;

    let signed_info_c14n = canonicalize(signed_info)?;
    let verified = trusted
        .iter()
        .filter(|cert| cert.is_valid_at(now))
        .any(|cert| cert.verify(algorithm, signed_info_c14n.as_bytes(), &signature_value));

    if verified {
        debug!(reference = %id, algorithm = ?algorithm, "signature verified");
        Ok(())
    } else {
        Err(invalid("no trusted certificate verifies the signature"))
    }
}

fn invalid(reason: &str) -> ProtocolError {
    ProtocolError::SignatureInvalid(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{sign_enveloped, SpKeyPair};
    use crate::testing::generate_identity;
    use crate::xml::{parse, serialize};

    fn keypair() -> SpKeyPair {
        let (cert, key) = generate_identity("idp.example.com");
        SpKeyPair::from_pem(&cert, &key).unwrap()
    }

    fn signed_document(pair: &SpKeyPair) -> String {
        let mut doc = parse(
            r#"<r:Root xmlns:r="urn:test" ID="_doc"><r:Issuer>me</r:Issuer><r:Body>hello</r:Body></r:Root>"#,
        )
        .unwrap();
        sign_enveloped(&mut doc, "_doc", &pair.key, &pair.certificate).unwrap();
        serialize(&doc)
    }

    #[test]
    fn verifies_own_signature_after_reparse() {
        let pair = keypair();
        let xml = signed_document(&pair);
        let doc = parse(&xml).unwrap();
        verify_enveloped(&doc, &[pair.certificate.clone()], Utc::now()).unwrap();
    }

    #[test]
    fn detects_tampering() {
        let pair = keypair();
        let xml = signed_document(&pair).replace("hello", "goodbye");
        let doc = parse(&xml).unwrap();
        let err = verify_enveloped(&doc, &[pair.certificate.clone()], Utc::now()).unwrap_err();
        assert_eq!(err, ProtocolError::SignatureInvalid("digest mismatch".into()));
    }

    #[test]
    fn rejects_untrusted_signer() {
        let signer = keypair();
        let trusted = keypair();
        let doc = parse(&signed_document(&signer)).unwrap();
        let err = verify_enveloped(&doc, &[trusted.certificate], Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "SIGNATURE_INVALID");
    }

    #[test]
    fn ignores_certificates_outside_validity() {
        let pair = keypair();
        let doc = parse(&signed_document(&pair)).unwrap();
        let far_future = pair.certificate.not_after() + chrono::Duration::days(1);
        assert!(verify_enveloped(&doc, &[pair.certificate.clone()], far_future).is_err());
    }

    #[test]
    fn reference_must_name_the_element() {
        let pair = keypair();
        let xml = signed_document(&pair).replace(r#"ID="_doc""#, r#"ID="_other""#);
        let doc = parse(&xml).unwrap();
        let err = verify_enveloped(&doc, &[pair.certificate.clone()], Utc::now()).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::SignatureInvalid("reference does not cover the signed element".into())
        );
    }

    #[test]
    fn verifies_after_crlf_reserialization() {
        let pair = keypair();
        let mut doc = parse(
            "<r:Root xmlns:r=\"urn:test\" ID=\"_doc\">\n  <r:Body>line1\nline2</r:Body>\n</r:Root>",
        )
        .unwrap();
        sign_enveloped(&mut doc, "_doc", &pair.key, &pair.certificate).unwrap();
        let lf = serialize(&doc);
        let crlf = lf.replace('\n', "\r\n");
        assert!(crlf.contains("\r\n"));

        let trusted = [pair.certificate.clone()];
        verify_enveloped(&parse(&lf).unwrap(), &trusted, Utc::now()).unwrap();
        verify_enveloped(&parse(&crlf).unwrap(), &trusted, Utc::now()).unwrap();
    }

    #[test]
    fn unsigned_element() {
        let doc = parse(r#"<a ID="_x"/>"#).unwrap();
        assert!(signature_of(&doc).is_none());
        assert!(verify_enveloped(&doc, &[], Utc::now()).is_err());
    }
}
