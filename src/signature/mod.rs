//! XML digital signatures for SAML messages.
//!
//! Verification of enveloped signatures on Responses and Assertions, signing
//! of HTTP-Redirect queries and enveloped signing of SP metadata. Supported
//! algorithms are RSA-SHA256 and ECDSA over P-256/P-384, with SHA-256 digests
//! and exclusive canonicalization.

pub mod keys;
pub mod signer;
pub mod verifier;

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::digest;
use ring::signature::{self as ring_sig, VerificationAlgorithm};

pub use keys::{SigningKey, SpKeyPair, TrustedCertificate};
pub use signer::{sign_enveloped, sign_redirect_query};
pub use verifier::{signature_of, verify_enveloped};

/// Exclusive canonicalization, without comments.
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
/// Enveloped-signature transform.
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
/// SHA-256 digest method.
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// Signature algorithm of a SignedInfo or a redirect `SigAlg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    RsaSha256,
    /// ECDSA P-256 with SHA-256.
    EcdsaSha256,
    /// ECDSA P-384 with SHA-384.
    EcdsaSha384,
}

impl SignatureAlgorithm {
    /// Algorithm identifier URI.
    pub const fn uri(self) -> &'static str {
        match self {
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::EcdsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256",
            Self::EcdsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384",
        }
    }

    /// Look up an algorithm by URI. Anything weaker than SHA-256 is unsupported.
    pub fn from_uri(uri: &str) -> Option<Self> {
        [Self::RsaSha256, Self::EcdsaSha256, Self::EcdsaSha384]
            .into_iter()
            .find(|alg| alg.uri() == uri)
    }

    pub(crate) fn verification_algorithm(self) -> &'static dyn VerificationAlgorithm {
        match self {
            Self::RsaSha256 => &ring_sig::RSA_PKCS1_2048_8192_SHA256,
            Self::EcdsaSha256 => &ring_sig::ECDSA_P256_SHA256_FIXED,
            Self::EcdsaSha384 => &ring_sig::ECDSA_P384_SHA384_FIXED,
        }
    }
}

/// Base64 SHA-256 digest of `data`, as carried in `DigestValue`.
pub fn digest_sha256(data: &[u8]) -> String {
    STANDARD.encode(digest::digest(&digest::SHA256, data))
}

/// Decode base64 that may be wrapped across lines.
pub(crate) fn decode_wrapped_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_uris_round_trip() {
        for alg in [
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::EcdsaSha256,
            SignatureAlgorithm::EcdsaSha384,
        ] {
            assert_eq!(SignatureAlgorithm::from_uri(alg.uri()), Some(alg));
        }
        assert_eq!(
            SignatureAlgorithm::from_uri("http://www.w3.org/2000/09/xmldsig#rsa-sha1"),
            None
        );
    }

    #[test]
    fn sha256_digest_of_empty_input() {
        assert_eq!(
            digest_sha256(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }
}
