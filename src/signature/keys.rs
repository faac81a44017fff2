//! Certificates and private keys.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, RsaKeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P384_SHA384_FIXED_SIGNING, RSA_PKCS1_SHA256,
};
use std::fmt;
use std::path::Path;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use super::{decode_wrapped_base64, SignatureAlgorithm};
use crate::error::{ConfigError, CryptoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Rsa,
    EcP256,
    EcP384,
}

/// A certificate whose key is trusted to sign SAML messages.
#[derive(Clone)]
pub struct TrustedCertificate {
    der: Vec<u8>,
    public_key: Vec<u8>,
    kind: KeyKind,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl fmt::Debug for TrustedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedCertificate")
            .field("subject", &self.subject)
            .field("kind", &self.kind)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl TrustedCertificate {
    /// Parse a DER-encoded X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CryptoError::Certificate(format!("{e:?}")))?;

        let spki = cert.public_key();
        let kind = match spki.parsed() {
            Ok(PublicKey::RSA(_)) => KeyKind::Rsa,
            Ok(PublicKey::EC(point)) => match point.data().len() {
                65 => KeyKind::EcP256,
                97 => KeyKind::EcP384,
                n => {
                    return Err(CryptoError::UnsupportedKey(format!(
                        "EC point of {n} bytes"
                    )))
                }
            },
            Ok(_) => return Err(CryptoError::UnsupportedKey("key algorithm".into())),
            Err(e) => return Err(CryptoError::Certificate(format!("{e:?}"))),
        };

        let validity = cert.validity();
        let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or_else(|| CryptoError::Certificate("notBefore out of range".into()))?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or_else(|| CryptoError::Certificate("notAfter out of range".into()))?;

        Ok(Self {
            der: der.to_vec(),
            public_key: spki.subject_public_key.data.to_vec(),
            kind,
            subject: cert.subject().to_string(),
            not_before,
            not_after,
        })
    }

    /// Parse the base64 body of an `X509Certificate` element.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let der = decode_wrapped_base64(text).map_err(|e| CryptoError::Pem(e.to_string()))?;
        Self::from_der(&der)
    }

    /// Parse the first certificate in a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let blocks = pem_blocks(pem, "CERTIFICATE")?;
        let der = blocks
            .first()
            .ok_or_else(|| CryptoError::Pem("no CERTIFICATE block".into()))?;
        Self::from_der(der)
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// End of the validity window.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Whether `now` falls inside the validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Base64 DER, as placed in metadata and KeyInfo.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    /// Verify `signature` over `message`. The key type must match the algorithm.
    pub fn verify(&self, algorithm: SignatureAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        let compatible = matches!(
            (algorithm, self.kind),
            (SignatureAlgorithm::RsaSha256, KeyKind::Rsa)
                | (SignatureAlgorithm::EcdsaSha256, KeyKind::EcP256)
                | (SignatureAlgorithm::EcdsaSha384, KeyKind::EcP384)
        );
        compatible
            && UnparsedPublicKey::new(algorithm.verification_algorithm(), &self.public_key)
                .verify(message, signature)
                .is_ok()
    }

    fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }
}

/// The SP's private key.
pub enum SigningKey {
    /// RSA key, signs RSA-SHA256.
    Rsa(RsaKeyPair),
    /// ECDSA key on P-256 or P-384.
    Ecdsa {
        /// Key pair.
        key: EcdsaKeyPair,
        /// Matching signature algorithm.
        algorithm: SignatureAlgorithm,
    },
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({:?})", self.algorithm())
    }
}

impl SigningKey {
    /// Load a PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) PEM key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();

        if let Some(der) = pem_blocks(pem, "PRIVATE KEY")?.first() {
            if let Ok(key) = RsaKeyPair::from_pkcs8(der) {
                return Ok(Self::Rsa(key));
            }
            if let Ok(key) = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng) {
                return Ok(Self::Ecdsa {
                    key,
                    algorithm: SignatureAlgorithm::EcdsaSha256,
                });
            }
            if let Ok(key) = EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, der, &rng) {
                return Ok(Self::Ecdsa {
                    key,
                    algorithm: SignatureAlgorithm::EcdsaSha384,
                });
            }
            return Err(CryptoError::UnsupportedKey(
                "PKCS#8 key is not RSA, P-256 or P-384".into(),
            ));
        }

        if let Some(der) = pem_blocks(pem, "RSA PRIVATE KEY")?.first() {
            return RsaKeyPair::from_der(der)
                .map(Self::Rsa)
                .map_err(|e| CryptoError::UnsupportedKey(e.to_string()));
        }

        Err(CryptoError::Pem("no private key block".into()))
    }

    /// Algorithm this key signs with.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Rsa(_) => SignatureAlgorithm::RsaSha256,
            Self::Ecdsa { algorithm, .. } => *algorithm,
        }
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let rng = SystemRandom::new();
        match self {
            Self::Rsa(key) => {
                let mut signature = vec![0; key.public().modulus_len()];
                key.sign(&RSA_PKCS1_SHA256, &rng, message, &mut signature)
                    .map_err(|_| CryptoError::Signing)?;
                Ok(signature)
            }
            Self::Ecdsa { key, .. } => key
                .sign(&rng, message)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| CryptoError::Signing),
        }
    }

    fn public_key_bytes(&self) -> &[u8] {
        match self {
            Self::Rsa(key) => key.public_key().as_ref(),
            Self::Ecdsa { key, .. } => key.public_key().as_ref(),
        }
    }
}

/// The SP's certificate and matching private key, loaded once at startup.
#[derive(Debug)]
pub struct SpKeyPair {
    /// Certificate published in SP metadata.
    pub certificate: TrustedCertificate,
    /// Key used to sign AuthnRequests and metadata.
    pub key: SigningKey,
}

impl SpKeyPair {
    /// Build from PEM text, checking that the key belongs to the certificate.
    pub fn from_pem(certificate_pem: &str, key_pem: &str) -> Result<Self, CryptoError> {
        let certificate = TrustedCertificate::from_pem(certificate_pem)?;
        let key = SigningKey::from_pem(key_pem)?;
        if certificate.public_key_bytes() != key.public_key_bytes() {
            return Err(CryptoError::UnsupportedKey(
                "private key does not match certificate".into(),
            ));
        }
        Ok(Self { certificate, key })
    }

    /// Read certificate and key PEM files.
    pub fn load(certificate_path: &Path, key_path: &Path) -> Result<Self, ConfigError> {
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        };
        let certificate_pem = read(certificate_path)?;
        let key_pem = read(key_path)?;
        Ok(Self::from_pem(&certificate_pem, &key_pem)?)
    }
}

/// Decode every `-----BEGIN {label}-----` block in a PEM document.
pub(crate) fn pem_blocks(pem: &str, label: &str) -> Result<Vec<Vec<u8>>, CryptoError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(&begin) {
        let body = &rest[start + begin.len()..];
        let stop = body
            .find(&end)
            .ok_or_else(|| CryptoError::Pem(format!("missing END {label} marker")))?;
        let der = decode_wrapped_base64(&body[..stop])
            .map_err(|e| CryptoError::Pem(e.to_string()))?;
        blocks.push(der);
        rest = &body[stop + end.len()..];
    }
    Ok(blocks)
}
