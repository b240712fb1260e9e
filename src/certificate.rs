//! Local identity and peer certificate validation.
//!
//! Chain validation itself is a collaborator: the handshake calls a
//! [`CertVerifier`] exactly once, on the full handshake path, and aborts on
//! rejection. This module also has helpers to generate a self-signed
//! certificate and to compute fingerprints.

use std::fmt;

use sha2::{Digest, Sha256};

#[cfg(feature = "rcgen")]
use crate::Error;

/// Certificate and private key pair.
#[derive(Clone)]
pub struct Certificate {
    /// Certificate in DER format
    pub certificate: Vec<u8>,
    /// Private key in DER (PKCS#8 or SEC1) or PEM format
    pub private_key: Vec<u8>,
}

impl Certificate {
    pub fn new(certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        Certificate {
            certificate,
            private_key,
        }
    }

    /// SHA-256 of the DER certificate.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.certificate)
    }

    /// The fingerprint as colon separated uppercase hex, e.g. "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

/// Certificate validation collaborator.
///
/// `chain` is the peer's chain as sent, leaf first, DER encoded.
pub trait CertVerifier: Send + Sync + fmt::Debug {
    fn verify(&self, chain: &[Vec<u8>]) -> Result<(), String>;
}

/// Accepts exactly one leaf certificate, identified by its SHA-256 fingerprint.
#[derive(Debug, Clone)]
pub struct FingerprintVerifier {
    expected: Vec<u8>,
}

impl FingerprintVerifier {
    pub fn new(expected: Vec<u8>) -> Self {
        FingerprintVerifier { expected }
    }

    pub fn for_certificate(cert: &Certificate) -> Self {
        FingerprintVerifier::new(cert.fingerprint())
    }
}

impl CertVerifier for FingerprintVerifier {
    fn verify(&self, chain: &[Vec<u8>]) -> Result<(), String> {
        let leaf = chain.first().ok_or("Empty certificate chain")?;
        let actual = calculate_fingerprint(leaf);
        if actual != self.expected {
            return Err(format!(
                "Fingerprint mismatch: {}",
                format_fingerprint(&actual)
            ));
        }
        Ok(())
    }
}

/// Calculate a certificate fingerprint using SHA-256
pub fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    Sha256::digest(cert_der).to_vec()
}

/// Format a fingerprint as a colon-separated hex string
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

/// Generate a self-signed ECDSA P-256 certificate valid for one year.
#[cfg(feature = "rcgen")]
pub fn generate_self_signed_certificate() -> Result<Certificate, Error> {
    generate_named("reprise peer")
}

/// Like [`generate_self_signed_certificate`] with a chosen common name.
#[cfg(feature = "rcgen")]
pub fn generate_named(common_name: &str) -> Result<Certificate, Error> {
    use rcgen::{
        Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa,
        KeyPair, PKCS_ECDSA_P256_SHA256,
    };

    let failed = |e: rcgen::RcgenError| Error::CertificateError(format!("Generation failed: {e}"));

    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256).map_err(failed)?;

    let mut params = CertificateParams::new(vec![common_name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "reprise".to_string());
    distinguished_name.push(DnType::CommonName, common_name.to_string());
    params.distinguished_name = distinguished_name;

    params.is_ca = IsCa::NoCa;
    params.key_pair = Some(key_pair);

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    let cert = RcgenCertificate::from_params(params).map_err(failed)?;
    let cert_der = cert.serialize_der().map_err(failed)?;
    let key_der = cert.serialize_private_key_der();

    debug!("Generated self-signed certificate for {}", common_name);

    Ok(Certificate {
        certificate: cert_der,
        private_key: key_der,
    })
}

#[cfg(all(test, feature = "rcgen"))]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;
    use crate::types::HashAlgorithm;

    #[test]
    fn self_signed_certificate_signs_and_verifies() {
        let cert = generate_self_signed_certificate().unwrap();
        assert!(!cert.certificate.is_empty());
        assert_eq!(cert.fingerprint().len(), 32);

        let provider = rust_crypto::default_provider();
        let mut key = provider.key_provider.load_private_key(&cert.private_key).unwrap();
        assert_eq!(key.hash_algorithm(), HashAlgorithm::SHA256);

        let signature = key.sign(b"hello").unwrap();
        provider
            .signature_verification
            .verify_signature(&cert.certificate, b"hello", &signature, HashAlgorithm::SHA256)
            .unwrap();

        let wrong = provider.signature_verification.verify_signature(
            &cert.certificate,
            b"other",
            &signature,
            HashAlgorithm::SHA256,
        );
        assert!(wrong.is_err());
    }

    #[test]
    fn fingerprint_formatting() {
        assert_eq!(format_fingerprint(&[0xAF, 0x12, 0xF6]), "AF:12:F6");

        let cert = generate_self_signed_certificate().unwrap();
        let formatted = cert.fingerprint_str();
        // 32 hex pairs with ':' between them
        assert_eq!(formatted.len(), 95);
    }

    #[test]
    fn fingerprint_verifier_pins_leaf() {
        let a = generate_self_signed_certificate().unwrap();
        let b = generate_self_signed_certificate().unwrap();
        let verifier = FingerprintVerifier::for_certificate(&a);

        assert!(verifier.verify(&[a.certificate.clone()]).is_ok());
        assert!(verifier.verify(&[b.certificate.clone()]).is_err());
        assert!(verifier.verify(&[]).is_err());
    }
}
