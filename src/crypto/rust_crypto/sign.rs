//! Signing and key loading implementations using RustCrypto.

use std::str;

use der::Decode;
use pkcs8::DecodePrivateKey;
use sha2::{Digest, Sha256, Sha384};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

use crate::crypto::provider::{KeyProvider, SignatureVerifier, SigningKey};
use crate::types::HashAlgorithm;

type P256SigningKey = p256::ecdsa::SigningKey;
type P384SigningKey = p384::ecdsa::SigningKey;
type P256Signature = p256::ecdsa::Signature;
type P384Signature = p384::ecdsa::Signature;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// ECDSA signing key implementation.
enum EcdsaSigningKey {
    P256(P256SigningKey),
    P384(P384SigningKey),
}

impl std::fmt::Debug for EcdsaSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EcdsaSigningKey::P256(_) => f.debug_tuple("EcdsaSigningKey::P256").finish(),
            EcdsaSigningKey::P384(_) => f.debug_tuple("EcdsaSigningKey::P384").finish(),
        }
    }
}

impl SigningKey for EcdsaSigningKey {
    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, String> {
        // PrehashSigner expects the digest, not the message.
        match self {
            EcdsaSigningKey::P256(key) => {
                let hash = Sha256::digest(data);
                let signature: P256Signature = key
                    .sign_prehash(&hash)
                    .map_err(|_| "Signing failed".to_string())?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            EcdsaSigningKey::P384(key) => {
                let hash = Sha384::digest(data);
                let signature: P384Signature = key
                    .sign_prehash(&hash)
                    .map_err(|_| "Signing failed".to_string())?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            EcdsaSigningKey::P256(_) => HashAlgorithm::SHA256,
            EcdsaSigningKey::P384(_) => HashAlgorithm::SHA384,
        }
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoKeyProvider;

impl KeyProvider for RustCryptoKeyProvider {
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, String> {
        // PKCS#8 DER (what rcgen produces)
        if let Ok(key) = P256SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P256(key)));
        }
        if let Ok(key) = P384SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P384(key)));
        }

        // SEC1 DER (OpenSSL EC private key format)
        if let Ok(key) = p256::SecretKey::from_sec1_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P256(key.into())));
        }
        if let Ok(key) = p384::SecretKey::from_sec1_der(key_der) {
            return Ok(Box::new(EcdsaSigningKey::P384(key.into())));
        }

        if let Ok(pem_str) = str::from_utf8(key_der) {
            if pem_str.contains("-----BEGIN") {
                if let Ok((_label, doc)) = pkcs8::Document::from_pem(pem_str) {
                    return self.load_private_key(doc.as_bytes());
                }
            }
        }

        Err("Failed to parse private key in any supported format".to_string())
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoSignatureVerifier;

impl SignatureVerifier for RustCryptoSignatureVerifier {
    fn verify_signature(
        &self,
        cert_der: &[u8],
        data: &[u8],
        signature: &[u8],
        hash_alg: HashAlgorithm,
    ) -> Result<(), String> {
        let cert = X509Certificate::from_der(cert_der)
            .map_err(|e| format!("Failed to parse certificate: {e}"))?;
        let spki = &cert.tbs_certificate.subject_public_key_info;

        if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
            return Err(format!(
                "Unsupported public key algorithm: {}",
                spki.algorithm.oid
            ));
        }

        let pubkey_bytes = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| "Invalid EC subject_public_key bitstring".to_string())?;

        let curve_oid: ObjectIdentifier = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or("Missing EC curve parameter in certificate")?
            .decode_as()
            .map_err(|_| "Invalid EC curve parameter in certificate".to_string())?;

        match (curve_oid, hash_alg) {
            (OID_P256, HashAlgorithm::SHA256) => {
                let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(pubkey_bytes)
                    .map_err(|_| "Invalid P-256 public key".to_string())?;
                let sig = P256Signature::from_der(signature)
                    .map_err(|_| "Invalid signature format".to_string())?;
                key.verify_prehash(&Sha256::digest(data), &sig)
                    .map_err(|_| "ECDSA P-256 signature verification failed".to_string())
            }
            (OID_P384, HashAlgorithm::SHA384) => {
                let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(pubkey_bytes)
                    .map_err(|_| "Invalid P-384 public key".to_string())?;
                let sig = P384Signature::from_der(signature)
                    .map_err(|_| "Invalid signature format".to_string())?;
                key.verify_prehash(&Sha384::digest(data), &sig)
                    .map_err(|_| "ECDSA P-384 signature verification failed".to_string())
            }
            (curve, hash) => Err(format!(
                "Unsupported curve/hash combination: {} with {:?}",
                curve, hash
            )),
        }
    }
}

pub(super) static KEY_PROVIDER: RustCryptoKeyProvider = RustCryptoKeyProvider;

pub(super) static SIGNATURE_VERIFIER: RustCryptoSignatureVerifier = RustCryptoSignatureVerifier;
