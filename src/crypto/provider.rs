//! Cryptographic provider traits for pluggable crypto backends.
//!
//! The handshake never touches a primitive directly. Everything goes through a
//! [`CryptoProvider`], a struct of `&'static dyn` references to the
//! components below, so a backend can be swapped without touching the driver.
//!
//! - **Key exchange groups** ([`SupportedKxGroup`]): ephemeral ECDHE
//! - **Signature verification** ([`SignatureVerifier`]): check a signature against a certificate
//! - **Key provider** ([`KeyProvider`]): load the private key of a certificate
//! - **Secure random** ([`SecureRandom`])
//! - **Hash provider** ([`HashProvider`]): transcript hashing
//! - **PRF provider** ([`PrfProvider`]): TLS 1.2 PRF for master secret and Finished
//! - **HMAC provider** ([`HmacProvider`]): DTLS cookies
//! - **Ticket AEAD** ([`TicketAead`]): sealing session state into tickets
//!
//! Components report failures as `String`; the driver maps them into
//! [`Error::CryptoError`](crate::Error::CryptoError).
//!
//! # Example
//!
//! ```
//! use reprise::crypto::{rust_crypto, CryptoProvider};
//!
//! // Only the first install wins.
//! let _ = CryptoProvider::install_default(rust_crypto::default_provider());
//! assert!(CryptoProvider::get_default().is_some());
//! ```

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::OnceLock;

use crate::types::{HashAlgorithm, NamedGroup};

/// Marker trait for types that are safe to use in crypto provider components.
///
/// Automatically implemented for all types that satisfy the bounds.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

/// Stateful hash context for incremental hashing.
pub trait HashContext: CryptoSafe {
    fn update(&mut self, data: &[u8]);

    /// Digest of everything so far. The context can continue to be updated.
    fn clone_and_finalize(&self) -> Vec<u8>;
}

/// Private key of the local certificate.
pub trait SigningKey: CryptoSafe {
    /// Sign data and return the DER encoded signature.
    fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>, String>;

    /// Hash algorithm this key signs with.
    fn hash_algorithm(&self) -> HashAlgorithm;
}

/// Active key exchange instance (ephemeral keypair for one handshake).
pub trait ActiveKeyExchange: CryptoSafe {
    fn pub_key(&self) -> &[u8];

    /// Complete the exchange with the peer's public key, returning the shared secret.
    fn complete(self: Box<Self>, peer_pub: &[u8]) -> Result<Vec<u8>, String>;

    fn group(&self) -> NamedGroup;
}

/// Key exchange group support (factory for [`ActiveKeyExchange`]).
pub trait SupportedKxGroup: CryptoSafe {
    fn name(&self) -> NamedGroup;

    /// Start a new key exchange, generating an ephemeral keypair.
    fn start_exchange(&self) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

/// Signature verification against certificates.
pub trait SignatureVerifier: CryptoSafe {
    /// Verify a signature on data using the key of a DER encoded X.509 certificate.
    fn verify_signature(
        &self,
        cert_der: &[u8],
        data: &[u8],
        signature: &[u8],
        hash_alg: HashAlgorithm,
    ) -> Result<(), String>;
}

/// Private key parser (factory for [`SigningKey`]).
pub trait KeyProvider: CryptoSafe {
    /// Load a private key from DER or PEM bytes.
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, String>;
}

/// Cryptographically secure random number generator.
pub trait SecureRandom: CryptoSafe {
    fn fill(&self, buf: &mut [u8]) -> Result<(), String>;
}

/// Hash provider (factory for [`HashContext`]).
pub trait HashProvider: CryptoSafe {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Box<dyn HashContext>;
}

/// TLS 1.2 PRF (RFC 5246, section 5).
pub trait PrfProvider: CryptoSafe {
    /// `PRF(secret, label, seed)` truncated to `output_len` bytes.
    fn prf_tls12(
        &self,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        output_len: usize,
        hash: HashAlgorithm,
    ) -> Result<Vec<u8>, String>;
}

/// HMAC provider.
pub trait HmacProvider: CryptoSafe {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], String>;
}

/// AEAD used to seal session tickets. 32 byte key, 12 byte nonce.
pub trait TicketAead: CryptoSafe {
    /// Encrypt `plaintext`, returning ciphertext with the tag appended.
    fn seal(&self, key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, String>;

    /// Decrypt and authenticate `ciphertext`.
    fn open(&self, key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, String>;
}

/// Cryptographic provider for the handshake.
///
/// Holds static references to every component the driver needs.
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    /// Key exchange groups in preference order. The first one is used.
    pub kx_groups: &'static [&'static dyn SupportedKxGroup],

    /// Signature verification for the peer's key exchange and certificate verify.
    pub signature_verification: &'static dyn SignatureVerifier,

    /// Key provider for parsing private keys.
    pub key_provider: &'static dyn KeyProvider,

    /// Secure random number generator.
    pub secure_random: &'static dyn SecureRandom,

    /// Hash provider for the handshake transcript.
    pub hash_provider: &'static dyn HashProvider,

    /// PRF for master secret and Finished verify data.
    pub prf_provider: &'static dyn PrfProvider,

    /// HMAC provider for DTLS cookies.
    pub hmac_provider: &'static dyn HmacProvider,

    /// AEAD for session tickets.
    pub ticket_aead: &'static dyn TicketAead,
}

static DEFAULT: OnceLock<CryptoProvider> = OnceLock::new();

impl CryptoProvider {
    /// Install a process wide default provider.
    ///
    /// Used by [`Config::builder()`](crate::Config::builder) when no provider
    /// is set explicitly. Only the first call wins; later calls hand the
    /// provider back.
    pub fn install_default(provider: CryptoProvider) -> Result<(), CryptoProvider> {
        DEFAULT.set(provider)
    }

    /// The installed default provider, if any.
    pub fn get_default() -> Option<&'static CryptoProvider> {
        DEFAULT.get()
    }

    /// The installed default, or the RustCrypto provider.
    pub(crate) fn default_or_rust_crypto() -> CryptoProvider {
        match Self::get_default() {
            Some(p) => p.clone(),
            None => super::rust_crypto::default_provider(),
        }
    }
}
