//! Cryptographic collaborators of the handshake.
//!
//! The driver treats every call in here as atomic: it either succeeds or the
//! handshake fails with [`Error::CryptoError`].

pub mod provider;
pub mod rust_crypto;

pub use provider::{ActiveKeyExchange, CryptoProvider, CryptoSafe, HashContext, HashProvider};
pub use provider::{HmacProvider, KeyProvider, PrfProvider, SecureRandom};
pub use provider::{SignatureVerifier, SigningKey, SupportedKxGroup, TicketAead};

pub use crate::types::{HashAlgorithm, NamedGroup};

use crate::session::{MasterSecret, SECRET_LEN};
use crate::types::Random;
use crate::Error;

/// Length of Finished verify data.
pub const VERIFY_DATA_LEN: usize = 12;

/// `master_secret = PRF(pre_master_secret, "master secret", client_random + server_random)[0..48]`
pub(crate) fn derive_master_secret(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    pre_master_secret: &[u8],
    client_random: &Random,
    server_random: &Random,
) -> Result<MasterSecret, Error> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(client_random.as_bytes());
    seed[32..].copy_from_slice(server_random.as_bytes());

    let out = provider
        .prf_provider
        .prf_tls12(pre_master_secret, "master secret", &seed, SECRET_LEN, hash)
        .map_err(Error::CryptoError)?;

    MasterSecret::try_from_slice(&out)
}

/// Finished verify data over the transcript hash.
///
/// `PRF(master_secret, finished_label, Hash(handshake_messages))[0..12]`
pub(crate) fn verify_data(
    provider: &CryptoProvider,
    hash: HashAlgorithm,
    master_secret: &MasterSecret,
    label: &str,
    transcript_hash: &[u8],
) -> Result<[u8; VERIFY_DATA_LEN], Error> {
    let out = provider
        .prf_provider
        .prf_tls12(master_secret.as_bytes(), label, transcript_hash, VERIFY_DATA_LEN, hash)
        .map_err(Error::CryptoError)?;

    let mut data = [0u8; VERIFY_DATA_LEN];
    data.copy_from_slice(&out);
    Ok(data)
}

/// Bytes covered by the server's key exchange signature.
pub(crate) fn key_exchange_params(
    client_random: &Random,
    server_random: &Random,
    group: NamedGroup,
    public_key: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(64 + 3 + public_key.len());
    data.extend_from_slice(client_random.as_bytes());
    data.extend_from_slice(server_random.as_bytes());
    data.extend_from_slice(&group.as_u16().to_be_bytes());
    data.push(public_key.len() as u8);
    data.extend_from_slice(public_key);
    data
}
