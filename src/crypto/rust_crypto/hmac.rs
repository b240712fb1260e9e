//! HMAC and the TLS 1.2 P_hash expansion using RustCrypto.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use crate::crypto::provider::HmacProvider;
use crate::types::HashAlgorithm;

/// TLS 1.2 `P_hash(secret, seed)` truncated to `output_len` bytes.
pub(super) fn p_hash(
    hash_alg: HashAlgorithm,
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, String> {
    match hash_alg {
        HashAlgorithm::SHA256 => expand::<Hmac<Sha256>>(secret, full_seed, output_len),
        HashAlgorithm::SHA384 => expand::<Hmac<Sha384>>(secret, full_seed, output_len),
    }
}

fn expand<M: Mac + KeyInit + Clone>(
    secret: &[u8],
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, String> {
    let keyed = <M as Mac>::new_from_slice(secret)
        .map_err(|_| "Invalid HMAC key length".to_string())?;

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut mac = keyed.clone();
    mac.update(seed);
    let mut a = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(output_len);
    while out.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut mac = keyed.clone();
        mac.update(&a);
        mac.update(seed);
        let chunk = mac.finalize().into_bytes();

        let to_copy = (output_len - out.len()).min(chunk.len());
        out.extend_from_slice(&chunk[..to_copy]);

        // A(i+1) = HMAC_hash(secret, A(i))
        let mut mac = keyed.clone();
        mac.update(&a);
        a = mac.finalize().into_bytes();
    }

    Ok(out)
}

#[derive(Debug)]
pub(super) struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], String> {
        let mut mac =
            <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| "Invalid HMAC key".to_string())?;
        mac.update(data);
        let bytes = mac.finalize().into_bytes();

        let mut output = [0u8; 32];
        output.copy_from_slice(&bytes);
        Ok(output)
    }
}

pub(super) static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;
