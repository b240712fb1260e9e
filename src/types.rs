//! Protocol parameters shared by both roles.

use std::fmt;

use arrayvec::ArrayVec;
use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::rng::SeededRng;

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    TLS1_2,
    DTLS1_2,
    Unknown(u16),
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0303 => ProtocolVersion::TLS1_2,
            // DTLS versions are using 1-complement.
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn is_datagram(&self) -> bool {
        matches!(self, ProtocolVersion::DTLS1_2)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, value) = be_u16(input)?;
        Ok((input, ProtocolVersion::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::TLS1_2 => write!(f, "TLS 1.2"),
            ProtocolVersion::DTLS1_2 => write!(f, "DTLS 1.2"),
            ProtocolVersion::Unknown(v) => write!(f, "Unknown(0x{:04x})", v),
        }
    }
}

/// Hash algorithm driving the PRF and the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    SHA256,
    SHA384,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
        }
    }

    /// Code point from the TLS HashAlgorithm registry.
    pub fn as_u8(&self) -> u8 {
        match self {
            HashAlgorithm::SHA256 => 4,
            HashAlgorithm::SHA384 => 5,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            4 => Some(HashAlgorithm::SHA256),
            5 => Some(HashAlgorithm::SHA384),
            _ => None,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HashAlgorithm> {
        let (rest, value) = be_u8(input)?;
        let hash = HashAlgorithm::from_u8(value).ok_or_else(|| {
            nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Alt))
        })?;
        Ok((rest, hash))
    }
}

/// Cipher suites the engine can negotiate.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    /// TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
    ECDHE_ECDSA_AES128_GCM_SHA256,
    /// TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
    ECDHE_ECDSA_AES256_GCM_SHA384,
    Unknown(u16),
}

impl CipherSuite {
    pub const fn supported() -> &'static [CipherSuite] {
        &[
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
        ]
    }

    pub fn from_u16(value: u16) -> Self {
        match value {
            0xC02B => CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            0xC02C => CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384,
            _ => CipherSuite::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => 0xC02C,
            CipherSuite::Unknown(value) => *value,
        }
    }

    pub fn is_supported(&self) -> bool {
        Self::supported().contains(self)
    }

    /// Hash used for PRF and transcript. Unknown suites never get negotiated.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384 => HashAlgorithm::SHA384,
            _ => HashAlgorithm::SHA256,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

/// Key exchange groups (RFC 8422, RFC 7748).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedGroup {
    Secp256r1,
    Secp384r1,
    X25519,
    Unknown(u16),
}

impl NamedGroup {
    pub fn from_u16(value: u16) -> Self {
        match value {
            23 => NamedGroup::Secp256r1,
            24 => NamedGroup::Secp384r1,
            29 => NamedGroup::X25519,
            _ => NamedGroup::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            NamedGroup::Secp256r1 => 23,
            NamedGroup::Secp384r1 => 24,
            NamedGroup::X25519 => 29,
            NamedGroup::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedGroup> {
        let (input, value) = be_u16(input)?;
        Ok((input, NamedGroup::from_u16(value)))
    }
}

/// Hello random. 32 bytes, the first four a big endian unix time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random([u8; 32]);

impl Random {
    pub fn new(now_secs: u64, rng: &mut SeededRng) -> Self {
        let mut bytes = [0u8; 32];
        // This is valid until year 2106.
        bytes[..4].copy_from_slice(&(now_secs as u32).to_be_bytes());
        rng.fill(&mut bytes[4..]);
        Random(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, data) = take(32_usize)(input)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(data);
        Ok((input, Random(bytes)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0);
    }
}

/// Stateless DTLS cookie (up to 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie(ArrayVec<u8, 32>);

impl Cookie {
    pub fn try_new(data: &[u8]) -> Result<Self, String> {
        let mut v = ArrayVec::new();
        v.try_extend_from_slice(data)
            .map_err(|_| format!("Cookie too long: {}", data.len()))?;
        Ok(Cookie(v))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Cookie> {
        let (input, len) = be_u8(input)?;
        let (input, data) = take(len as usize)(input)?;
        let cookie = Cookie::try_new(data).map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::LengthValue))
        })?;
        Ok((input, cookie))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.0.len() as u8);
        output.extend_from_slice(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_codes() {
        assert_eq!(ProtocolVersion::from_u16(0xFEFD), ProtocolVersion::DTLS1_2);
        assert!(ProtocolVersion::DTLS1_2.is_datagram());
        assert!(!ProtocolVersion::TLS1_2.is_datagram());
        assert_eq!(
            ProtocolVersion::from_u16(0x0301),
            ProtocolVersion::Unknown(0x0301)
        );
    }

    #[test]
    fn suite_hash_algorithm() {
        assert_eq!(
            CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384.hash_algorithm(),
            HashAlgorithm::SHA384
        );
        assert!(!CipherSuite::Unknown(0x0005).is_supported());
    }

    #[test]
    fn cookie_rejects_oversized() {
        assert!(Cookie::try_new(&[0; 33]).is_err());
        assert_eq!(Cookie::try_new(&[1, 2, 3]).unwrap().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn random_carries_time_prefix() {
        let mut rng = SeededRng::new(Some(1));
        let r = Random::new(0x01020304, &mut rng);
        assert_eq!(&r.as_bytes()[..4], &[1, 2, 3, 4]);
    }
}
