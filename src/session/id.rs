//! Fixed-capacity byte identifiers carried by sessions.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use nom::bytes::complete::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};
use sha2::{Digest, Sha256};

use crate::rng::SeededRng;
use crate::Error;

/// Max session id length.
pub const ID_LEN: usize = 32;

/// Max peer identity length. Longer identities are digested.
pub const PEER_ID_LEN: usize = 32;

/// Max application context tag length.
pub const MAX_CONTEXT_LEN: usize = 32;

macro_rules! var_array {
    ($name:ident, $min:expr, $max:expr) => {
        #[derive(Clone, Copy)]
        pub struct $name([u8; $max], usize);

        impl $name {
            pub fn try_new(data: &[u8]) -> Result<Self, Error> {
                #[allow(unused_comparisons)]
                if data.len() < $min || data.len() > $max {
                    return Err(Error::InvalidInput(format!(
                        "{} length {} not within {}..={}",
                        stringify!($name),
                        data.len(),
                        $min,
                        $max
                    )));
                }
                let mut array = [0; $max];
                array[..data.len()].copy_from_slice(data);
                Ok($name(array, data.len()))
            }

            pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
                let (input, len) = be_u8(input)?;
                #[allow(unused_comparisons)]
                if (len as usize) < $min || (len as usize) > $max {
                    return Err(Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
                }
                let (input, data) = take(len as usize)(input)?;
                let mut array = [0; $max];
                array[..data.len()].copy_from_slice(data);
                Ok((input, $name(array, data.len())))
            }

            pub fn serialize(&self, output: &mut Vec<u8>) {
                output.push(self.1 as u8);
                output.extend_from_slice(&self.0[..self.1]);
            }

            /// Raw fixed-size storage plus length, used by the snapshot codec.
            pub(crate) fn raw(&self) -> (&[u8; $max], usize) {
                (&self.0, self.1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for b in &self.0[..self.1] {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, ")")
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.deref() == other.deref()
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.deref().hash(state)
            }
        }

        impl Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &Self::Target {
                &self.0[..self.1]
            }
        }

        impl<'a> TryFrom<&'a [u8]> for $name {
            type Error = Error;

            fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
                Self::try_new(value)
            }
        }
    };
}

var_array!(SessionId, 0, ID_LEN);
var_array!(PeerId, 1, PEER_ID_LEN);
var_array!(AppContext, 1, MAX_CONTEXT_LEN);

impl SessionId {
    pub fn empty() -> SessionId {
        SessionId([0; ID_LEN], 0)
    }

    pub fn random(rng: &mut SeededRng) -> SessionId {
        let mut arr = [0; ID_LEN];
        rng.fill(&mut arr);
        SessionId(arr, ID_LEN)
    }
}

impl PeerId {
    /// Identity of a remote endpoint, e.g. "example.com:443".
    ///
    /// Identities longer than [`PEER_ID_LEN`] are replaced by their SHA-256 digest.
    pub fn new(identity: &[u8]) -> Result<PeerId, Error> {
        if identity.len() > PEER_ID_LEN {
            let digest = Sha256::digest(identity);
            return PeerId::try_new(&digest);
        }
        PeerId::try_new(identity)
    }
}

/// FNV-1a over the identifier bytes.
///
/// Stable across processes, which the snapshot codec relies on: a restored
/// store must hash ids to the same rows they were written to.
pub(crate) fn stable_hash(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in data {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
