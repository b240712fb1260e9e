//! Cacheable records of previously negotiated secret material.
//!
//! A [`Session`] is what lets a later connection skip most of the handshake.
//! Sessions live in a [`SessionStore`] shared by every connection of a
//! [`Context`](crate::Context), and every copy into or out of the store is a
//! deep copy: a session never shares its ticket buffer with anyone.

use std::fmt;
use std::time::Duration;

use arrayvec::ArrayVec;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::time::Timestamp;
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error;

mod id;
pub(crate) mod snapshot;
mod store;

pub use id::{AppContext, PeerId, SessionId, ID_LEN, MAX_CONTEXT_LEN, PEER_ID_LEN};
pub(crate) use id::stable_hash;
pub use store::{CacheStats, SessionStore};

/// Length of the master secret.
pub const SECRET_LEN: usize = 48;

/// Tickets up to this size are stored inline in the session.
pub const INLINE_TICKET_LEN: usize = 256;

/// Largest ticket a session accepts.
pub const MAX_TICKET_LEN: usize = u16::MAX as usize;

/// The master secret of a session. Wiped on drop.
#[derive(Clone)]
pub struct MasterSecret([u8; SECRET_LEN]);

impl MasterSecret {
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        MasterSecret(bytes)
    }

    pub fn try_from_slice(data: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; SECRET_LEN] = data.try_into().map_err(|_| {
            Error::InvalidInput(format!("Master secret must be {} bytes", SECRET_LEN))
        })?;
        Ok(MasterSecret(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl PartialEq for MasterSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for MasterSecret {}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

/// A peer-issued session ticket.
///
/// Small tickets stay inside the session, large ones get their own heap
/// allocation. The variant and the length always change together.
#[derive(Clone, PartialEq, Eq)]
pub enum Ticket {
    Inline(ArrayVec<u8, INLINE_TICKET_LEN>),
    Heap(Box<[u8]>),
}

impl Ticket {
    /// Copy `data` into a new ticket.
    pub fn from_slice(data: &[u8]) -> Result<Ticket, Error> {
        if data.len() > MAX_TICKET_LEN {
            return Err(Error::InvalidInput(format!(
                "Ticket too long: {}",
                data.len()
            )));
        }
        if data.len() <= INLINE_TICKET_LEN {
            let mut inline = ArrayVec::new();
            inline
                .try_extend_from_slice(data)
                .map_err(|_| Error::InvalidInput("Ticket too long".into()))?;
            return Ok(Ticket::Inline(inline));
        }
        Ok(Ticket::Heap(heap_copy(data)?))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Ticket::Inline(v) => v,
            Ticket::Heap(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Ticket::Inline(_))
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ticket::Inline(v) => write!(f, "Ticket::Inline({} bytes)", v.len()),
            Ticket::Heap(b) => write!(f, "Ticket::Heap({} bytes)", b.len()),
        }
    }
}

/// Fallible heap copy. Allocation failure surfaces as [`Error::OutOfMemory`].
pub(crate) fn heap_copy(data: &[u8]) -> Result<Box<[u8]>, Error> {
    let mut v = Vec::new();
    v.try_reserve_exact(data.len())
        .map_err(|_| Error::OutOfMemory)?;
    v.extend_from_slice(data);
    Ok(v.into_boxed_slice())
}

/// Negotiated material that can be reused to skip later handshakes.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    session_id: SessionId,
    peer_id: Option<PeerId>,
    master_secret: MasterSecret,
    cipher_suite: CipherSuite,
    protocol_version: ProtocolVersion,
    created_at: Timestamp,
    timeout: u32,
    ticket: Option<Ticket>,
    #[cfg(feature = "session-certs")]
    peer_cert_chain: Vec<Vec<u8>>,
    app_context: Option<AppContext>,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        master_secret: MasterSecret,
        cipher_suite: CipherSuite,
        protocol_version: ProtocolVersion,
        created_at: Timestamp,
        timeout: Duration,
    ) -> Session {
        Session {
            session_id,
            peer_id: None,
            master_secret,
            cipher_suite,
            protocol_version,
            created_at,
            timeout: timeout.as_secs().min(u32::MAX as u64) as u32,
            ticket: None,
            #[cfg(feature = "session-certs")]
            peer_cert_chain: Vec::new(),
            app_context: None,
        }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn with_ticket(mut self, ticket: Ticket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    pub fn with_app_context(mut self, app_context: AppContext) -> Self {
        self.app_context = Some(app_context);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn master_secret(&self) -> &MasterSecret {
        &self.master_secret
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout as u64)
    }

    pub(crate) fn timeout_secs(&self) -> u32 {
        self.timeout
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    pub fn app_context(&self) -> Option<AppContext> {
        self.app_context
    }

    /// Certificates the peer presented in the handshake that created this session.
    #[cfg(feature = "session-certs")]
    pub fn peer_cert_chain(&self) -> &[Vec<u8>] {
        &self.peer_cert_chain
    }

    pub fn expires_at(&self) -> Timestamp {
        self.created_at.saturating_add(self.timeout())
    }

    /// A session is usable only while `now < created_at + timeout`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }

    /// Whether a connection holding `wanted` may reuse this session.
    ///
    /// A connection without a context accepts any session.
    pub fn context_matches(&self, wanted: Option<&AppContext>) -> bool {
        match wanted {
            None => true,
            Some(wanted) => self.app_context.as_ref() == Some(wanted),
        }
    }

    /// Copy of every field except the ticket.
    pub(crate) fn clone_without_ticket(&self) -> Session {
        Session {
            session_id: self.session_id,
            peer_id: self.peer_id,
            master_secret: self.master_secret.clone(),
            cipher_suite: self.cipher_suite,
            protocol_version: self.protocol_version,
            created_at: self.created_at,
            timeout: self.timeout,
            ticket: None,
            #[cfg(feature = "session-certs")]
            peer_cert_chain: self.peer_cert_chain.clone(),
            app_context: self.app_context,
        }
    }

    pub(crate) fn set_ticket(&mut self, ticket: Option<Ticket>) {
        self.ticket = ticket;
    }

    pub(crate) fn take_ticket(&mut self) -> Option<Ticket> {
        self.ticket.take()
    }

    pub(crate) fn set_peer_id(&mut self, peer_id: Option<PeerId>) {
        self.peer_id = peer_id;
    }

    pub(crate) fn set_app_context(&mut self, app_context: Option<AppContext>) {
        self.app_context = app_context;
    }

    #[cfg(feature = "session-certs")]
    pub(crate) fn set_peer_cert_chain(&mut self, chain: Vec<Vec<u8>>) {
        self.peer_cert_chain = chain;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("peer_id", &self.peer_id)
            .field("cipher_suite", &self.cipher_suite)
            .field("protocol_version", &self.protocol_version)
            .field("created_at", &self.created_at)
            .field("timeout", &self.timeout)
            .field("ticket", &self.ticket)
            .field("app_context", &self.app_context)
            .finish_non_exhaustive()
    }
}
