//! Session tickets issued by the accepting role.
//!
//! A ticket is the session state sealed under a key only the issuing
//! [`Context`](crate::Context) knows, so the server can resume a session it
//! no longer caches. The sealed state keeps the original `created_at` and
//! `timeout`: renewing a ticket never extends the session's lifetime.
//!
//! Layout: `nonce (12) | AEAD(state) | tag (16)` where state is
//!
//! ```text
//! version u8 | suite u16 | protocol u16 | created_at u64 | timeout u32
//! | master_secret [48] | session_id u8+bytes | app_context u8+bytes
//! ```

use nom::bytes::complete::{tag, take};
use nom::combinator::all_consuming;
use nom::number::complete::{be_u16, be_u32, be_u64, be_u8};
use nom::IResult;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::CryptoProvider;
use crate::session::{AppContext, MasterSecret, Session, SessionId, SECRET_LEN};
use crate::time::Timestamp;
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error;

const STATE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const AAD: &[u8] = b"reprise session ticket";

/// Key sealing the tickets of one context. Wiped on drop.
pub(crate) struct TicketKey([u8; 32]);

impl TicketKey {
    pub fn generate(provider: &CryptoProvider) -> Result<TicketKey, Error> {
        let mut key = [0u8; 32];
        provider
            .secure_random
            .fill(&mut key)
            .map_err(Error::CryptoError)?;
        Ok(TicketKey(key))
    }

    /// Seal `session` into an opaque ticket.
    pub fn seal(&self, provider: &CryptoProvider, session: &Session) -> Result<Vec<u8>, Error> {
        let state = Zeroizing::new(encode_state(session));

        let mut nonce = [0u8; NONCE_LEN];
        provider
            .secure_random
            .fill(&mut nonce)
            .map_err(Error::CryptoError)?;

        let sealed = provider
            .ticket_aead
            .seal(&self.0, &nonce, AAD, &state[..])
            .map_err(Error::CryptoError)?;

        let mut ticket = Vec::with_capacity(NONCE_LEN + sealed.len());
        ticket.extend_from_slice(&nonce);
        ticket.extend_from_slice(&sealed);
        Ok(ticket)
    }

    /// Open a ticket. Anything that does not authenticate or parse is `None`.
    pub fn open(&self, provider: &CryptoProvider, ticket: &[u8]) -> Option<Session> {
        if ticket.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, sealed) = ticket.split_at(NONCE_LEN);
        let mut n = [0u8; NONCE_LEN];
        n.copy_from_slice(nonce);

        let state = match provider.ticket_aead.open(&self.0, &n, AAD, sealed) {
            Ok(state) => Zeroizing::new(state),
            Err(e) => {
                debug!("Ticket rejected: {}", e);
                return None;
            }
        };

        let result = match all_consuming(parse_state)(&state[..]) {
            Ok((_, session)) => Some(session),
            Err(_) => {
                debug!("Ticket state malformed");
                None
            }
        };
        result
    }
}

impl Drop for TicketKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

fn encode_state(session: &Session) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    out.push(STATE_VERSION);
    session.cipher_suite().serialize(&mut out);
    session.protocol_version().serialize(&mut out);
    out.extend_from_slice(&session.created_at().as_secs().to_be_bytes());
    out.extend_from_slice(&session.timeout_secs().to_be_bytes());
    out.extend_from_slice(session.master_secret().as_bytes());
    session.session_id().serialize(&mut out);
    match session.app_context() {
        Some(ctx) => ctx.serialize(&mut out),
        None => out.push(0),
    }
    out
}

fn parse_state(input: &[u8]) -> IResult<&[u8], Session> {
    let (input, _) = tag(&[STATE_VERSION][..])(input)?;
    let (input, suite) = be_u16(input)?;
    let (input, version) = be_u16(input)?;
    let (input, created_at) = be_u64(input)?;
    let (input, timeout) = be_u32(input)?;
    let (input, secret) = take(SECRET_LEN)(input)?;
    let (input, session_id) = SessionId::parse(input)?;

    let (rest, ctx_len) = be_u8(input)?;
    let (input, app_context) = if ctx_len == 0 {
        (rest, None)
    } else {
        let (input, ctx) = AppContext::parse(input)?;
        (input, Some(ctx))
    };

    let mut bytes = [0u8; SECRET_LEN];
    bytes.copy_from_slice(secret);

    let mut session = Session::new(
        session_id,
        MasterSecret::new(bytes),
        CipherSuite::from_u16(suite),
        ProtocolVersion::from_u16(version),
        Timestamp::from_secs(created_at),
        std::time::Duration::from_secs(timeout as u64),
    );
    bytes.zeroize();
    session.set_app_context(app_context);

    Ok((input, session))
}
