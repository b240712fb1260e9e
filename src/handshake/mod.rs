//! The handshake driver.
//!
//! A [`Connection`] is driven by calling [`Connection::drive`] until it
//! reports [`Progress::Complete`]. Every call resumes at the stored state and
//! walks as many states as the available input allows:
//!
//! 1. Output left over from an earlier call is flushed first. If it still
//!    cannot be written the call returns [`Progress::WouldBlock`] and the
//!    state does not move.
//! 2. The state's unit of work runs: either queue one message, or pull
//!    incoming messages until a milestone of the peer's flight is reached.
//! 3. A state that queued output only advances once that output is flushed.
//!
//! Errors are sticky. Once a call fails, every later call returns the same
//! error and the state stays where the failure happened.
//!
//! The two roles live in `client` and `server`. A resumed handshake is
//! its own path through the states of each role, not a variation of the full
//! one.

use std::fmt;
use std::time::Duration;

use subtle::ConstantTimeEq;

use crate::crypto::{self, CryptoProvider, HashAlgorithm, VERIFY_DATA_LEN};
use crate::message::Message;
use crate::record::{RecordError, RecordLayer};
use crate::rng::SeededRng;
use crate::session::{AppContext, MasterSecret, PeerId, Session, SessionId, SessionStore};
use crate::time::Timestamp;
use crate::types::{CipherSuite, ProtocolVersion};
use crate::{Config, Context, Error, Progress};

mod client;
mod server;

pub use client::ClientState;
pub use server::ServerState;

/// Which side of the handshake a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The client.
    Connecting,
    /// The server.
    Accepting,
}

/// Current position of a connection in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting(ClientState),
    Accepting(ServerState),
}

/// One handshake, driven by the application.
///
/// Created by [`Context::connect`] or [`Context::accept`].
pub struct Connection {
    core: Core,
    flow: Flow,
    error: Option<Error>,
}

enum Flow {
    Client {
        machine: Machine<ClientState>,
        hs: Box<client::Client>,
    },
    Server {
        machine: Machine<ServerState>,
        hs: Box<server::Server>,
    },
}

impl Connection {
    pub(crate) fn new_client(ctx: Context, record: Box<dyn RecordLayer>) -> Connection {
        let mut core = Core::new(ctx, record);
        let hs = client::Client::new(&mut core);
        Connection {
            core,
            flow: Flow::Client {
                machine: Machine::new(ClientState::Begin),
                hs: Box::new(hs),
            },
            error: None,
        }
    }

    pub(crate) fn new_server(ctx: Context, record: Box<dyn RecordLayer>) -> Connection {
        let mut core = Core::new(ctx, record);
        let hs = server::Server::new(&mut core);
        Connection {
            core,
            flow: Flow::Server {
                machine: Machine::new(ServerState::Begin),
                hs: Box::new(hs),
            },
            error: None,
        }
    }

    /// Make as much progress as possible.
    ///
    /// Returns [`Progress::WouldBlock`] when the record layer cannot move
    /// data right now. Call again once it can. An `Err` is final.
    pub fn drive(&mut self) -> Result<Progress, Error> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        let result = match &mut self.flow {
            Flow::Client { machine, hs } => {
                machine.run(&mut self.core, ClientState::Complete, |state, core| {
                    state.make_progress(hs, core)
                })
            }
            Flow::Server { machine, hs } => {
                machine.run(&mut self.core, ServerState::Complete, |state, core| {
                    state.make_progress(hs, core)
                })
            }
        };

        if let Err(e) = &result {
            warn!("{:?} handshake failed in {:?}: {}", self.role(), self.state(), e);
            self.error = Some(e.clone());
        }

        result
    }

    /// Tag this connection with an application context.
    ///
    /// A session is only resumed by a connection with the same tag. Sessions
    /// created by this connection carry the tag.
    pub fn set_session_context(&mut self, tag: &[u8]) -> Result<(), Error> {
        self.core.app_context = Some(AppContext::try_new(tag)?);
        Ok(())
    }

    /// Identify the server this connection talks to.
    ///
    /// Before the handshake starts, the session cached for this server (if
    /// any) is offered for resumption. A completed full handshake caches its
    /// session under this identity. Connecting role only.
    pub fn remember_server(&mut self, identity: &[u8]) -> Result<(), Error> {
        let peer_id = PeerId::new(identity)?;
        match &mut self.flow {
            Flow::Client { machine, hs } => {
                machine.require_start("remember_server")?;
                hs.set_peer_id(peer_id);
                Ok(())
            }
            Flow::Server { .. } => Err(Error::WrongRole("connecting")),
        }
    }

    /// Offer a specific session for resumption. Connecting role only.
    ///
    /// Takes precedence over the session found through
    /// [`remember_server`](Self::remember_server). Fails with
    /// [`Error::SessionExpired`] for an expired session and with
    /// [`Error::SessionContextMismatch`] if this connection has an
    /// application context the session does not carry.
    pub fn set_session(&mut self, session: Session) -> Result<(), Error> {
        let now = self.core.now();
        let wanted = self.core.app_context;

        match &mut self.flow {
            Flow::Client { machine, hs } => {
                machine.require_start("set_session")?;
                if session.is_expired(now) {
                    return Err(Error::SessionExpired);
                }
                if !session.context_matches(wanted.as_ref()) {
                    return Err(Error::SessionContextMismatch);
                }
                hs.set_session(session);
                Ok(())
            }
            Flow::Server { .. } => Err(Error::WrongRole("connecting")),
        }
    }

    /// Lifetime of the session this connection creates.
    ///
    /// Defaults to [`Config::session_timeout`]. Whole seconds, at least one.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        if timeout.as_secs() == 0 || timeout.as_secs() > u32::MAX as u64 {
            return Err(Error::InvalidInput(format!(
                "Session timeout out of range: {:?}",
                timeout
            )));
        }
        self.core.timeout = timeout;
        Ok(())
    }

    /// The negotiated session, once known.
    ///
    /// For a resumed handshake this is the reused session. For a full one it
    /// appears when the handshake completes.
    pub fn session(&self) -> Option<&Session> {
        self.core.session.as_ref()
    }

    pub fn state(&self) -> HandshakeState {
        match &self.flow {
            Flow::Client { machine, .. } => HandshakeState::Connecting(machine.state),
            Flow::Server { machine, .. } => HandshakeState::Accepting(machine.state),
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.flow {
            Flow::Client { machine, .. } => machine.state == ClientState::Complete,
            Flow::Server { machine, .. } => machine.state == ServerState::Complete,
        }
    }

    /// Whether the handshake reuses a cached session.
    pub fn is_resumed(&self) -> bool {
        self.core.resumed
    }

    pub fn role(&self) -> Role {
        match self.flow {
            Flow::Client { .. } => Role::Connecting,
            Flow::Server { .. } => Role::Accepting,
        }
    }

    /// The error that stopped the handshake.
    pub fn last_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The peer's certificate chain, leaf first.
    ///
    /// Empty until the peer's Certificate arrives, and for resumed
    /// handshakes unless the session kept a copy of the chain.
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.core.peer_certificates
    }

    /// The certificate status stapled by the server (connecting role).
    pub fn certificate_status(&self) -> Option<&[u8]> {
        self.core.certificate_status.as_deref()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("resumed", &self.core.resumed)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// State variable plus the state to enter once queued output is flushed.
struct Machine<S> {
    state: S,
    resume_at: Option<S>,
    begin: S,
}

impl<S: Copy + Eq + fmt::Debug> Machine<S> {
    fn new(begin: S) -> Self {
        Machine {
            state: begin,
            resume_at: None,
            begin,
        }
    }

    fn require_start(&self, op: &str) -> Result<(), Error> {
        if self.resume_at.is_some() || self.state != self.begin {
            return Err(Error::InvalidInput(format!(
                "{} after the handshake started",
                op
            )));
        }
        Ok(())
    }

    fn transition(&mut self, next: S) {
        trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn run(
        &mut self,
        core: &mut Core,
        complete: S,
        mut step: impl FnMut(S, &mut Core) -> Result<S, Error>,
    ) -> Result<Progress, Error> {
        loop {
            if let Some(next) = self.resume_at {
                if !core.flush()? {
                    return Ok(Progress::WouldBlock);
                }
                self.resume_at = None;
                self.transition(next);
            }

            if self.state == complete {
                return Ok(Progress::Complete);
            }

            let prev = self.state;
            let next = step(prev, core)?;

            if next == prev {
                return Ok(Progress::WouldBlock);
            }

            if core.record.buffered_output() > 0 {
                self.resume_at = Some(next);
            } else {
                self.transition(next);
            }
        }
    }
}

/// Per-connection data shared by both roles.
pub(crate) struct Core {
    ctx: Context,
    record: Box<dyn RecordLayer>,
    rng: SeededRng,
    /// Canonical framing of every transcribed message so far.
    transcript: Vec<u8>,
    app_context: Option<AppContext>,
    timeout: Duration,
    session: Option<Session>,
    resumed: bool,
    peer_certificates: Vec<Vec<u8>>,
    certificate_status: Option<Vec<u8>>,
}

impl Core {
    fn new(ctx: Context, record: Box<dyn RecordLayer>) -> Core {
        let rng = SeededRng::new(ctx.config().rng_seed());
        let timeout = ctx.config().session_timeout();
        Core {
            ctx,
            record,
            rng,
            transcript: Vec::new(),
            app_context: None,
            timeout,
            session: None,
            resumed: false,
            peer_certificates: Vec::new(),
            certificate_status: None,
        }
    }

    fn config(&self) -> &Config {
        self.ctx.config()
    }

    fn provider(&self) -> &CryptoProvider {
        self.ctx.config().crypto_provider()
    }

    fn now(&self) -> Timestamp {
        self.ctx.config().clock().now()
    }

    fn store(&self) -> Option<&SessionStore> {
        self.ctx.session_store()
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.config().protocol_version()
    }

    /// Queue a message. `false` if the record layer cannot take it now.
    fn send(&mut self, message: &Message) -> Result<bool, Error> {
        match self.record.send_handshake_message(message) {
            Ok(n) => {
                trace!("Queued {:?}, {} bytes", message.message_type(), n);
                if message.message_type().is_transcribed() {
                    self.transcribe(message)?;
                }
                Ok(true)
            }
            Err(RecordError::WouldBlock) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// `false` while queued output remains.
    fn flush(&mut self) -> Result<bool, Error> {
        match self.record.flush() {
            Ok(()) => Ok(true),
            Err(RecordError::WouldBlock) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull messages until `reached` reports the milestone.
    ///
    /// Every message handled successfully is added to the transcript after
    /// `reached` saw it. Returns `false` if input ran out first.
    fn receive_until(
        &mut self,
        mut reached: impl FnMut(&mut Core, &Message) -> Result<bool, Error>,
    ) -> Result<bool, Error> {
        loop {
            let message = match self.record.receive() {
                Ok(m) => m,
                Err(RecordError::WouldBlock) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            trace!("Received {:?}", message.message_type());

            let done = reached(self, &message)?;

            if message.message_type().is_transcribed() {
                self.transcribe(&message)?;
            }

            if done {
                return Ok(true);
            }
        }
    }

    fn transcribe(&mut self, message: &Message) -> Result<(), Error> {
        let bytes = message.encode()?;
        self.transcript.extend_from_slice(&bytes);
        Ok(())
    }

    fn transcript_hash(&self, hash: HashAlgorithm) -> Vec<u8> {
        let mut ctx = self.provider().hash_provider.create_hash(hash);
        ctx.update(&self.transcript);
        ctx.clone_and_finalize()
    }

    fn finished_data(
        &self,
        suite: CipherSuite,
        master_secret: &MasterSecret,
        label: &str,
    ) -> Result<[u8; VERIFY_DATA_LEN], Error> {
        let hash = suite.hash_algorithm();
        let transcript_hash = self.transcript_hash(hash);
        crypto::verify_data(self.provider(), hash, master_secret, label, &transcript_hash)
    }

    /// Check the peer's Finished against the transcript so far.
    fn check_finished(
        &self,
        suite: CipherSuite,
        master_secret: &MasterSecret,
        label: &str,
        received: &[u8; VERIFY_DATA_LEN],
    ) -> Result<(), Error> {
        let expected = self.finished_data(suite, master_secret, label)?;
        if !bool::from(expected.ct_eq(received)) {
            return Err(Error::SecurityError("Finished verify data mismatch".into()));
        }
        Ok(())
    }

    /// Sign with the local certificate's key.
    fn sign(&self, data: &[u8]) -> Result<(HashAlgorithm, Vec<u8>), Error> {
        let identity = self
            .ctx
            .identity()
            .ok_or_else(|| Error::ConfigError("No certificate to sign with".into()))?;
        let mut key = identity.key.lock()?;
        let signature = key.sign(data).map_err(Error::CryptoError)?;
        Ok((key.hash_algorithm(), signature))
    }

    fn local_certificate(&self) -> Option<&[u8]> {
        self.ctx.identity().map(|i| i.certificate.as_slice())
    }

    /// Run the certificate validation collaborator on the peer's chain.
    fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<(), Error> {
        match self.config().cert_verifier() {
            Some(verifier) => verifier
                .verify(chain)
                .map_err(|e| Error::CertificateError(format!("Peer certificate rejected: {}", e))),
            None => {
                warn!("No certificate verifier configured, accepting peer certificate");
                Ok(())
            }
        }
    }

    /// Session for a completed full handshake.
    fn new_session(
        &self,
        session_id: SessionId,
        master_secret: MasterSecret,
        suite: CipherSuite,
        timeout: Duration,
    ) -> Session {
        #[allow(unused_mut)]
        let mut session = Session::new(
            session_id,
            master_secret,
            suite,
            self.protocol_version(),
            self.now(),
            timeout,
        );
        session.set_app_context(self.app_context);

        #[cfg(feature = "session-certs")]
        if self.config().keep_peer_certificates() {
            session.set_peer_cert_chain(self.peer_certificates.clone());
        }

        session
    }

    /// Take over a cached session for resumption.
    fn resume(&mut self, session: Session) {
        #[cfg(feature = "session-certs")]
        {
            self.peer_certificates = session.peer_cert_chain().to_vec();
        }
        self.resumed = true;
        self.session = Some(session);
    }

    /// Insert a freshly negotiated session into the store.
    ///
    /// A failed insert only means the session is not cached. The handshake
    /// itself is unaffected.
    fn publish(&self, session: &Session) {
        let Some(store) = self.store() else {
            return;
        };
        if let Err(e) = store.insert(session) {
            warn!("Session {} not cached: {}", session.session_id(), e);
        }
    }
}
