// Connecting role.
//
// Full handshake:
//
//   ClientHello             -->
//                           <--  HelloVerifyRequest (datagram, once)
//   ClientHello + cookie    -->
//                           <--  ServerHello, Certificate, CertificateStatus*,
//                                ServerKeyExchange, CertificateRequest*,
//                                ServerHelloDone
//   Certificate*, ClientKeyExchange, CertificateVerify*,
//   ChangeCipherSpec, Finished  -->
//                           <--  NewSessionTicket*, ChangeCipherSpec, Finished
//
// Resumed handshake:
//
//   ClientHello (session id, ticket*)  -->
//                           <--  ServerHello, NewSessionTicket*,
//                                ChangeCipherSpec, Finished
//   ChangeCipherSpec, Finished  -->

use zeroize::Zeroizing;

use super::Core;
use crate::crypto::{derive_master_secret, key_exchange_params};
use crate::message::{ClientHello, Message, ServerHello, ServerKeyExchange};
use crate::session::{MasterSecret, PeerId, Session, SessionId, Ticket};
use crate::types::{CipherSuite, Cookie, Random};
use crate::Error;

/// States of the connecting role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Begin,
    ClientHelloSent,
    HelloAgain,
    AwaitFirstReply,
    SendCertificate,
    SendKeyExchange,
    SendCertificateVerify,
    SendChangeCipherSpec,
    SendFinished,
    AwaitPeerFinished,
    ResumeAwaitPeerFinished,
    ResumeSendChangeCipherSpec,
    ResumeSendFinished,
    Complete,
}

pub(crate) struct Client {
    random: Random,

    /// Identity of the server, for the peer index.
    peer_id: Option<PeerId>,

    /// Session set through `Connection::set_session`.
    explicit: Option<Session>,

    /// Session offered in the ClientHello.
    offered: Option<Session>,

    /// Session id sent in the ClientHello.
    offered_id: SessionId,

    cookie: Cookie,
    cookie_received: bool,

    server_random: Option<Random>,
    server_session_id: SessionId,
    suite: Option<CipherSuite>,
    expect_ticket: bool,
    expect_status: bool,

    server_kx: Option<ServerKeyExchange>,
    certificate_requested: bool,
    sent_certificate: bool,

    master_secret: Option<MasterSecret>,
    peer_ccs: bool,

    /// Ticket and lifetime hint from NewSessionTicket.
    new_ticket: Option<(Vec<u8>, u32)>,
}

impl Client {
    pub fn new(core: &mut Core) -> Client {
        let random = Random::new(core.now().as_secs(), &mut core.rng);
        Client {
            random,
            peer_id: None,
            explicit: None,
            offered: None,
            offered_id: SessionId::empty(),
            cookie: Cookie::default(),
            cookie_received: false,
            server_random: None,
            server_session_id: SessionId::empty(),
            suite: None,
            expect_ticket: false,
            expect_status: false,
            server_kx: None,
            certificate_requested: false,
            sent_certificate: false,
            master_secret: None,
            peer_ccs: false,
            new_ticket: None,
        }
    }

    pub fn set_peer_id(&mut self, peer_id: PeerId) {
        self.peer_id = Some(peer_id);
    }

    pub fn set_session(&mut self, session: Session) {
        self.explicit = Some(session);
    }

    fn suite(&self) -> Result<CipherSuite, Error> {
        self.suite
            .ok_or_else(|| Error::UnexpectedMessage("No ServerHello yet".into()))
    }

    fn master_secret(&self) -> Result<&MasterSecret, Error> {
        self.master_secret
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("No master secret yet".into()))
    }

    fn server_random(&self) -> Result<Random, Error> {
        self.server_random
            .ok_or_else(|| Error::UnexpectedMessage("No ServerHello yet".into()))
    }

    /// Pick the session to offer: the explicit one, else the one cached for
    /// the remembered server.
    fn choose_session(&mut self, core: &mut Core) -> Result<(), Error> {
        self.offered = None;
        self.offered_id = SessionId::empty();

        let config = core.config();
        if !config.session_cache() {
            return Ok(());
        }

        let now = core.now();
        let candidate = match (&self.explicit, self.peer_id, core.store()) {
            (Some(session), _, _) => Some(session.clone()),
            (None, Some(peer), Some(store)) => store.lookup_by_peer(&peer, now)?,
            _ => None,
        };

        let Some(session) = candidate else {
            debug!("No session to resume");
            return Ok(());
        };

        if session.is_expired(now) {
            debug!("Session {} expired, full handshake", session.session_id());
            return Ok(());
        }
        if !session.context_matches(core.app_context.as_ref()) {
            debug!(
                "Session {} has another app context, full handshake",
                session.session_id()
            );
            return Ok(());
        }
        if session.protocol_version() != config.protocol_version()
            || !config.cipher_suites().contains(&session.cipher_suite())
        {
            debug!(
                "Session {} parameters no longer allowed, full handshake",
                session.session_id()
            );
            return Ok(());
        }

        let id = if !session.session_id().is_empty() {
            session.session_id()
        } else if session.ticket().is_some() {
            // A ticket is resumed by the server echoing an id we pick.
            SessionId::random(&mut core.rng)
        } else {
            debug!("Session has neither id nor ticket");
            return Ok(());
        };

        debug!("Offering session {} for resumption", id);
        self.offered_id = id;
        self.offered = Some(session);
        Ok(())
    }

    fn client_hello(&self, core: &Core) -> Message {
        let config = core.config();

        let session_ticket = if config.session_tickets() && config.session_cache() {
            let ticket = self
                .offered
                .as_ref()
                .and_then(|s| s.ticket())
                .map(|t| t.as_slice().to_vec())
                .unwrap_or_default();
            Some(ticket)
        } else {
            None
        };

        Message::ClientHello(ClientHello {
            version: config.protocol_version(),
            random: self.random,
            session_id: self.offered_id,
            cookie: self.cookie.clone(),
            cipher_suites: config.cipher_suites().to_vec(),
            session_ticket,
            status_request: config.request_certificate_status(),
        })
    }

    fn on_hello_reply(&mut self, core: &mut Core, message: &Message) -> Result<ClientState, Error> {
        match message {
            Message::HelloVerifyRequest { cookie, .. } => {
                if !core.config().datagram() {
                    return Err(Error::UnexpectedMessage(
                        "HelloVerifyRequest outside datagram mode".into(),
                    ));
                }
                if self.cookie_received {
                    return Err(Error::UnexpectedMessage(
                        "Second HelloVerifyRequest".into(),
                    ));
                }
                if cookie.is_empty() {
                    return Err(Error::UnexpectedMessage("Empty cookie".into()));
                }

                debug!("Got cookie, resending ClientHello");
                self.cookie = cookie.clone();
                self.cookie_received = true;
                // The transcript starts over with the second ClientHello.
                core.transcript.clear();

                Ok(ClientState::HelloAgain)
            }
            Message::ServerHello(hello) => self.on_server_hello(core, hello),
            other => Err(Error::UnexpectedMessage(format!(
                "Expected ServerHello, got {:?}",
                other.message_type()
            ))),
        }
    }

    fn on_server_hello(&mut self, core: &mut Core, hello: &ServerHello) -> Result<ClientState, Error> {
        let config = core.config();

        if hello.version != config.protocol_version() {
            return Err(Error::SecurityError(format!(
                "Server selected {}",
                hello.version
            )));
        }
        if !config.cipher_suites().contains(&hello.cipher_suite) {
            return Err(Error::SecurityError(format!(
                "Server selected disallowed cipher suite: {:?}",
                hello.cipher_suite
            )));
        }
        if hello.session_ticket && !(config.session_tickets() && config.session_cache()) {
            return Err(Error::UnexpectedMessage(
                "Server announced a ticket we did not ask for".into(),
            ));
        }
        if hello.status_request && !config.request_certificate_status() {
            return Err(Error::UnexpectedMessage(
                "Server announced a certificate status we did not ask for".into(),
            ));
        }

        self.server_random = Some(hello.random);
        self.server_session_id = hello.session_id;
        self.suite = Some(hello.cipher_suite);
        self.expect_ticket = hello.session_ticket;
        self.expect_status = hello.status_request;

        let resumed = self.offered.is_some()
            && !hello.session_id.is_empty()
            && hello.session_id == self.offered_id;

        if !resumed {
            if let Some(offered) = self.offered.take() {
                debug!(
                    "Server declined session {}, full handshake",
                    offered.session_id()
                );
            }
            return Ok(ClientState::AwaitFirstReply);
        }

        let Some(session) = self.offered.take() else {
            return Err(Error::UnexpectedMessage("No offered session".into()));
        };

        if session.cipher_suite() != hello.cipher_suite {
            return Err(Error::SecurityError(format!(
                "Resumed session uses {:?}, server selected {:?}",
                session.cipher_suite(),
                hello.cipher_suite
            )));
        }

        debug!("Server resumed session {}", self.offered_id);
        self.master_secret = Some(session.master_secret().clone());
        core.resume(session);

        Ok(ClientState::ResumeAwaitPeerFinished)
    }

    /// Server flight from Certificate to ServerHelloDone.
    fn on_first_reply(&mut self, core: &mut Core, message: &Message) -> Result<bool, Error> {
        let have_certificate = !core.peer_certificates.is_empty();

        match message {
            Message::Certificate(chain) if !have_certificate => {
                if chain.is_empty() {
                    return Err(Error::CertificateError(
                        "Server sent no certificate".into(),
                    ));
                }
                core.verify_chain(chain)?;
                core.peer_certificates = chain.clone();
                Ok(false)
            }

            Message::CertificateStatus { response }
                if have_certificate
                    && self.expect_status
                    && core.certificate_status.is_none() =>
            {
                core.certificate_status = Some(response.clone());
                Ok(false)
            }

            Message::ServerKeyExchange(kx) if have_certificate && self.server_kx.is_none() => {
                if self.expect_status && core.certificate_status.is_none() {
                    return Err(Error::UnexpectedMessage(
                        "Missing CertificateStatus".into(),
                    ));
                }

                let params =
                    key_exchange_params(&self.random, &self.server_random()?, kx.group, &kx.public_key);
                core.provider()
                    .signature_verification
                    .verify_signature(&core.peer_certificates[0], &params, &kx.signature, kx.hash)
                    .map_err(|e| {
                        Error::SecurityError(format!("ServerKeyExchange signature: {}", e))
                    })?;

                self.server_kx = Some(kx.clone());
                Ok(false)
            }

            Message::CertificateRequest { .. }
                if self.server_kx.is_some() && !self.certificate_requested =>
            {
                self.certificate_requested = true;
                Ok(false)
            }

            Message::ServerHelloDone if self.server_kx.is_some() => Ok(true),

            other => Err(Error::UnexpectedMessage(format!(
                "{:?} out of order in server flight",
                other.message_type()
            ))),
        }
    }

    /// Optional NewSessionTicket, ChangeCipherSpec and Finished.
    fn on_peer_finished(&mut self, core: &mut Core, message: &Message) -> Result<bool, Error> {
        match message {
            Message::NewSessionTicket {
                lifetime_hint,
                ticket,
            } if self.expect_ticket && !self.peer_ccs && self.new_ticket.is_none() => {
                self.new_ticket = Some((ticket.clone(), *lifetime_hint));
                Ok(false)
            }

            Message::ChangeCipherSpec if !self.peer_ccs => {
                if self.expect_ticket && self.new_ticket.is_none() {
                    return Err(Error::UnexpectedMessage(
                        "Missing NewSessionTicket".into(),
                    ));
                }
                self.peer_ccs = true;
                Ok(false)
            }

            Message::Finished { verify_data } if self.peer_ccs => {
                core.check_finished(self.suite()?, self.master_secret()?, "server finished", verify_data)?;
                Ok(true)
            }

            other => Err(Error::UnexpectedMessage(format!(
                "{:?} while waiting for server Finished",
                other.message_type()
            ))),
        }
    }

    /// Cache the session of a completed full handshake.
    fn complete_full(&mut self, core: &mut Core) -> Result<(), Error> {
        let mut timeout = core.timeout;
        let mut ticket = None;

        if let Some((data, lifetime_hint)) = self.new_ticket.take() {
            if lifetime_hint > 0 {
                timeout = timeout.min(std::time::Duration::from_secs(lifetime_hint as u64));
            }
            if !data.is_empty() {
                ticket = Some(Ticket::from_slice(&data)?);
            }
        }

        let mut session = core.new_session(
            self.server_session_id,
            self.master_secret()?.clone(),
            self.suite()?,
            timeout,
        );
        session.set_peer_id(self.peer_id);
        session.set_ticket(ticket);

        let resumable = !session.session_id().is_empty() || session.ticket().is_some();
        if resumable {
            core.publish(&session);
        }
        core.session = Some(session);

        Ok(())
    }

    /// Replace the ticket of a resumed session with the renewed one.
    fn renew_ticket(&mut self, core: &mut Core) -> Result<(), Error> {
        let Some((data, _)) = self.new_ticket.take() else {
            return Ok(());
        };
        if data.is_empty() {
            return Ok(());
        }

        let ticket = Ticket::from_slice(&data)?;
        let Some(session) = core.session.as_mut() else {
            return Ok(());
        };
        session.set_ticket(Some(ticket));
        let id = session.session_id();

        if id.is_empty() {
            return Ok(());
        }
        if let Some(store) = core.store() {
            match store.update_ticket(&id, &data) {
                Ok(true) => debug!("Renewed ticket of session {}", id),
                Ok(false) => debug!("Session {} no longer cached, ticket not stored", id),
                Err(e) => warn!("Renewed ticket of session {} not stored: {}", id, e),
            }
        }
        Ok(())
    }
}

impl ClientState {
    pub(crate) fn make_progress(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        match self {
            ClientState::Begin => self.begin(client, core),
            ClientState::ClientHelloSent => self.client_hello_sent(client, core),
            ClientState::HelloAgain => self.hello_again(client, core),
            ClientState::AwaitFirstReply => self.await_first_reply(client, core),
            ClientState::SendCertificate => self.send_certificate(client, core),
            ClientState::SendKeyExchange => self.send_key_exchange(client, core),
            ClientState::SendCertificateVerify => self.send_certificate_verify(core),
            ClientState::SendChangeCipherSpec => self.send_change_cipher_spec(core),
            ClientState::SendFinished => self.send_finished(client, core),
            ClientState::AwaitPeerFinished => self.await_peer_finished(client, core),
            ClientState::ResumeAwaitPeerFinished => self.resume_await_peer_finished(client, core),
            ClientState::ResumeSendChangeCipherSpec => self.send_change_cipher_spec(core),
            ClientState::ResumeSendFinished => self.send_finished(client, core),
            ClientState::Complete => Ok(self),
        }
    }

    fn begin(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        client.choose_session(core)?;

        let hello = client.client_hello(core);
        if !core.send(&hello)? {
            return Ok(self);
        }

        Ok(ClientState::ClientHelloSent)
    }

    fn client_hello_sent(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        let mut next = self;
        core.receive_until(|core, message| {
            next = client.on_hello_reply(core, message)?;
            Ok(true)
        })?;
        Ok(next)
    }

    fn hello_again(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        let hello = client.client_hello(core);
        if !core.send(&hello)? {
            return Ok(self);
        }
        Ok(ClientState::ClientHelloSent)
    }

    fn await_first_reply(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        if !core.receive_until(|core, message| client.on_first_reply(core, message))? {
            return Ok(self);
        }

        if client.certificate_requested {
            Ok(ClientState::SendCertificate)
        } else {
            Ok(ClientState::SendKeyExchange)
        }
    }

    fn send_certificate(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        let chain: Vec<Vec<u8>> = core.local_certificate().map(|c| vec![c.to_vec()]).unwrap_or_default();
        let has_certificate = !chain.is_empty();

        if !has_certificate {
            debug!("Certificate requested but none configured, sending empty chain");
        }

        if !core.send(&Message::Certificate(chain))? {
            return Ok(self);
        }

        client.sent_certificate = has_certificate;
        Ok(ClientState::SendKeyExchange)
    }

    fn send_key_exchange(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        let server_kx = client
            .server_kx
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("No ServerKeyExchange".into()))?;

        let provider = core.provider();
        let group = provider
            .kx_groups
            .iter()
            .find(|g| g.name() == server_kx.group)
            .ok_or_else(|| {
                Error::SecurityError(format!("Server chose unsupported group {:?}", server_kx.group))
            })?;

        let kx = group.start_exchange().map_err(Error::CryptoError)?;
        let public_key = kx.pub_key().to_vec();
        let pre_master_secret = Zeroizing::new(
            kx.complete(&server_kx.public_key)
                .map_err(Error::CryptoError)?,
        );

        let suite = client.suite()?;
        let master_secret = derive_master_secret(
            provider,
            suite.hash_algorithm(),
            &pre_master_secret,
            &client.random,
            &client.server_random()?,
        )?;

        if !core.send(&Message::ClientKeyExchange { public_key })? {
            return Ok(self);
        }
        client.master_secret = Some(master_secret);

        if client.sent_certificate {
            Ok(ClientState::SendCertificateVerify)
        } else {
            Ok(ClientState::SendChangeCipherSpec)
        }
    }

    fn send_certificate_verify(self, core: &mut Core) -> Result<Self, Error> {
        let (hash, signature) = core.sign(&core.transcript)?;

        if !core.send(&Message::CertificateVerify { hash, signature })? {
            return Ok(self);
        }
        Ok(ClientState::SendChangeCipherSpec)
    }

    fn send_change_cipher_spec(self, core: &mut Core) -> Result<Self, Error> {
        if !core.send(&Message::ChangeCipherSpec)? {
            return Ok(self);
        }

        match self {
            ClientState::ResumeSendChangeCipherSpec => Ok(ClientState::ResumeSendFinished),
            _ => Ok(ClientState::SendFinished),
        }
    }

    fn send_finished(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        let verify_data =
            core.finished_data(client.suite()?, client.master_secret()?, "client finished")?;

        if !core.send(&Message::Finished { verify_data })? {
            return Ok(self);
        }

        match self {
            ClientState::ResumeSendFinished => Ok(ClientState::Complete),
            _ => Ok(ClientState::AwaitPeerFinished),
        }
    }

    fn await_peer_finished(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        if !core.receive_until(|core, message| client.on_peer_finished(core, message))? {
            return Ok(self);
        }

        client.complete_full(core)?;
        Ok(ClientState::Complete)
    }

    fn resume_await_peer_finished(self, client: &mut Client, core: &mut Core) -> Result<Self, Error> {
        if !core.receive_until(|core, message| client.on_peer_finished(core, message))? {
            return Ok(self);
        }

        client.renew_ticket(core)?;
        Ok(ClientState::ResumeSendChangeCipherSpec)
    }
}
