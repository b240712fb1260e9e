// Accepting role.
//
// Full handshake:
//
//                        <--  ClientHello
//   HelloVerifyRequest   -->                  (datagram, without valid cookie)
//                        <--  ClientHello + cookie
//   ServerHello, Certificate, CertificateStatus*, ServerKeyExchange,
//   CertificateRequest*, ServerHelloDone  -->
//                        <--  Certificate*, ClientKeyExchange,
//                             CertificateVerify*, ChangeCipherSpec, Finished
//   NewSessionTicket*, ChangeCipherSpec, Finished  -->
//
// Resumed handshake:
//
//                        <--  ClientHello (session id, ticket*)
//   ServerHello, NewSessionTicket*, ChangeCipherSpec, Finished  -->
//                        <--  ChangeCipherSpec, Finished

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::Core;
use crate::crypto::{derive_master_secret, key_exchange_params, ActiveKeyExchange};
use crate::message::{ClientHello, Message, ServerHello, ServerKeyExchange};
use crate::session::{MasterSecret, Session, SessionId};
use crate::types::{CipherSuite, Cookie, Random};
use crate::Error;

/// Certificate type `ecdsa_sign`.
const ECDSA_SIGN: u8 = 64;

/// States of the accepting role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Begin,
    SendHelloVerifyRequest,
    ClientHelloReceived,
    SendServerHello,
    SendCertificate,
    SendCertificateStatus,
    SendServerKeyExchange,
    SendCertificateRequest,
    SendServerHelloDone,
    AwaitClientReply,
    SendSessionTicket,
    SendChangeCipherSpec,
    SendFinished,
    ResumeSendSessionTicket,
    ResumeSendChangeCipherSpec,
    ResumeSendFinished,
    ResumeAwaitPeerFinished,
    Complete,
}

pub(crate) struct Server {
    random: Random,
    client_hello: Option<ClientHello>,

    suite: Option<CipherSuite>,
    session_id: SessionId,
    resumed_by_ticket: bool,
    issue_ticket: bool,
    staple: bool,

    kx: Option<Box<dyn ActiveKeyExchange>>,
    certificate_requested: bool,
    client_chain: Option<Vec<Vec<u8>>>,
    client_verified: bool,

    master_secret: Option<MasterSecret>,
    peer_ccs: bool,
}

impl Server {
    pub fn new(core: &mut Core) -> Server {
        let random = Random::new(core.now().as_secs(), &mut core.rng);
        Server {
            random,
            client_hello: None,
            suite: None,
            session_id: SessionId::empty(),
            resumed_by_ticket: false,
            issue_ticket: false,
            staple: false,
            kx: None,
            certificate_requested: false,
            client_chain: None,
            client_verified: false,
            master_secret: None,
            peer_ccs: false,
        }
    }

    fn client_hello(&self) -> Result<&ClientHello, Error> {
        self.client_hello
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("No ClientHello yet".into()))
    }

    fn suite(&self) -> Result<CipherSuite, Error> {
        self.suite
            .ok_or_else(|| Error::UnexpectedMessage("No cipher suite selected".into()))
    }

    fn master_secret(&self) -> Result<&MasterSecret, Error> {
        self.master_secret
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("No master secret yet".into()))
    }

    fn expected_cookie(core: &Core, client_random: &Random) -> Result<Cookie, Error> {
        let mac = core
            .provider()
            .hmac_provider
            .hmac_sha256(core.ctx.cookie_secret(), client_random.as_bytes())
            .map_err(Error::CryptoError)?;
        Cookie::try_new(&mac).map_err(Error::CryptoError)
    }

    fn cookie_is_valid(core: &Core, hello: &ClientHello) -> Result<bool, Error> {
        if hello.cookie.is_empty() {
            return Ok(false);
        }
        let expected = Self::expected_cookie(core, &hello.random)?;
        Ok(bool::from(
            expected.as_slice().ct_eq(hello.cookie.as_slice()),
        ))
    }

    /// Whether a cached session may be resumed by this ClientHello.
    fn usable(core: &Core, hello: &ClientHello, session: &Session) -> bool {
        let now = core.now();
        let config = core.config();

        if session.is_expired(now) {
            debug!("Session {} expired", session.session_id());
            return false;
        }
        if !session.context_matches(core.app_context.as_ref()) {
            debug!("Session {} has another app context", session.session_id());
            return false;
        }
        if session.protocol_version() != config.protocol_version() {
            debug!("Session {} is for {}", session.session_id(), session.protocol_version());
            return false;
        }
        let suite = session.cipher_suite();
        if !hello.cipher_suites.contains(&suite) || !config.cipher_suites().contains(&suite) {
            debug!("Session {} cipher suite {:?} not on offer", session.session_id(), suite);
            return false;
        }
        true
    }

    /// Look for a session to resume: the ticket first, then the session id.
    fn find_session(&mut self, core: &Core, hello: &ClientHello) -> Result<Option<Session>, Error> {
        let config = core.config();
        if !config.session_cache() || hello.session_id.is_empty() {
            return Ok(None);
        }

        if config.session_tickets() {
            if let Some(ticket) = hello.session_ticket.as_deref().filter(|t| !t.is_empty()) {
                match core.ctx.ticket_key().open(core.provider(), ticket) {
                    Some(session) if Self::usable(core, hello, &session) => {
                        debug!("Resuming {} from ticket", session.session_id());
                        self.resumed_by_ticket = true;
                        return Ok(Some(session));
                    }
                    Some(_) => {}
                    None => debug!("Ticket did not open"),
                }
            }
        }

        let Some(store) = core.store() else {
            return Ok(None);
        };
        match store.lookup_by_id(&hello.session_id, core.now())? {
            Some(session) if Self::usable(core, hello, &session) => {
                debug!("Resuming {} from cache", session.session_id());
                Ok(Some(session))
            }
            Some(_) => Ok(None),
            None => {
                debug!("Session {} not cached", hello.session_id);
                Ok(None)
            }
        }
    }

    /// Client flight from Certificate to Finished.
    fn on_client_reply(&mut self, core: &mut Core, message: &Message) -> Result<bool, Error> {
        let have_chain = !self.certificate_requested || self.client_chain.is_some();
        let client_auth = !core.peer_certificates.is_empty();

        match message {
            Message::Certificate(chain) if self.certificate_requested && self.client_chain.is_none() => {
                if chain.is_empty() {
                    if core.config().require_client_certificate() {
                        return Err(Error::CertificateError(
                            "Client sent no certificate".into(),
                        ));
                    }
                } else {
                    core.verify_chain(chain)?;
                    core.peer_certificates = chain.clone();
                }
                self.client_chain = Some(chain.clone());
                Ok(false)
            }

            Message::ClientKeyExchange { public_key } if have_chain && self.master_secret.is_none() => {
                let kx = self
                    .kx
                    .take()
                    .ok_or_else(|| Error::UnexpectedMessage("No key exchange in progress".into()))?;
                let pre_master_secret =
                    Zeroizing::new(kx.complete(public_key).map_err(Error::CryptoError)?);

                let hello = self.client_hello()?;
                let master_secret = derive_master_secret(
                    core.provider(),
                    self.suite()?.hash_algorithm(),
                    &pre_master_secret,
                    &hello.random,
                    &self.random,
                )?;
                self.master_secret = Some(master_secret);
                Ok(false)
            }

            Message::CertificateVerify { hash, signature }
                if self.master_secret.is_some() && client_auth && !self.client_verified =>
            {
                core.provider()
                    .signature_verification
                    .verify_signature(&core.peer_certificates[0], &core.transcript, signature, *hash)
                    .map_err(|e| Error::SecurityError(format!("CertificateVerify: {}", e)))?;
                self.client_verified = true;
                Ok(false)
            }

            Message::ChangeCipherSpec
                if self.master_secret.is_some()
                    && (!client_auth || self.client_verified)
                    && !self.peer_ccs =>
            {
                self.peer_ccs = true;
                Ok(false)
            }

            Message::Finished { verify_data } if self.peer_ccs => {
                core.check_finished(self.suite()?, self.master_secret()?, "client finished", verify_data)?;
                Ok(true)
            }

            other => Err(Error::UnexpectedMessage(format!(
                "{:?} out of order in client flight",
                other.message_type()
            ))),
        }
    }

    /// ChangeCipherSpec and Finished closing a resumed handshake.
    fn on_resume_finished(&mut self, core: &mut Core, message: &Message) -> Result<bool, Error> {
        match message {
            Message::ChangeCipherSpec if !self.peer_ccs => {
                self.peer_ccs = true;
                Ok(false)
            }
            Message::Finished { verify_data } if self.peer_ccs => {
                core.check_finished(self.suite()?, self.master_secret()?, "client finished", verify_data)?;
                Ok(true)
            }
            other => Err(Error::UnexpectedMessage(format!(
                "{:?} while waiting for client Finished",
                other.message_type()
            ))),
        }
    }

    /// NewSessionTicket sealing the current session.
    fn session_ticket(&self, core: &Core) -> Result<Message, Error> {
        let session = core
            .session
            .as_ref()
            .ok_or_else(|| Error::UnexpectedMessage("No session to issue a ticket for".into()))?;

        let ticket = core.ctx.ticket_key().seal(core.provider(), session)?;
        let remaining = session
            .expires_at()
            .as_secs()
            .saturating_sub(core.now().as_secs());

        Ok(Message::NewSessionTicket {
            lifetime_hint: remaining.min(u32::MAX as u64) as u32,
            ticket,
        })
    }
}

impl ServerState {
    pub(crate) fn make_progress(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        match self {
            ServerState::Begin => self.begin(server, core),
            ServerState::SendHelloVerifyRequest => self.send_hello_verify_request(server, core),
            ServerState::ClientHelloReceived => self.client_hello_received(server, core),
            ServerState::SendServerHello => self.send_server_hello(server, core),
            ServerState::SendCertificate => self.send_certificate(core),
            ServerState::SendCertificateStatus => self.send_certificate_status(server, core),
            ServerState::SendServerKeyExchange => self.send_server_key_exchange(server, core),
            ServerState::SendCertificateRequest => self.send_certificate_request(server, core),
            ServerState::SendServerHelloDone => self.send_server_hello_done(core),
            ServerState::AwaitClientReply => self.await_client_reply(server, core),
            ServerState::SendSessionTicket => self.send_session_ticket(server, core),
            ServerState::SendChangeCipherSpec => self.send_change_cipher_spec(core),
            ServerState::SendFinished => self.send_finished(server, core),
            ServerState::ResumeSendSessionTicket => self.send_session_ticket(server, core),
            ServerState::ResumeSendChangeCipherSpec => self.send_change_cipher_spec(core),
            ServerState::ResumeSendFinished => self.send_finished(server, core),
            ServerState::ResumeAwaitPeerFinished => self.resume_await_peer_finished(server, core),
            ServerState::Complete => Ok(self),
        }
    }

    fn begin(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        let received = core.receive_until(|_, message| match message {
            Message::ClientHello(hello) => {
                server.client_hello = Some(hello.clone());
                Ok(true)
            }
            other => Err(Error::UnexpectedMessage(format!(
                "Expected ClientHello, got {:?}",
                other.message_type()
            ))),
        })?;

        if !received {
            return Ok(self);
        }

        if core.config().datagram() && !Server::cookie_is_valid(core, server.client_hello()?)? {
            debug!("ClientHello without valid cookie");
            return Ok(ServerState::SendHelloVerifyRequest);
        }

        Ok(ServerState::ClientHelloReceived)
    }

    fn send_hello_verify_request(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        let cookie = Server::expected_cookie(core, &server.client_hello()?.random)?;
        let message = Message::HelloVerifyRequest {
            version: core.protocol_version(),
            cookie,
        };
        if !core.send(&message)? {
            return Ok(self);
        }

        // No state is kept for a client that has not proven its address.
        core.transcript.clear();
        server.client_hello = None;

        Ok(ServerState::Begin)
    }

    fn client_hello_received(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        let hello = server.client_hello()?.clone();
        let config = core.config();

        if hello.version != config.protocol_version() {
            return Err(Error::SecurityError(format!(
                "Client offered {}, expected {}",
                hello.version,
                config.protocol_version()
            )));
        }

        let suite = config
            .cipher_suites()
            .iter()
            .copied()
            .find(|s| hello.cipher_suites.contains(s))
            .ok_or_else(|| Error::SecurityError("No shared cipher suite".into()))?;
        server.suite = Some(suite);

        if let Some(session) = server.find_session(core, &hello)? {
            server.suite = Some(session.cipher_suite());
            server.session_id = hello.session_id;
            server.master_secret = Some(session.master_secret().clone());
            server.issue_ticket = server.resumed_by_ticket;
            core.resume(session);
            return Ok(ServerState::SendServerHello);
        }

        let config = core.config();
        server.issue_ticket =
            config.session_tickets() && config.session_cache() && hello.session_ticket.is_some();
        server.staple = hello.status_request && config.stapled_certificate_status().is_some();
        server.certificate_requested = config.require_client_certificate();
        server.session_id = if config.session_cache() {
            SessionId::random(&mut core.rng)
        } else {
            SessionId::empty()
        };

        Ok(ServerState::SendServerHello)
    }

    fn send_server_hello(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        let message = Message::ServerHello(ServerHello {
            version: core.protocol_version(),
            random: server.random,
            session_id: server.session_id,
            cipher_suite: server.suite()?,
            session_ticket: server.issue_ticket,
            status_request: server.staple,
        });
        if !core.send(&message)? {
            return Ok(self);
        }

        if !core.resumed {
            Ok(ServerState::SendCertificate)
        } else if server.issue_ticket {
            Ok(ServerState::ResumeSendSessionTicket)
        } else {
            Ok(ServerState::ResumeSendChangeCipherSpec)
        }
    }

    fn send_certificate(self, core: &mut Core) -> Result<Self, Error> {
        let certificate = core
            .local_certificate()
            .ok_or_else(|| Error::ConfigError("No certificate".into()))?
            .to_vec();

        if !core.send(&Message::Certificate(vec![certificate]))? {
            return Ok(self);
        }
        Ok(ServerState::SendCertificateStatus)
    }

    fn send_certificate_status(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        if !server.staple {
            return Ok(ServerState::SendServerKeyExchange);
        }

        let response = core
            .config()
            .stapled_certificate_status()
            .unwrap_or_default()
            .to_vec();

        if !core.send(&Message::CertificateStatus { response })? {
            return Ok(self);
        }
        Ok(ServerState::SendServerKeyExchange)
    }

    fn send_server_key_exchange(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        let group = core
            .provider()
            .kx_groups
            .first()
            .ok_or_else(|| Error::ConfigError("No key exchange group".into()))?;

        let kx = group.start_exchange().map_err(Error::CryptoError)?;
        let public_key = kx.pub_key().to_vec();

        let client_random = server.client_hello()?.random;
        let params = key_exchange_params(&client_random, &server.random, kx.group(), &public_key);
        let (hash, signature) = core.sign(&params)?;

        let message = Message::ServerKeyExchange(ServerKeyExchange {
            group: kx.group(),
            public_key,
            hash,
            signature,
        });
        if !core.send(&message)? {
            return Ok(self);
        }

        server.kx = Some(kx);
        Ok(ServerState::SendCertificateRequest)
    }

    fn send_certificate_request(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        if !server.certificate_requested {
            return Ok(ServerState::SendServerHelloDone);
        }

        let message = Message::CertificateRequest {
            certificate_types: vec![ECDSA_SIGN],
        };
        if !core.send(&message)? {
            return Ok(self);
        }
        Ok(ServerState::SendServerHelloDone)
    }

    fn send_server_hello_done(self, core: &mut Core) -> Result<Self, Error> {
        if !core.send(&Message::ServerHelloDone)? {
            return Ok(self);
        }
        Ok(ServerState::AwaitClientReply)
    }

    fn await_client_reply(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        if !core.receive_until(|core, message| server.on_client_reply(core, message))? {
            return Ok(self);
        }

        let session = core.new_session(
            server.session_id,
            server.master_secret()?.clone(),
            server.suite()?,
            core.timeout,
        );
        core.session = Some(session);

        if server.issue_ticket {
            Ok(ServerState::SendSessionTicket)
        } else {
            Ok(ServerState::SendChangeCipherSpec)
        }
    }

    fn send_session_ticket(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        let message = server.session_ticket(core)?;
        if !core.send(&message)? {
            return Ok(self);
        }

        match self {
            ServerState::ResumeSendSessionTicket => Ok(ServerState::ResumeSendChangeCipherSpec),
            _ => Ok(ServerState::SendChangeCipherSpec),
        }
    }

    fn send_change_cipher_spec(self, core: &mut Core) -> Result<Self, Error> {
        if !core.send(&Message::ChangeCipherSpec)? {
            return Ok(self);
        }

        match self {
            ServerState::ResumeSendChangeCipherSpec => Ok(ServerState::ResumeSendFinished),
            _ => Ok(ServerState::SendFinished),
        }
    }

    fn send_finished(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        let verify_data =
            core.finished_data(server.suite()?, server.master_secret()?, "server finished")?;

        if !core.send(&Message::Finished { verify_data })? {
            return Ok(self);
        }

        if self == ServerState::ResumeSendFinished {
            return Ok(ServerState::ResumeAwaitPeerFinished);
        }

        if let Some(session) = &core.session {
            if !session.session_id().is_empty() {
                core.publish(session);
            }
        }
        Ok(ServerState::Complete)
    }

    fn resume_await_peer_finished(self, server: &mut Server, core: &mut Core) -> Result<Self, Error> {
        if !core.receive_until(|core, message| server.on_resume_finished(core, message))? {
            return Ok(self);
        }
        Ok(ServerState::Complete)
    }
}
