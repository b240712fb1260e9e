//! Handshake messages and their canonical framing.
//!
//! Every message is framed as `msg_type u8 | length u24 | body`. The framing
//! is what the transcript hashes, and what the in-process record layer carries.
//! It mirrors the TLS 1.2 field layout but is not meant to interoperate with
//! other TLS implementations.

use nom::bytes::complete::take;
use nom::combinator::all_consuming;
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::many0;
use nom::number::complete::{be_u16, be_u24, be_u32, be_u8};
use nom::{Err, IResult};

use crate::session::SessionId;
use crate::types::{CipherSuite, Cookie, HashAlgorithm, NamedGroup, ProtocolVersion, Random};
use crate::Error;

/// Largest body the framing can express.
pub const MAX_BODY_LEN: usize = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    NewSessionTicket,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    CertificateStatus,
    ChangeCipherSpec,
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            3 => MessageType::HelloVerifyRequest,
            4 => MessageType::NewSessionTicket,
            11 => MessageType::Certificate,
            12 => MessageType::ServerKeyExchange,
            13 => MessageType::CertificateRequest,
            14 => MessageType::ServerHelloDone,
            15 => MessageType::CertificateVerify,
            16 => MessageType::ClientKeyExchange,
            20 => MessageType::Finished,
            22 => MessageType::CertificateStatus,
            // Not a handshake message in TLS; carried in the same framing here.
            254 => MessageType::ChangeCipherSpec,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::NewSessionTicket => 4,
            MessageType::Certificate => 11,
            MessageType::ServerKeyExchange => 12,
            MessageType::CertificateRequest => 13,
            MessageType::ServerHelloDone => 14,
            MessageType::CertificateVerify => 15,
            MessageType::ClientKeyExchange => 16,
            MessageType::Finished => 20,
            MessageType::CertificateStatus => 22,
            MessageType::ChangeCipherSpec => 254,
            MessageType::Unknown(value) => *value,
        }
    }

    /// Whether the message is hashed into the handshake transcript.
    pub fn is_transcribed(&self) -> bool {
        !matches!(
            self,
            MessageType::HelloVerifyRequest | MessageType::ChangeCipherSpec
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    pub cipher_suites: Vec<CipherSuite>,
    /// `None`: tickets not supported. `Some(empty)`: supported, none to offer.
    pub session_ticket: Option<Vec<u8>>,
    pub status_request: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    /// The server will send a NewSessionTicket.
    pub session_ticket: bool,
    /// The server will send a CertificateStatus.
    pub status_request: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub group: NamedGroup,
    pub public_key: Vec<u8>,
    pub hash: HashAlgorithm,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    HelloVerifyRequest {
        version: ProtocolVersion,
        cookie: Cookie,
    },
    NewSessionTicket {
        lifetime_hint: u32,
        ticket: Vec<u8>,
    },
    /// DER certificates, leaf first.
    Certificate(Vec<Vec<u8>>),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest {
        certificate_types: Vec<u8>,
    },
    ServerHelloDone,
    CertificateVerify {
        hash: HashAlgorithm,
        signature: Vec<u8>,
    },
    ClientKeyExchange {
        public_key: Vec<u8>,
    },
    Finished {
        verify_data: [u8; 12],
    },
    CertificateStatus {
        response: Vec<u8>,
    },
    ChangeCipherSpec,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ClientHello(_) => MessageType::ClientHello,
            Message::ServerHello(_) => MessageType::ServerHello,
            Message::HelloVerifyRequest { .. } => MessageType::HelloVerifyRequest,
            Message::NewSessionTicket { .. } => MessageType::NewSessionTicket,
            Message::Certificate(_) => MessageType::Certificate,
            Message::ServerKeyExchange(_) => MessageType::ServerKeyExchange,
            Message::CertificateRequest { .. } => MessageType::CertificateRequest,
            Message::ServerHelloDone => MessageType::ServerHelloDone,
            Message::CertificateVerify { .. } => MessageType::CertificateVerify,
            Message::ClientKeyExchange { .. } => MessageType::ClientKeyExchange,
            Message::Finished { .. } => MessageType::Finished,
            Message::CertificateStatus { .. } => MessageType::CertificateStatus,
            Message::ChangeCipherSpec => MessageType::ChangeCipherSpec,
        }
    }

    /// Framed bytes: `msg_type u8 | length u24 | body`.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        self.serialize_body(&mut body)?;

        if body.len() > MAX_BODY_LEN {
            return Err(Error::InvalidInput(format!(
                "{:?} body too long: {}",
                self.message_type(),
                body.len()
            )));
        }

        let mut out = Vec::with_capacity(4 + body.len());
        out.push(self.message_type().as_u8());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse exactly one framed message.
    pub fn decode(input: &[u8]) -> Result<Message, Error> {
        all_consuming(Message::parse)(input)
            .map(|(_, m)| m)
            .map_err(|e| Error::UnexpectedMessage(format!("Malformed message: {:?}", e)))
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Message> {
        let (input, msg_type) = be_u8(input)?;
        let (input, length) = be_u24(input)?;
        let (input, body) = take(length as usize)(input)?;

        let msg_type = MessageType::from_u8(msg_type);
        let (_, message) = all_consuming(|b| Self::parse_body(msg_type, b))(body)?;

        Ok((input, message))
    }

    fn parse_body(msg_type: MessageType, input: &[u8]) -> IResult<&[u8], Message> {
        match msg_type {
            MessageType::ClientHello => {
                let (input, version) = ProtocolVersion::parse(input)?;
                let (input, random) = Random::parse(input)?;
                let (input, session_id) = SessionId::parse(input)?;
                let (input, cookie) = Cookie::parse(input)?;
                let (input, suites_len) = be_u16(input)?;
                let (input, suites) = take(suites_len as usize)(input)?;
                let (_, cipher_suites) = all_consuming(many0(CipherSuite::parse))(suites)?;
                let (input, has_ticket) = flag(input)?;
                let (input, ticket) = vec_u16(input)?;
                let (input, status_request) = flag(input)?;

                Ok((
                    input,
                    Message::ClientHello(ClientHello {
                        version,
                        random,
                        session_id,
                        cookie,
                        cipher_suites,
                        session_ticket: has_ticket.then_some(ticket),
                        status_request,
                    }),
                ))
            }
            MessageType::ServerHello => {
                let (input, version) = ProtocolVersion::parse(input)?;
                let (input, random) = Random::parse(input)?;
                let (input, session_id) = SessionId::parse(input)?;
                let (input, cipher_suite) = CipherSuite::parse(input)?;
                let (input, session_ticket) = flag(input)?;
                let (input, status_request) = flag(input)?;

                Ok((
                    input,
                    Message::ServerHello(ServerHello {
                        version,
                        random,
                        session_id,
                        cipher_suite,
                        session_ticket,
                        status_request,
                    }),
                ))
            }
            MessageType::HelloVerifyRequest => {
                let (input, version) = ProtocolVersion::parse(input)?;
                let (input, cookie) = Cookie::parse(input)?;
                Ok((input, Message::HelloVerifyRequest { version, cookie }))
            }
            MessageType::NewSessionTicket => {
                let (input, lifetime_hint) = be_u32(input)?;
                let (input, ticket) = vec_u16(input)?;
                Ok((
                    input,
                    Message::NewSessionTicket {
                        lifetime_hint,
                        ticket,
                    },
                ))
            }
            MessageType::Certificate => {
                let (input, total) = be_u24(input)?;
                let (input, certs) = take(total as usize)(input)?;
                let (_, chain) = all_consuming(many0(vec_u24))(certs)?;
                Ok((input, Message::Certificate(chain)))
            }
            MessageType::ServerKeyExchange => {
                let (input, group) = NamedGroup::parse(input)?;
                let (input, public_key) = vec_u8(input)?;
                let (input, hash) = HashAlgorithm::parse(input)?;
                let (input, signature) = vec_u16(input)?;
                Ok((
                    input,
                    Message::ServerKeyExchange(ServerKeyExchange {
                        group,
                        public_key,
                        hash,
                        signature,
                    }),
                ))
            }
            MessageType::CertificateRequest => {
                let (input, certificate_types) = vec_u8(input)?;
                Ok((input, Message::CertificateRequest { certificate_types }))
            }
            MessageType::ServerHelloDone => Ok((input, Message::ServerHelloDone)),
            MessageType::CertificateVerify => {
                let (input, hash) = HashAlgorithm::parse(input)?;
                let (input, signature) = vec_u16(input)?;
                Ok((input, Message::CertificateVerify { hash, signature }))
            }
            MessageType::ClientKeyExchange => {
                let (input, public_key) = vec_u8(input)?;
                Ok((input, Message::ClientKeyExchange { public_key }))
            }
            MessageType::Finished => {
                let (input, data) = take(12_usize)(input)?;
                let mut verify_data = [0u8; 12];
                verify_data.copy_from_slice(data);
                Ok((input, Message::Finished { verify_data }))
            }
            MessageType::CertificateStatus => {
                let (input, response) = vec_u24(input)?;
                Ok((input, Message::CertificateStatus { response }))
            }
            MessageType::ChangeCipherSpec => Ok((input, Message::ChangeCipherSpec)),
            MessageType::Unknown(_) => Err(Err::Failure(NomError::new(input, ErrorKind::Tag))),
        }
    }

    fn serialize_body(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            Message::ClientHello(ch) => {
                ch.version.serialize(out);
                ch.random.serialize(out);
                ch.session_id.serialize(out);
                ch.cookie.serialize(out);
                put_u16_len(out, ch.cipher_suites.len() * 2)?;
                for suite in &ch.cipher_suites {
                    suite.serialize(out);
                }
                out.push(ch.session_ticket.is_some() as u8);
                put_vec_u16(out, ch.session_ticket.as_deref().unwrap_or(&[]))?;
                out.push(ch.status_request as u8);
            }
            Message::ServerHello(sh) => {
                sh.version.serialize(out);
                sh.random.serialize(out);
                sh.session_id.serialize(out);
                sh.cipher_suite.serialize(out);
                out.push(sh.session_ticket as u8);
                out.push(sh.status_request as u8);
            }
            Message::HelloVerifyRequest { version, cookie } => {
                version.serialize(out);
                cookie.serialize(out);
            }
            Message::NewSessionTicket {
                lifetime_hint,
                ticket,
            } => {
                out.extend_from_slice(&lifetime_hint.to_be_bytes());
                put_vec_u16(out, ticket)?;
            }
            Message::Certificate(chain) => {
                let total: usize = chain.iter().map(|c| 3 + c.len()).sum();
                put_u24_len(out, total)?;
                for cert in chain {
                    put_vec_u24(out, cert)?;
                }
            }
            Message::ServerKeyExchange(ske) => {
                out.extend_from_slice(&ske.group.as_u16().to_be_bytes());
                put_vec_u8(out, &ske.public_key)?;
                out.push(ske.hash.as_u8());
                put_vec_u16(out, &ske.signature)?;
            }
            Message::CertificateRequest { certificate_types } => {
                put_vec_u8(out, certificate_types)?;
            }
            Message::ServerHelloDone | Message::ChangeCipherSpec => {}
            Message::CertificateVerify { hash, signature } => {
                out.push(hash.as_u8());
                put_vec_u16(out, signature)?;
            }
            Message::ClientKeyExchange { public_key } => put_vec_u8(out, public_key)?,
            Message::Finished { verify_data } => out.extend_from_slice(verify_data),
            Message::CertificateStatus { response } => put_vec_u24(out, response)?,
        }
        Ok(())
    }
}

fn flag(input: &[u8]) -> IResult<&[u8], bool> {
    let (rest, v) = be_u8(input)?;
    match v {
        0 => Ok((rest, false)),
        1 => Ok((rest, true)),
        _ => Err(Err::Failure(NomError::new(input, ErrorKind::Verify))),
    }
}

fn vec_u8(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, len) = be_u8(input)?;
    let (input, data) = take(len as usize)(input)?;
    Ok((input, data.to_vec()))
}

fn vec_u16(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, len) = be_u16(input)?;
    let (input, data) = take(len as usize)(input)?;
    Ok((input, data.to_vec()))
}

fn vec_u24(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, len) = be_u24(input)?;
    let (input, data) = take(len as usize)(input)?;
    Ok((input, data.to_vec()))
}

fn too_long(len: usize) -> Error {
    Error::InvalidInput(format!("Field too long: {}", len))
}

fn put_vec_u8(out: &mut Vec<u8>, data: &[u8]) -> Result<(), Error> {
    let len = u8::try_from(data.len()).map_err(|_| too_long(data.len()))?;
    out.push(len);
    out.extend_from_slice(data);
    Ok(())
}

fn put_u16_len(out: &mut Vec<u8>, len: usize) -> Result<(), Error> {
    let len = u16::try_from(len).map_err(|_| too_long(len))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_vec_u16(out: &mut Vec<u8>, data: &[u8]) -> Result<(), Error> {
    put_u16_len(out, data.len())?;
    out.extend_from_slice(data);
    Ok(())
}

fn put_u24_len(out: &mut Vec<u8>, len: usize) -> Result<(), Error> {
    if len > MAX_BODY_LEN {
        return Err(too_long(len));
    }
    out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    Ok(())
}

fn put_vec_u24(out: &mut Vec<u8>, data: &[u8]) -> Result<(), Error> {
    put_u24_len(out, data.len())?;
    out.extend_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRng;

    fn client_hello() -> Message {
        let mut rng = SeededRng::new(Some(1));
        Message::ClientHello(ClientHello {
            version: ProtocolVersion::DTLS1_2,
            random: Random::new(10, &mut rng),
            session_id: SessionId::try_new(&[3; 32]).unwrap(),
            cookie: Cookie::try_new(&[9; 32]).unwrap(),
            cipher_suites: CipherSuite::supported().to_vec(),
            session_ticket: Some(vec![1, 2, 3]),
            status_request: true,
        })
    }

    #[test]
    fn client_hello_framing() {
        let m = client_hello();
        let bytes = m.encode().unwrap();
        assert_eq!(bytes[0], 1);

        let len = u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);

        assert_eq!(Message::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn ticket_offer_distinguishes_absent_from_empty() {
        let Message::ClientHello(mut ch) = client_hello() else {
            unreachable!()
        };

        ch.session_ticket = Some(vec![]);
        let bytes = Message::ClientHello(ch.clone()).encode().unwrap();
        let Message::ClientHello(parsed) = Message::decode(&bytes).unwrap() else {
            panic!("wrong type")
        };
        assert_eq!(parsed.session_ticket, Some(vec![]));

        ch.session_ticket = None;
        let bytes = Message::ClientHello(ch).encode().unwrap();
        let Message::ClientHello(parsed) = Message::decode(&bytes).unwrap() else {
            panic!("wrong type")
        };
        assert_eq!(parsed.session_ticket, None);
    }

    #[test]
    fn certificate_chain_framing() {
        let m = Message::Certificate(vec![vec![1; 300], vec![2; 5]]);
        assert_eq!(Message::decode(&m.encode().unwrap()).unwrap(), m);
    }

    #[test]
    fn rejects_trailing_body_bytes() {
        let mut bytes = Message::ServerHelloDone.encode().unwrap();
        bytes[3] = 1;
        bytes.push(0);
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Message::decode(&[99, 0, 0, 0]).is_err());
    }

    #[test]
    fn rejects_bad_flag() {
        let mut bytes = Message::ServerHello(ServerHello {
            version: ProtocolVersion::TLS1_2,
            random: Random::new(0, &mut SeededRng::new(Some(2))),
            session_id: SessionId::empty(),
            cipher_suite: CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
            session_ticket: false,
            status_request: false,
        })
        .encode()
        .unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 7;
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn transcript_membership() {
        assert!(!MessageType::HelloVerifyRequest.is_transcribed());
        assert!(!MessageType::ChangeCipherSpec.is_transcribed());
        assert!(MessageType::Finished.is_transcribed());
    }

    #[test]
    fn oversized_field_is_rejected() {
        let m = Message::ClientKeyExchange {
            public_key: vec![0; 300],
        };
        assert!(matches!(m.encode(), Err(Error::InvalidInput(_))));
    }
}
