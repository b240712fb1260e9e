use reprise::certificate::generate_self_signed_certificate;
use reprise::message::{Message, MessageType};
use reprise::record::{memory, RecordLayer};
use reprise::{Cookie, Error, HandshakeState, ProtocolVersion, ServerState};

use crate::common::*;

#[test]
fn datagram_handshake_exchanges_cookie() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).datagram(true), &cert);
    let client_ctx = client_context(builder(&clock).datagram(true));

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.drive().unwrap();
    pair.server.drive().unwrap();

    // No state kept until the client echoes the cookie.
    assert_eq!(
        pair.server.state(),
        HandshakeState::Accepting(ServerState::Begin)
    );
    assert_eq!(
        pair.server_probe.sent(),
        vec![MessageType::HelloVerifyRequest]
    );

    pair.complete();

    assert_eq!(
        pair.client_probe.sent()[..2],
        [MessageType::ClientHello, MessageType::ClientHello]
    );
    assert_eq!(
        pair.client.session().unwrap().protocol_version(),
        ProtocolVersion::DTLS1_2
    );
    assert_eq!(
        pair.client.session().unwrap().master_secret(),
        pair.server.session().unwrap().master_secret()
    );
}

#[test]
fn datagram_resumption_still_needs_cookie() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).datagram(true), &cert);
    let client_ctx = client_context(builder(&clock).datagram(true));

    handshake(&client_ctx, &server_ctx);
    let second = handshake(&client_ctx, &server_ctx);

    assert!(second.client.is_resumed());
    assert_eq!(
        second.server_probe.sent()[0],
        MessageType::HelloVerifyRequest
    );
}

#[test]
fn stream_client_rejects_hello_verify_request() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).datagram(true), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    let (client_err, _) = pair.fail();

    assert!(matches!(client_err, Some(Error::UnexpectedMessage(_))));
}

#[test]
fn second_hello_verify_request_is_rejected() {
    init();
    let clock = clock();
    let client_ctx = client_context(builder(&clock).datagram(true));

    let ((a, _), (mut peer, _)) = memory::pair();
    let mut client = client_ctx.connect(a);

    let hvr = Message::HelloVerifyRequest {
        version: ProtocolVersion::DTLS1_2,
        cookie: Cookie::try_new(&[5; 32]).unwrap(),
    };

    client.drive().unwrap();
    assert!(matches!(peer.receive(), Ok(Message::ClientHello(_))));
    peer.send_handshake_message(&hvr).unwrap();
    peer.flush().unwrap();

    client.drive().unwrap();
    match peer.receive() {
        Ok(Message::ClientHello(hello)) => assert_eq!(hello.cookie.as_slice(), &[5; 32]),
        other => panic!("Expected ClientHello with cookie, got {:?}", other),
    }
    peer.send_handshake_message(&hvr).unwrap();
    peer.flush().unwrap();

    assert!(matches!(client.drive(), Err(Error::UnexpectedMessage(_))));
}
