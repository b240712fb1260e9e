use reprise::certificate::generate_self_signed_certificate;
use reprise::message::MessageType;
use reprise::record::memory::{self, Probe};
use reprise::{ClientState, Error, HandshakeState, Progress, ServerState};

use crate::common::*;

#[test]
fn blocked_transport_never_advances() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client_probe.set_blocked(true);

    for _ in 0..100 {
        assert_eq!(pair.client.drive(), Ok(Progress::WouldBlock));
        assert_eq!(pair.server.drive(), Ok(Progress::WouldBlock));
    }

    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::Begin)
    );
    assert_eq!(
        pair.server.state(),
        HandshakeState::Accepting(ServerState::Begin)
    );
    assert!(!pair.client.is_complete());
    assert!(pair.client.last_error().is_none());
    assert!(pair.server_probe.received().is_empty());
}

#[test]
fn partial_flush_resumes_where_it_stopped() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client_probe.set_budget(Some(10));

    assert_eq!(pair.client.drive(), Ok(Progress::WouldBlock));
    assert_eq!(pair.server.drive(), Ok(Progress::WouldBlock));
    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::Begin)
    );

    pair.client_probe.set_budget(None);
    pair.complete();

    // The ClientHello was queued once, not once per call.
    assert_eq!(
        pair.server_probe.received()[0],
        MessageType::ClientHello
    );
    assert_eq!(pair.client_probe.sent().len(), 4);
}

#[test]
fn server_blocked_mid_handshake() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.drive().unwrap();
    pair.server.drive().unwrap();
    pair.client.drive().unwrap();

    pair.server_probe.set_blocked(true);
    let before = pair.server.state();
    for _ in 0..10 {
        assert_eq!(pair.server.drive(), Ok(Progress::WouldBlock));
    }
    assert_eq!(pair.server.state(), before);

    pair.server_probe.set_blocked(false);
    pair.complete();
}

#[test]
fn closed_peer_fails_handshake() {
    init();
    let clock = clock();
    let client_ctx = client_context(builder(&clock));

    let ((a, _), (b, _)) = memory::pair();
    let mut client = client_ctx.connect(a);
    client.drive().unwrap();
    drop(b);

    assert_eq!(client.drive(), Err(Error::ConnectionClosed));
    assert_eq!(client.drive(), Err(Error::ConnectionClosed));
}

#[test]
fn complete_connection_stays_complete() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = handshake(&client_ctx, &server_ctx);

    assert!(pair.client.is_complete());
    assert_eq!(pair.client.drive(), Ok(Progress::Complete));
    assert_eq!(pair.server.drive(), Ok(Progress::Complete));
}

fn count(probe: &Probe, ty: MessageType) -> usize {
    probe.sent().into_iter().filter(|t| *t == ty).count()
}

#[test]
fn refused_client_hello_stays_in_begin() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client_probe.set_send_blocked(true);

    for _ in 0..50 {
        assert_eq!(pair.client.drive(), Ok(Progress::WouldBlock));
        assert_eq!(pair.server.drive(), Ok(Progress::WouldBlock));
    }

    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::Begin)
    );
    assert!(pair.client_probe.sent().is_empty());
    assert!(pair.client.last_error().is_none());

    pair.client_probe.set_send_blocked(false);
    pair.complete();

    assert_eq!(count(&pair.client_probe, MessageType::ClientHello), 1);
}

#[test]
fn refused_server_flight_resumes_after_unblock() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.drive().unwrap();

    pair.server_probe.set_send_blocked(true);
    for _ in 0..50 {
        assert_eq!(pair.server.drive(), Ok(Progress::WouldBlock));
        assert_eq!(pair.client.drive(), Ok(Progress::WouldBlock));
    }

    assert_eq!(
        pair.server.state(),
        HandshakeState::Accepting(ServerState::SendServerHello)
    );
    assert!(pair.server_probe.sent().is_empty());
    assert!(pair.server.last_error().is_none());

    pair.server_probe.set_send_blocked(false);
    // Both Finished checks pass only if every message was transcribed once.
    pair.complete();

    assert_eq!(count(&pair.server_probe, MessageType::ServerHello), 1);
    assert_eq!(count(&pair.server_probe, MessageType::ServerKeyExchange), 1);
    assert_eq!(stats(&server_ctx, &clock).inserts, 1);
}

#[test]
fn refused_key_exchange_resumes_after_unblock() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.drive().unwrap();
    pair.server.drive().unwrap();

    pair.client_probe.set_send_blocked(true);
    for _ in 0..50 {
        assert_eq!(pair.client.drive(), Ok(Progress::WouldBlock));
        assert_eq!(pair.server.drive(), Ok(Progress::WouldBlock));
    }

    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::SendKeyExchange)
    );
    assert_eq!(pair.client_probe.sent(), vec![MessageType::ClientHello]);

    pair.client_probe.set_send_blocked(false);
    pair.complete();

    assert_eq!(count(&pair.client_probe, MessageType::ClientKeyExchange), 1);
    assert_eq!(count(&pair.client_probe, MessageType::Finished), 1);
    assert_eq!(
        pair.client.session().map(|s| s.master_secret().clone()),
        pair.server.session().map(|s| s.master_secret().clone())
    );
}

#[test]
fn refused_resumed_finish_resumes_after_unblock() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    handshake(&client_ctx, &server_ctx);

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.remember_server(SERVER).unwrap();
    pair.client.drive().unwrap();
    pair.server.drive().unwrap();

    pair.client_probe.set_send_blocked(true);
    for _ in 0..50 {
        assert_eq!(pair.client.drive(), Ok(Progress::WouldBlock));
        assert_eq!(pair.server.drive(), Ok(Progress::WouldBlock));
    }

    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::ResumeSendChangeCipherSpec)
    );

    pair.client_probe.set_send_blocked(false);
    pair.complete();

    assert!(pair.client.is_resumed());
    assert!(pair.server.is_resumed());
    assert_eq!(count(&pair.client_probe, MessageType::ChangeCipherSpec), 1);
    assert_eq!(count(&pair.client_probe, MessageType::Finished), 1);
}
