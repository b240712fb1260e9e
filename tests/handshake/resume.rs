use std::time::Duration;

use reprise::certificate::generate_self_signed_certificate;
use reprise::message::MessageType;
use reprise::{ClientState, Clock, Error, HandshakeState, ServerState};

use crate::common::*;

#[test]
fn resumes_session_cached_ten_seconds_ago() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let timeout = Duration::from_secs(3600);
    let server_ctx = server_context(
        builder(&clock).session_timeout(timeout).session_tickets(false),
        &cert,
    );
    let client_ctx = client_context(builder(&clock).session_timeout(timeout));

    let first = handshake(&client_ctx, &server_ctx);
    let original = first.server.session().unwrap().clone();

    clock.advance(Duration::from_secs(10));

    let second = handshake(&client_ctx, &server_ctx);

    assert!(second.client.is_resumed());
    assert!(second.server.is_resumed());
    assert_eq!(
        second.server_probe.received(),
        vec![
            MessageType::ClientHello,
            MessageType::ChangeCipherSpec,
            MessageType::Finished,
        ]
    );
    assert_eq!(
        second.server_probe.sent(),
        vec![
            MessageType::ServerHello,
            MessageType::ChangeCipherSpec,
            MessageType::Finished,
        ]
    );

    let resumed = second.server.session().unwrap();
    assert_eq!(resumed.session_id(), original.session_id());
    assert_eq!(resumed.master_secret(), original.master_secret());
    assert_eq!(resumed.created_at(), original.created_at());
    assert_eq!(
        second.client.session().unwrap().master_secret(),
        original.master_secret()
    );

    // Resumption never re-inserts.
    assert_eq!(stats(&server_ctx, &clock).inserts, 1);
    assert_eq!(stats(&client_ctx, &clock).inserts, 1);
}

#[cfg(feature = "session-certs")]
#[test]
fn resumed_client_sees_cached_peer_chain() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_tickets(false), &cert);
    let client_ctx = client_context(builder(&clock));

    handshake(&client_ctx, &server_ctx);
    let second = handshake(&client_ctx, &server_ctx);

    assert!(second.client.is_resumed());
    assert_eq!(second.client.peer_certificates(), &[cert.certificate.clone()]);
}

#[test]
fn expired_session_is_not_resumed() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let timeout = Duration::from_secs(60);
    let server_ctx = server_context(builder(&clock).session_timeout(timeout), &cert);
    let client_ctx = client_context(builder(&clock).session_timeout(timeout));

    handshake(&client_ctx, &server_ctx);
    clock.advance(timeout);

    let second = handshake(&client_ctx, &server_ctx);

    assert!(!second.client.is_resumed());
    assert!(!second.server.is_resumed());
    assert_eq!(stats(&server_ctx, &clock).inserts, 2);
}

#[test]
fn resuming_does_not_extend_lifetime() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let timeout = Duration::from_secs(100);
    let server_ctx = server_context(
        builder(&clock).session_timeout(timeout).session_tickets(false),
        &cert,
    );
    let client_ctx = client_context(builder(&clock).session_timeout(timeout));

    handshake(&client_ctx, &server_ctx);

    clock.advance(Duration::from_secs(60));
    assert!(handshake(&client_ctx, &server_ctx).server.is_resumed());

    clock.advance(Duration::from_secs(40));
    assert!(!handshake(&client_ctx, &server_ctx).server.is_resumed());
}

#[test]
fn other_app_context_is_a_miss() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_tickets(false), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut first = connect(&client_ctx, &server_ctx);
    first.client.remember_server(SERVER).unwrap();
    first.server.set_session_context(b"tenant-a").unwrap();
    first.complete();

    let id = first.server.session().unwrap().session_id();
    let store = server_ctx.session_store().unwrap();
    let before = store.lookup_by_id(&id, clock.now()).unwrap().expect("cached");
    assert_eq!(before.app_context().as_deref(), Some(&b"tenant-a"[..]));

    let mut second = connect(&client_ctx, &server_ctx);
    second.client.remember_server(SERVER).unwrap();
    second.server.set_session_context(b"tenant-b").unwrap();
    second.complete();

    assert!(!second.server.is_resumed());
    assert!(!second.client.is_resumed());

    let after = store.lookup_by_id(&id, clock.now()).unwrap().expect("still cached");
    assert_eq!(after, before);
}

#[test]
fn same_app_context_resumes() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_tickets(false), &cert);
    let client_ctx = client_context(builder(&clock));

    let run = || {
        let mut pair = connect(&client_ctx, &server_ctx);
        pair.client.remember_server(SERVER).unwrap();
        pair.client.set_session_context(b"tenant-a").unwrap();
        pair.server.set_session_context(b"tenant-a").unwrap();
        pair.complete();
        pair
    };

    assert!(!run().server.is_resumed());
    assert!(run().server.is_resumed());
}

#[test]
fn client_skips_session_of_other_app_context() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    handshake(&client_ctx, &server_ctx);

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.remember_server(SERVER).unwrap();
    pair.client.set_session_context(b"other").unwrap();
    pair.complete();

    assert!(!pair.client.is_resumed());
}

#[test]
fn explicit_session_resumes_on_fresh_client() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_tickets(false), &cert);

    let first = handshake(&client_context(builder(&clock)), &server_ctx);
    let session = first.client.session().unwrap().clone();

    let other_client = client_context(builder(&clock));
    let mut pair = connect(&other_client, &server_ctx);
    pair.client.set_session(session.clone()).unwrap();
    pair.complete();

    assert!(pair.client.is_resumed());
    assert_eq!(
        pair.client.session().unwrap().session_id(),
        session.session_id()
    );
    assert_eq!(stats(&other_client, &clock).inserts, 0);
}

#[test]
fn set_session_rejects_unusable_sessions() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let timeout = Duration::from_secs(60);
    let server_ctx = server_context(builder(&clock).session_timeout(timeout), &cert);
    let client_ctx = client_context(builder(&clock).session_timeout(timeout));

    let first = handshake(&client_ctx, &server_ctx);
    let session = first.client.session().unwrap().clone();

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.set_session_context(b"other").unwrap();
    assert_eq!(
        pair.client.set_session(session.clone()),
        Err(Error::SessionContextMismatch)
    );
    assert_eq!(
        pair.server.set_session(session.clone()),
        Err(Error::WrongRole("connecting"))
    );
    assert_eq!(
        pair.server.remember_server(SERVER),
        Err(Error::WrongRole("connecting"))
    );

    clock.advance(timeout);
    let mut pair = connect(&client_ctx, &server_ctx);
    assert_eq!(pair.client.set_session(session), Err(Error::SessionExpired));
}

#[test]
fn set_session_after_start_is_rejected() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let first = handshake(&client_ctx, &server_ctx);
    let session = first.client.session().unwrap().clone();

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.drive().unwrap();
    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::ClientHelloSent)
    );
    assert!(matches!(
        pair.client.set_session(session),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        pair.client.remember_server(SERVER),
        Err(Error::InvalidInput(_))
    ));
}

#[test]
fn connection_timeout_applies_to_new_session() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_tickets(false), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    assert!(matches!(
        pair.server.set_timeout(Duration::ZERO),
        Err(Error::InvalidInput(_))
    ));
    pair.server.set_timeout(Duration::from_secs(42)).unwrap();
    pair.complete();

    assert_eq!(
        pair.server.session().unwrap().timeout(),
        Duration::from_secs(42)
    );
    assert_eq!(
        pair.server.state(),
        HandshakeState::Accepting(ServerState::Complete)
    );
}
