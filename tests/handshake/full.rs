use std::sync::Arc;

use reprise::certificate::{generate_named, generate_self_signed_certificate, FingerprintVerifier};
use reprise::message::MessageType;
use reprise::{CipherSuite, ClientState, Clock, Error, HandshakeState, MasterSecret, ProtocolVersion};
use reprise::{Role, ServerState, Session, SessionId};

use crate::common::*;

#[test]
fn full_handshake_publishes_one_session_per_side() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let pair = handshake(&client_ctx, &server_ctx);

    assert_eq!(pair.client.role(), Role::Connecting);
    assert_eq!(pair.server.role(), Role::Accepting);
    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::Complete)
    );
    assert_eq!(
        pair.server.state(),
        HandshakeState::Accepting(ServerState::Complete)
    );
    assert!(!pair.client.is_resumed());
    assert!(!pair.server.is_resumed());

    let client_session = pair.client.session().expect("client session");
    let server_session = pair.server.session().expect("server session");
    assert_eq!(client_session.session_id(), server_session.session_id());
    assert_eq!(client_session.master_secret(), server_session.master_secret());
    assert_eq!(client_session.protocol_version(), ProtocolVersion::TLS1_2);
    assert!(client_session.ticket().is_some());
    assert_eq!(pair.client.peer_certificates(), &[cert.certificate.clone()]);

    assert_eq!(stats(&client_ctx, &clock).inserts, 1);
    assert_eq!(stats(&server_ctx, &clock).inserts, 1);

    let cached = server_ctx
        .session_store()
        .unwrap()
        .lookup_by_id(&server_session.session_id(), clock.now())
        .unwrap()
        .expect("server cached the session");
    assert_eq!(cached.master_secret(), server_session.master_secret());
}

#[test]
fn full_handshake_message_order() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_tickets(false), &cert);
    let client_ctx = client_context(builder(&clock));

    let pair = handshake(&client_ctx, &server_ctx);

    assert_eq!(
        pair.client_probe.sent(),
        vec![
            MessageType::ClientHello,
            MessageType::ClientKeyExchange,
            MessageType::ChangeCipherSpec,
            MessageType::Finished,
        ]
    );
    assert_eq!(
        pair.server_probe.sent(),
        vec![
            MessageType::ServerHello,
            MessageType::Certificate,
            MessageType::ServerKeyExchange,
            MessageType::ServerHelloDone,
            MessageType::ChangeCipherSpec,
            MessageType::Finished,
        ]
    );
}

#[test]
fn unknown_session_id_runs_full_handshake() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_tickets(false), &cert);
    let client_ctx = client_context(builder(&clock).session_tickets(false));

    let unknown = Session::new(
        SessionId::try_new(&[7; 32]).unwrap(),
        MasterSecret::new([1; 48]),
        CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256,
        ProtocolVersion::TLS1_2,
        clock.now(),
        std::time::Duration::from_secs(3600),
    );

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.set_session(unknown).expect("set session");
    pair.complete();

    assert!(!pair.client.is_resumed());
    assert!(!pair.server.is_resumed());
    assert_eq!(
        pair.server_probe.sent(),
        vec![
            MessageType::ServerHello,
            MessageType::Certificate,
            MessageType::ServerKeyExchange,
            MessageType::ServerHelloDone,
            MessageType::ChangeCipherSpec,
            MessageType::Finished,
        ]
    );

    let negotiated = pair.server.session().unwrap().session_id();
    assert_ne!(negotiated, SessionId::try_new(&[7; 32]).unwrap());

    let stats = stats(&server_ctx, &clock);
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.occupied, 1);
    assert!(server_ctx
        .session_store()
        .unwrap()
        .lookup_by_id(&negotiated, clock.now())
        .unwrap()
        .is_some());
}

#[test]
fn disabled_cache_completes_without_session_id() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).session_cache(false), &cert);
    let client_ctx = client_context(builder(&clock).session_cache(false));

    let pair = handshake(&client_ctx, &server_ctx);

    assert!(server_ctx.session_store().is_none());
    assert!(pair.server.session().unwrap().session_id().is_empty());
    assert!(pair.client.session().unwrap().ticket().is_none());
}

#[test]
fn sha384_suite() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let suites = [CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384];
    let server_ctx = server_context(builder(&clock).cipher_suites(&suites), &cert);
    let client_ctx = client_context(builder(&clock));

    let pair = handshake(&client_ctx, &server_ctx);

    assert_eq!(
        pair.client.session().unwrap().cipher_suite(),
        CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384
    );
}

#[test]
fn no_shared_cipher_suite_fails() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(
        builder(&clock).cipher_suites(&[CipherSuite::ECDHE_ECDSA_AES256_GCM_SHA384]),
        &cert,
    );
    let client_ctx = client_context(
        builder(&clock).cipher_suites(&[CipherSuite::ECDHE_ECDSA_AES128_GCM_SHA256]),
    );

    let mut pair = connect(&client_ctx, &server_ctx);
    let (_, server_err) = pair.fail();

    assert!(matches!(server_err, Some(Error::SecurityError(_))));
    assert!(matches!(
        pair.server.last_error(),
        Some(Error::SecurityError(_))
    ));
    // Errors are sticky.
    assert!(matches!(pair.server.drive(), Err(Error::SecurityError(_))));
    assert_eq!(
        pair.server.state(),
        HandshakeState::Accepting(ServerState::ClientHelloReceived)
    );
}

#[test]
fn client_certificate_is_verified() {
    init();
    let clock = clock();
    let server_cert = generate_named("server").expect("gen server cert");
    let client_cert = generate_named("client").expect("gen client cert");

    let server_ctx = server_context(
        builder(&clock)
            .require_client_certificate(true)
            .cert_verifier(Arc::new(FingerprintVerifier::for_certificate(&client_cert))),
        &server_cert,
    );
    let config = builder(&clock)
        .cert_verifier(Arc::new(FingerprintVerifier::for_certificate(&server_cert)))
        .build()
        .unwrap();
    let client_ctx = reprise::Context::new(config, Some(client_cert.clone())).unwrap();

    let pair = handshake(&client_ctx, &server_ctx);

    assert_eq!(pair.server.peer_certificates(), &[client_cert.certificate.clone()]);
    assert!(pair
        .client_probe
        .sent()
        .contains(&MessageType::CertificateVerify));
    #[cfg(feature = "session-certs")]
    assert_eq!(
        pair.server.session().unwrap().peer_cert_chain(),
        &[client_cert.certificate.clone()]
    );
}

#[test]
fn missing_client_certificate_fails() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).require_client_certificate(true), &cert);
    let client_ctx = client_context(builder(&clock));

    let mut pair = connect(&client_ctx, &server_ctx);
    let (_, server_err) = pair.fail();

    assert!(matches!(server_err, Some(Error::CertificateError(_))));
    assert_eq!(stats(&server_ctx, &clock).inserts, 0);
}

#[test]
fn pinned_server_certificate_mismatch_fails() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let other = generate_self_signed_certificate().expect("gen other cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(
        builder(&clock).cert_verifier(Arc::new(FingerprintVerifier::for_certificate(&other))),
    );

    let mut pair = connect(&client_ctx, &server_ctx);
    let (client_err, _) = pair.fail();

    assert!(matches!(client_err, Some(Error::CertificateError(_))));
    assert_eq!(
        pair.client.state(),
        HandshakeState::Connecting(ClientState::AwaitFirstReply)
    );
}

#[test]
fn stapled_certificate_status_reaches_client() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(
        builder(&clock).stapled_certificate_status(vec![0x30, 0x03, 0x0a, 0x01, 0x00]),
        &cert,
    );
    let client_ctx = client_context(builder(&clock).request_certificate_status(true));

    let pair = handshake(&client_ctx, &server_ctx);

    assert_eq!(
        pair.client.certificate_status(),
        Some(&[0x30, 0x03, 0x0a, 0x01, 0x00][..])
    );
    assert!(pair
        .server_probe
        .sent()
        .contains(&MessageType::CertificateStatus));
}

#[test]
fn status_not_stapled_unless_requested() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock).stapled_certificate_status(vec![1]), &cert);
    let client_ctx = client_context(builder(&clock));

    let pair = handshake(&client_ctx, &server_ctx);

    assert_eq!(pair.client.certificate_status(), None);
    assert!(!pair
        .server_probe
        .sent()
        .contains(&MessageType::CertificateStatus));
}
