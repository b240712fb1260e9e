use reprise::certificate::generate_self_signed_certificate;
use reprise::message::MessageType;
use reprise::{Clock, Session, SessionId, Ticket};

use crate::common::*;

#[test]
fn ticket_resumes_after_server_cache_cleared() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let first = handshake(&client_ctx, &server_ctx);
    let issued = first
        .client
        .session()
        .unwrap()
        .ticket()
        .cloned()
        .expect("ticket issued");
    let id = first.client.session().unwrap().session_id();

    server_ctx.session_store().unwrap().clear().unwrap();

    let second = handshake(&client_ctx, &server_ctx);

    assert!(second.client.is_resumed());
    assert!(second.server.is_resumed());
    assert_eq!(
        second.server_probe.sent(),
        vec![
            MessageType::ServerHello,
            MessageType::NewSessionTicket,
            MessageType::ChangeCipherSpec,
            MessageType::Finished,
        ]
    );
    assert_eq!(stats(&server_ctx, &clock).inserts, 0);

    // The renewed ticket replaces the old one in the client cache.
    let renewed = second.client.session().unwrap().ticket().cloned().unwrap();
    assert_ne!(renewed, issued);
    let cached = client_ctx
        .session_store()
        .unwrap()
        .lookup_by_id(&id, clock.now())
        .unwrap()
        .expect("client cached session");
    assert_eq!(cached.ticket(), Some(&renewed));
    assert_eq!(stats(&client_ctx, &clock).inserts, 1);
}

#[test]
fn ticket_without_session_id() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let first = handshake(&client_ctx, &server_ctx);
    let s = first.client.session().unwrap();
    let ticket_only = Session::new(
        SessionId::empty(),
        s.master_secret().clone(),
        s.cipher_suite(),
        s.protocol_version(),
        s.created_at(),
        s.timeout(),
    )
    .with_ticket(s.ticket().cloned().unwrap());

    server_ctx.session_store().unwrap().clear().unwrap();

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.set_session(ticket_only).unwrap();
    pair.complete();

    assert!(pair.client.is_resumed());
    assert!(pair.server.is_resumed());
    assert_eq!(
        pair.client.session().unwrap().master_secret(),
        s.master_secret()
    );
}

#[test]
fn unreadable_ticket_falls_back_to_session_id() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let first = handshake(&client_ctx, &server_ctx);
    let garbage = Ticket::from_slice(&[0x42; 80]).unwrap();
    let session = first.client.session().unwrap().clone().with_ticket(garbage);

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.set_session(session).unwrap();
    pair.complete();

    assert!(pair.server.is_resumed());
    // Resumed from the cache, so no ticket is issued.
    assert!(!pair
        .server_probe
        .sent()
        .contains(&MessageType::NewSessionTicket));
}

#[test]
fn unreadable_ticket_without_cache_entry_is_full_handshake() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    let first = handshake(&client_ctx, &server_ctx);
    let garbage = Ticket::from_slice(&[0x42; 80]).unwrap();
    let session = first.client.session().unwrap().clone().with_ticket(garbage);
    server_ctx.session_store().unwrap().clear().unwrap();

    let mut pair = connect(&client_ctx, &server_ctx);
    pair.client.set_session(session).unwrap();
    pair.complete();

    assert!(!pair.client.is_resumed());
    assert!(!pair.server.is_resumed());
    assert!(pair.client.session().unwrap().ticket().is_some());
}

#[test]
fn client_without_tickets_gets_none() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock).session_tickets(false));

    let pair = handshake(&client_ctx, &server_ctx);

    assert!(pair.client.session().unwrap().ticket().is_none());
    assert!(!pair
        .server_probe
        .sent()
        .contains(&MessageType::NewSessionTicket));
}
