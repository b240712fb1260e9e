use reprise::certificate::generate_self_signed_certificate;
use reprise::message::MessageType;
use reprise::{Context, Error};

use crate::common::*;

#[test]
fn restored_store_resumes_sessions() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    let client_ctx = client_context(builder(&clock));

    handshake(&client_ctx, &server_ctx);
    let snapshot = server_ctx.export_store().expect("export");
    drop(server_ctx);

    // A new process: new ticket key, same configuration.
    let restarted = server_context(builder(&clock), &cert);
    restarted.import_store(&snapshot).expect("import");
    assert_eq!(stats(&restarted, &clock).active, 1);

    let pair = handshake(&client_ctx, &restarted);

    assert!(pair.client.is_resumed());
    assert!(pair.server.is_resumed());
    // The old ticket does not open under the new key, the id lookup hits.
    assert_eq!(
        pair.server_probe.sent(),
        vec![
            MessageType::ServerHello,
            MessageType::ChangeCipherSpec,
            MessageType::Finished,
        ]
    );
}

#[test]
fn snapshot_of_other_dimensions_is_rejected() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    let server_ctx = server_context(builder(&clock), &cert);
    handshake(&client_context(builder(&clock)), &server_ctx);

    let snapshot = server_ctx.export_store().unwrap();
    let other = server_context(builder(&clock).session_cache_size(5, 3), &cert);

    assert!(matches!(
        other.import_store(&snapshot),
        Err(Error::SnapshotMismatch(_))
    ));
    assert_eq!(stats(&other, &clock).occupied, 0);
}

#[test]
fn disabled_cache_has_no_snapshot() {
    let config = reprise::Config::builder()
        .session_cache(false)
        .build()
        .unwrap();
    let ctx = Context::new(config, None).unwrap();
    assert_eq!(ctx.export_store(), Err(Error::CacheDisabled));
}
