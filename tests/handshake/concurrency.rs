use std::thread;

use reprise::certificate::generate_self_signed_certificate;
use reprise::Clock;

use crate::common::*;

#[test]
fn parallel_handshakes_share_one_row() {
    init();
    let clock = clock();
    let cert = generate_self_signed_certificate().expect("gen cert");
    const N: usize = 8;
    let server_ctx = server_context(builder(&clock).session_cache_size(1, N), &cert);

    let handles: Vec<_> = (0..N)
        .map(|_| {
            let server_ctx = server_ctx.clone();
            let clock = clock.clone();
            thread::spawn(move || {
                let client_ctx = client_context(builder(&clock));
                let pair = handshake(&client_ctx, &server_ctx);
                pair.client.session().unwrap().clone()
            })
        })
        .collect();

    let sessions: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("handshake thread"))
        .collect();

    let stats = stats(&server_ctx, &clock);
    assert_eq!(stats.inserts, N as u64);
    assert_eq!(stats.occupied, N);

    let store = server_ctx.session_store().unwrap();
    for session in &sessions {
        let cached = store
            .lookup_by_id(&session.session_id(), clock.now())
            .unwrap()
            .expect("every session in its own slot");
        assert_eq!(cached.master_secret(), session.master_secret());
    }
}
