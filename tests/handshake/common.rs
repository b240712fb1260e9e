//! Shared helpers for handshake integration tests.

#![allow(unused)]

use std::sync::Arc;

use reprise::certificate::Certificate;
use reprise::record::memory::{self, Probe};
use reprise::{CacheStats, Clock, Config, ConfigBuilder, Connection, Context, Error};
use reprise::{ManualClock, Progress, Timestamp};

/// Server identity used with `remember_server`.
pub const SERVER: &[u8] = b"server.test:443";

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn clock() -> ManualClock {
    ManualClock::new(Timestamp::from_secs(1_700_000_000))
}

/// Builder using the shared test clock.
pub fn builder(clock: &ManualClock) -> ConfigBuilder {
    Config::builder().clock(Arc::new(clock.clone()))
}

pub fn server_context(builder: ConfigBuilder, cert: &Certificate) -> Context {
    let config = builder.build().expect("build server config");
    Context::new(config, Some(cert.clone())).expect("server context")
}

pub fn client_context(builder: ConfigBuilder) -> Context {
    let config = builder.build().expect("build client config");
    Context::new(config, None).expect("client context")
}

pub fn stats(ctx: &Context, clock: &ManualClock) -> CacheStats {
    ctx.session_store()
        .expect("session cache enabled")
        .stats(clock.now())
        .expect("stats")
}

/// Client and server connected through an in-memory record layer.
pub struct Pair {
    pub client: Connection,
    pub server: Connection,
    pub client_probe: Probe,
    pub server_probe: Probe,
}

pub fn connect(client_ctx: &Context, server_ctx: &Context) -> Pair {
    let ((a, client_probe), (b, server_probe)) = memory::pair();
    Pair {
        client: client_ctx.connect(a),
        server: server_ctx.accept(b).expect("accept"),
        client_probe,
        server_probe,
    }
}

/// Connect to `SERVER` and run the handshake to completion.
pub fn handshake(client_ctx: &Context, server_ctx: &Context) -> Pair {
    let mut pair = connect(client_ctx, server_ctx);
    pair.client
        .remember_server(SERVER)
        .expect("remember server");
    pair.complete();
    pair
}

impl Pair {
    /// Drive both ends until both report complete.
    pub fn complete(&mut self) {
        for _ in 0..20 {
            let c = self.client.drive().expect("client drive");
            let s = self.server.drive().expect("server drive");
            if c == Progress::Complete && s == Progress::Complete {
                return;
            }
        }
        panic!(
            "Handshake did not complete: {:?} {:?}",
            self.client, self.server
        );
    }

    /// Drive both ends until one of them fails.
    pub fn fail(&mut self) -> (Option<Error>, Option<Error>) {
        for _ in 0..20 {
            let c = self.client.drive();
            let s = self.server.drive();
            if c.is_err() || s.is_err() {
                return (c.err(), s.err());
            }
        }
        panic!(
            "Handshake did not fail: {:?} {:?}",
            self.client, self.server
        );
    }
}
