//! reprise
//!
//! Sans-IO handshake engine for TLS 1.2 and DTLS 1.2 with a shared, bounded
//! session cache for resumption.
//!
//! # Goals
//! - **Resumption first**: completed full handshakes publish their session to
//!   a fixed-size store shared by every connection of a [`Context`]. Later
//!   handshakes with the same session id (or session ticket) skip the key
//!   exchange.
//! - **Non-blocking**: a [`Connection`] is driven by repeated calls to
//!   [`Connection::drive`]. When the record layer cannot move data the call
//!   returns [`Progress::WouldBlock`] and the next call resumes exactly where
//!   this one stopped.
//! - **Bring your own record layer**: the engine exchanges whole handshake
//!   messages with a [`RecordLayer`](record::RecordLayer). Framing,
//!   encryption and the transport belong to the application.
//! - **Pluggable crypto**: every primitive goes through a
//!   [`CryptoProvider`](crypto::CryptoProvider). A RustCrypto based provider
//!   is the default.
//!
//! # Session store
//! The store is a table of `rows` hash buckets with `columns` slots each.
//! A bucket is written FIFO: when full, the oldest slot is overwritten. One
//! lock guards the whole table. Sessions expire `timeout` seconds after
//! their original creation, resuming never extends the lifetime.
//!
//! The table can be saved with [`Context::export_store`] and restored in
//! another process with [`Context::import_store`].
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "rcgen")]
//! # fn main() -> Result<(), reprise::Error> {
//! use reprise::record::memory;
//! use reprise::{certificate, Config, Context, Progress};
//!
//! let cert = certificate::generate_self_signed_certificate()?;
//! let server_ctx = Context::new(Config::default(), Some(cert))?;
//! let client_ctx = Context::new(Config::default(), None)?;
//!
//! let ((a, _), (b, _)) = memory::pair();
//! let mut client = client_ctx.connect(a);
//! let mut server = server_ctx.accept(b)?;
//!
//! loop {
//!     let c = client.drive()?;
//!     let s = server.drive()?;
//!     if c == Progress::Complete && s == Progress::Complete {
//!         break;
//!     }
//! }
//!
//! assert!(!client.is_resumed());
//! assert!(client.session().is_some());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "rcgen"))]
//! # fn main() {}
//! ```
#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod config;
mod context;
mod error;
mod handshake;
mod rng;
mod ticket;
mod time;
mod types;

pub mod certificate;
pub mod crypto;
pub mod message;
pub mod record;
pub mod session;

pub use config::{Config, ConfigBuilder};
pub use context::Context;
pub use error::Error;
pub use handshake::{ClientState, Connection, HandshakeState, Role, ServerState};
pub use session::{AppContext, CacheStats, MasterSecret, PeerId, Session, SessionId};
pub use session::{SessionStore, Ticket};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use types::{CipherSuite, Cookie, HashAlgorithm, NamedGroup, ProtocolVersion, Random};

/// Outcome of one [`Connection::drive`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The handshake is done.
    Complete,
    /// The record layer cannot move data right now. Drive again later.
    WouldBlock,
}
