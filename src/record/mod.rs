//! The record layer collaborator.
//!
//! The handshake driver never touches bytes on the wire. It hands complete
//! handshake messages to a [`RecordLayer`] and pulls complete messages back
//! out. Fragmentation, record framing, encryption and the transport itself
//! are the record layer's business.
//!
//! A record layer is non-blocking. When it cannot make progress it returns
//! [`RecordError::WouldBlock`] and the driver hands that back to the
//! application as [`Progress::WouldBlock`](crate::Progress::WouldBlock).

use std::fmt;

use crate::message::Message;
use crate::Error;

pub mod memory;

/// Failures of the record layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// No progress possible right now. Not a failure.
    WouldBlock,
    /// The peer went away.
    Closed,
    /// Incoming bytes did not form a valid message.
    Decode(String),
    /// Transport failure.
    Io(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::WouldBlock => write!(f, "would block"),
            RecordError::Closed => write!(f, "closed"),
            RecordError::Decode(e) => write!(f, "decode: {}", e),
            RecordError::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl From<RecordError> for Error {
    fn from(value: RecordError) -> Self {
        match value {
            // Callers filter out WouldBlock before converting.
            RecordError::WouldBlock => Error::RecordError("would block".into()),
            RecordError::Closed => Error::ConnectionClosed,
            RecordError::Decode(e) => Error::UnexpectedMessage(e),
            RecordError::Io(e) => Error::RecordError(e),
        }
    }
}

/// Record layer used by one connection.
pub trait RecordLayer: Send {
    /// Queue a handshake message for sending.
    ///
    /// Returns the number of bytes queued. A message is either queued whole
    /// or not at all.
    fn send_handshake_message(&mut self, message: &Message) -> Result<usize, RecordError>;

    /// Bytes queued but not yet written to the transport.
    fn buffered_output(&self) -> usize;

    /// Write queued output. `WouldBlock` if some of it is still queued.
    fn flush(&mut self) -> Result<(), RecordError>;

    /// Next complete incoming handshake message.
    fn receive(&mut self) -> Result<Message, RecordError>;
}
