use thiserror::Error;

/// Errors produced by the handshake driver, the session store and the
/// snapshot codec.
///
/// Every variant is a stable reason code. Would-block is not an error, see
/// [`Progress::WouldBlock`](crate::Progress::WouldBlock).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Record layer error: {0}")]
    RecordError(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Operation only valid for the {0} role")]
    WrongRole(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session is expired")]
    SessionExpired,

    #[error("Session context does not match")]
    SessionContextMismatch,

    #[error("Session store lock is poisoned")]
    LockPoisoned,

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Session slot modified concurrently")]
    ConcurrentModification,

    #[error("Snapshot does not match configuration: {0}")]
    SnapshotMismatch(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Session cache is disabled")]
    CacheDisabled,
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}
