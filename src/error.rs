use std::io;

use thiserror::Error;

/// Raised at adapter construction when a connection cannot be bound to any
/// registered TLS backend. The caller should fall back to the classic
/// copy-based read path; the connection itself is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("no registered tls backend matches this connection")]
    NoBackend,
    #[error("tls connection internals have an unexpected shape: {0}")]
    UnexpectedShape(&'static str),
}

/// Failure classes surfaced by the read-wait path.
///
/// This layer never retries internally: every failure goes straight to the
/// caller, who owns the retry/close decision.
#[derive(Debug, Error)]
pub enum ReadWaitError {
    /// Adapter construction failed; use the copy-based fallback.
    #[error("tls binding failed: {0}")]
    Binding(#[from] BindingError),
    /// The underlying handshake failed or was cancelled. Not retried.
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] io::Error),
    /// A record read or post-handshake message failed; the connection should
    /// be considered unusable afterwards.
    #[error("tls record processing failed: {0}")]
    Record(#[source] io::Error),
    /// Buffer allocation or the copy into the produced buffer failed.
    #[error("buffer exchange failed: {0}")]
    Buffer(String),
}

impl From<ReadWaitError> for io::Error {
    fn from(err: ReadWaitError) -> io::Error {
        let kind = match &err {
            ReadWaitError::Handshake(e) | ReadWaitError::Record(e) => e.kind(),
            ReadWaitError::Binding(_) => io::ErrorKind::Unsupported,
            ReadWaitError::Buffer(_) => io::ErrorKind::OutOfMemory,
        };
        io::Error::new(kind, err.to_string())
    }
}
