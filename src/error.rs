//! Crate-wide error type.
//!
//! The core never propagates an opaque `io::Error`: every failure is tagged
//! with an [`ErrorKind`] so callers (and tests) can match on *why* something
//! failed, not just that it did.

use std::fmt;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of everything that can go wrong in the stream
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Null/empty subject, negative wait, bad ack policy, etc.
    InvalidArgument,
    /// Allocation failure. Rare in Rust; surfaced when a collection
    /// genuinely can't grow.
    NoMemory,
    /// Wait/stall/request timeout.
    Timeout,
    /// Ack-reply indicates no subscriber.
    NoResponders,
    /// Stream/consumer not found, 404 on pull.
    NotFound,
    /// Ack on unbound message, not-a-stream message.
    IllegalState,
    /// Not a stream subscription / not a pull subscription.
    InvalidSubscription,
    /// Consumer sequence mismatch detected.
    Mismatch,
    /// JSON error object in an API response; carries a numeric code.
    ServerError,
    /// Heartbeat expected but none observed.
    MissedHeartbeat,
}

/// A single concrete error type carrying an [`ErrorKind`], a message, and
/// (for [`ErrorKind::ServerError`]) the server's numeric error code.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    code: Option<u64>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(kind: ErrorKind, message: impl Into<String>, code: u64) -> Self {
        Error {
            kind,
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<u64> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?}: {} (code {})", self.kind, self.message, code),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorKind::ServerError, format!("malformed JSON: {}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Error::new(ErrorKind::Timeout, e.to_string()),
            std::io::ErrorKind::NotFound => Error::new(ErrorKind::NotFound, e.to_string()),
            _ => Error::new(ErrorKind::InvalidArgument, e.to_string()),
        }
    }
}

pub(crate) fn invalid_arg(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidArgument, msg)
}

pub(crate) fn timeout(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::Timeout, msg)
}

pub(crate) fn not_found(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::NotFound, msg)
}
