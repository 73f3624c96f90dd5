//! Error taxonomy for the link.
//!
//! Every failure a call can produce surfaces as a [`LinkError`]. The only
//! outcome that is absorbed instead of returned is a status-2 warning, which
//! is logged and the call's results are still handed back.
//!
//! Errors split into two families:
//!
//! - *Fatal*: connection, timeout, IO and protocol failures. The byte stream
//!   can no longer be trusted, so the socket is dropped and the next call
//!   goes through the lazy reconnect path.
//! - *Call-level*: invalid item, remote error, license and argument failures.
//!   The full response was consumed and the connection stays in sync.
use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("unrecognized status code {0}")]
    UnknownStatus(i32),

    #[error("negative length {0} in frame")]
    NegativeLength(i32),

    #[error("declared length of {count} elements of {size} bytes overflows")]
    LengthOverflow { count: usize, size: usize },

    #[error("line is not valid utf-8")]
    InvalidUtf8,

    #[error("failed to encode value: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode value: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timed out waiting for the station")]
    Timeout,

    #[error("transport io error: {0}")]
    Io(io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid item")]
    InvalidItem,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("invalid license")]
    License,

    #[error("invalid argument: {0}")]
    Argument(String),
}

impl LinkError {
    /// Whether the stream may hold unread or half-written bytes after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Connection(_) | LinkError::Timeout | LinkError::Io(_) | LinkError::Protocol(_)
        )
    }
}

impl From<io::Error> for LinkError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => LinkError::Timeout,
            _ => LinkError::Io(value),
        }
    }
}
