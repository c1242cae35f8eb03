//! Error types for the Conjure client core.

use std::io;

use thiserror::Error;

/// Result type alias for Conjure operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while registering and connecting a Conjure session.
#[derive(Error, Debug)]
pub enum Error {
    /// Every dial attempt failed with an OS-level network-unreachable error.
    ///
    /// This is the signal that triggers the v6 to v4 registration fallback.
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// A TCP, TLS, or write error during a registration attempt that does not
    /// indicate an unreachable network.
    #[error("dial failure: {0}")]
    DialFailure(String),

    /// A feature-flagged code path that is not implemented (e.g. Obfs4).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The variable-size registration payload exceeds the u16 length field.
    #[error("payload too large: {actual} bytes exceeds {limit}")]
    PayloadTooLarge { limit: usize, actual: usize },

    /// The API was invoked without a session.
    #[error("no session provided")]
    NoSession,

    /// HKDF, AEAD, or Elligator failure.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Malformed handshake message from a decoy.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A deadline elapsed.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Network I/O error outside the registration dial path.
    #[error("network error: {0}")]
    Network(#[from] io::Error),
}

impl Error {
    /// Create a new cryptographic error.
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new dial failure.
    pub fn dial(msg: impl Into<String>) -> Self {
        Error::DialFailure(msg.into())
    }

    /// Create a new unreachable error.
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Error::Unreachable(msg.into())
    }

    /// Classify an error from a registration dial attempt.
    ///
    /// `ENETUNREACH` becomes [`Error::Unreachable`]; everything else is a
    /// plain dial failure.
    pub fn from_dial(err: io::Error) -> Self {
        if is_net_unreachable(&err) {
            Error::Unreachable(err.to_string())
        } else {
            Error::DialFailure(err.to_string())
        }
    }

    /// Check whether this error is the unreachable kind.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Unreachable(_))
    }
}

/// `ENETUNREACH` is 101 on every Unix libc; the `ErrorKind` match covers
/// platforms where the raw value differs.
fn is_net_unreachable(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NetworkUnreachable || err.raw_os_error() == Some(101)
}
