//! Shared error model for cross-crate APIs.

use thiserror::Error;

/// Unified result type used by all public interfaces in `coral`.
pub type CoralResult<T> = Result<T, CoralError>;

/// High-level error categories shared across the protocol, dispatch, and server crates.
///
/// Command-level failures (arity, type, syntax) are *not* represented here: those stay on the
/// connection as error replies. `CoralError` covers the failures that end a connection or abort
/// server bootstrap.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoralError {
    /// Configuration is invalid for the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Runtime state does not allow this operation.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// Client payload violates wire framing rules. Fatal for the connection.
    #[error("{0}")]
    Protocol(String),

    /// Socket or filesystem I/O failed.
    #[error("io error: {0}")]
    Io(String),
}

impl CoralError {
    /// User-facing error line for a protocol violation, without the wire `-`/CRLF framing.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
