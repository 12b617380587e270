// src/core/errors.rs

//! Defines the primary error type for the relay.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure a connection or the event loop can hit.
/// Transport errors are always connection-scoped; nothing here is fatal to the process.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Connection closed during handshake")]
    HandshakeAborted,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Outbox is full")]
    OutboxFull,

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Event loop is no longer running")]
    EventLoopClosed,

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("Invalid command target '{0}'")]
    InvalidTarget(String),

    #[error("Commands require an operator token")]
    NoPermission,

    #[error("Internal Error: {0}")]
    Internal(String),
}

// `std::io::Error` is not cloneable, so it lives behind an Arc.
impl Clone for RelayError {
    fn clone(&self) -> Self {
        match self {
            RelayError::Io(e) => RelayError::Io(Arc::clone(e)),
            RelayError::HandshakeTimeout => RelayError::HandshakeTimeout,
            RelayError::HandshakeAborted => RelayError::HandshakeAborted,
            RelayError::InvalidToken => RelayError::InvalidToken,
            RelayError::OutboxFull => RelayError::OutboxFull,
            RelayError::ConnectionClosed => RelayError::ConnectionClosed,
            RelayError::EventLoopClosed => RelayError::EventLoopClosed,
            RelayError::UnknownCommand(s) => RelayError::UnknownCommand(s.clone()),
            RelayError::WrongArgumentCount(s) => RelayError::WrongArgumentCount(s.clone()),
            RelayError::InvalidTarget(s) => RelayError::InvalidTarget(s.clone()),
            RelayError::NoPermission => RelayError::NoPermission,
            RelayError::Internal(s) => RelayError::Internal(s.clone()),
        }
    }
}

impl PartialEq for RelayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RelayError::Io(e1), RelayError::Io(e2)) => e1.kind() == e2.kind(),
            (RelayError::UnknownCommand(s1), RelayError::UnknownCommand(s2)) => s1 == s2,
            (RelayError::WrongArgumentCount(s1), RelayError::WrongArgumentCount(s2)) => s1 == s2,
            (RelayError::InvalidTarget(s1), RelayError::InvalidTarget(s2)) => s1 == s2,
            (RelayError::Internal(s1), RelayError::Internal(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl RelayError {
    /// True for I/O errors that just mean the peer went away.
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(self, RelayError::Io(e) if is_normal_disconnect_kind(e.kind()))
    }
}

/// Classifies I/O error kinds that correspond to a peer hanging up rather than a fault.
pub fn is_normal_disconnect_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    )
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Io(Arc::new(e))
    }
}

impl From<tokio::time::error::Elapsed> for RelayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RelayError::HandshakeTimeout
    }
}

impl From<getrandom::Error> for RelayError {
    fn from(e: getrandom::Error) -> Self {
        RelayError::Internal(format!("Failed to gather random bytes: {e}"))
    }
}
