//! Server error types.

use depot_core::{IndexError, StorageError};
use depot_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while serving one connection.
///
/// None of these ever crash the server process; the worst outcome is
/// tearing down the connection that produced the error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("backend call timed out")]
    BackendTimeout,

    #[error("socket write timed out")]
    WriteTimeout,

    #[error("connection exceeded maximum lifetime")]
    LifetimeExceeded,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ServerError {
    /// Whether the error was caused by the client (as opposed to a
    /// backend or local failure).
    pub fn is_client_fault(&self) -> bool {
        matches!(self, ServerError::Protocol(_))
    }
}
