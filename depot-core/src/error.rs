//! Backend error types.

use thiserror::Error;

/// Errors from an index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid index data: {0}")]
    InvalidData(String),

    #[error("index unavailable: {0}")]
    Unavailable(String),
}

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("content blob not found: {0}")]
    NotFound(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob shorter than declared: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },
}
