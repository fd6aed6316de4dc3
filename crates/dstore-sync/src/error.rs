//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur on a DStore connection.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer closed the stream.
    #[error("connection lost")]
    ConnectionLost,

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A keep-alive probe went unanswered.
    #[error("keep-alive timed out")]
    KeepAliveTimeout,

    /// A record could not be decoded. Recovered by skipping the record.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The connection is closed; nothing more is sent.
    #[error("connection closed")]
    Closed,

    /// Tree operation failed.
    #[error("store error: {0}")]
    Store(#[from] dstore_store::StoreError),
}

impl SyncError {
    /// Whether this error ends the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::Malformed(_) | SyncError::Store(_))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
