//! Error types for DStore connections.

use dstore_core::CoreError;
use dstore_store::StoreError;
use dstore_sync::SyncError;
use thiserror::Error;

/// Errors that can occur on a DStore connection.
#[derive(Debug, Error)]
pub enum DStoreError {
    /// Data model error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Tree operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol or transport failure.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// File or socket setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be decoded.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// An environment override has an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Result type for DStore operations.
pub type Result<T> = std::result::Result<T, DStoreError>;
