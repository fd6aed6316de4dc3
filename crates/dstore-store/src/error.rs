//! Error types for the store module.

use dstore_core::{CoreError, NodeId};
use thiserror::Error;

/// Errors that can occur during tree operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No node with this id.
    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// Well-known roots cannot be removed.
    #[error("node {0} is a well-known root")]
    Protected(NodeId),

    /// The node is not a command status.
    #[error("node {0} is not a status node")]
    NotAStatus(NodeId),

    /// A status wait gave up.
    #[error("timed out waiting on status {0}")]
    Timeout(NodeId),

    /// Attribute decoding failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
