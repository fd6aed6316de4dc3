//! Error types for the DStore core.

use thiserror::Error;

/// Errors raised while interpreting node attributes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid {attribute} token: {token:?}")]
    InvalidToken {
        attribute: &'static str,
        token: String,
    },

    #[error("invalid depth attribute: {0:?}")]
    InvalidDepth(String),

    #[error("unknown status: {0:?}")]
    UnknownStatus(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
