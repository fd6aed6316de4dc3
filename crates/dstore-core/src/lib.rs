//! # DStore Core
//!
//! Pure data model for the DStore tree: nodes, their attributes, the
//! reference vocabulary used on the wire, and the command status machine.
//!
//! This crate contains no I/O and no locking. The tree store lives in
//! `dstore-store`, the wire protocol in `dstore-sync`.
//!
//! ## Key Types
//!
//! - [`NodeId`] - Identifier unique within one store
//! - [`Attributes`] - The eight positional attributes carried by every record
//! - [`Node`] - One tree element with children, flags and a revision counter
//! - [`Child`] - An owning or non-owning child entry
//! - [`RefType`] / [`RefTag`] - Value/reference/spirit and the two wire vocabularies
//! - [`StatusState`] - Lifecycle of a command status node
//!
//! ## Escaping
//!
//! Attribute values and buffer text are escaped with a fixed entity table
//! that also escapes `;`. See [`escape`].

pub mod error;
pub mod escape;
pub mod node;
pub mod status;
pub mod types;

pub use error::{CoreError, Result};
pub use escape::{escape, unescape};
pub use node::{Attr, Attributes, Child, Node, RefTag, RefType};
pub use status::StatusState;
pub use types::{tokens, NodeId};
