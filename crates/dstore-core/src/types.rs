//! Strong type definitions for the DStore tree.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Reserved type and value tokens shared by both ends of a connection.
pub mod tokens {
    /// Type of the wrapper node that carries one sent document.
    pub const DOCUMENT: &str = "DOCUMENT";
    /// Type of a keep-alive request record.
    pub const KEEP_ALIVE: &str = "KeepAlive";
    /// Type of a keep-alive confirmation record.
    pub const KEEP_ALIVE_CONFIRM: &str = "KeepAliveConfirm";
    /// Type of the transient node standing in for a byte payload.
    pub const FILE: &str = "FILE";
    /// Type of a command status node.
    pub const STATUS: &str = "status";
    /// Type of a command descriptor.
    pub const COMMAND_DESCRIPTOR: &str = "C";
    /// Value carried by a deleted node.
    pub const DELETED: &str = "deleted";
    /// Relation used for references created by the command generator.
    pub const CONTENTS: &str = "contents";
    /// Depth attribute of a freshly created node.
    pub const DEFAULT_DEPTH: u64 = 2;
}

/// Identifier of a node, unique within one store.
///
/// Ids are opaque strings on the wire. Locally generated ids are random
/// decimal integers, re-drawn on collision by the store.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Draw a random id. The caller is responsible for uniqueness.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen::<i32>().to_string())
    }

    /// Borrow the raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
