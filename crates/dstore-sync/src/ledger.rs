//! Per-connection transmission bookkeeping.
//!
//! The generator skips a node it has already sent at its current revision.
//! The state lives here, keyed by node id, rather than on the node, so two
//! connections sharing a store track their transfers independently.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use dstore_core::{Node, NodeId};

/// Transfer state of one node on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Must be sent on the next generation regardless of revision.
    Pending,
    /// Sent at this revision.
    Transmitted { revision: u64 },
}

/// Transfer states of every node seen by one connection.
#[derive(Debug, Default)]
pub struct TransferLedger {
    states: Mutex<HashMap<NodeId, TransferState>>,
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: &NodeId) -> Option<TransferState> {
        self.lock().get(id).copied()
    }

    /// Whether the generator must emit this node.
    pub fn needs_send(&self, node: &Node) -> bool {
        match self.state(node.id()) {
            None | Some(TransferState::Pending) => true,
            Some(TransferState::Transmitted { revision }) => revision != node.revision(),
        }
    }

    /// Whether the peer already holds this node.
    pub fn is_transmitted(&self, id: &NodeId) -> bool {
        matches!(self.state(id), Some(TransferState::Transmitted { .. }))
    }

    pub fn mark_transmitted(&self, node: &Node) {
        self.lock().insert(
            node.id().clone(),
            TransferState::Transmitted {
                revision: node.revision(),
            },
        );
    }

    pub fn mark_pending(&self, id: &NodeId) {
        self.lock().insert(id.clone(), TransferState::Pending);
    }

    pub fn forget(&self, id: &NodeId) {
        self.lock().remove(id);
    }

    /// Drop entries whose id fails `keep`. Returns how many were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&NodeId) -> bool) -> usize {
        let mut states = self.lock();
        let before = states.len();
        states.retain(|id, _| keep(id));
        before - states.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, TransferState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
