//! Command instances.
//!
//! A command is a node built from a descriptor, holding the subject and the
//! arguments, plus a `status` child the caller waits on. It lives under the
//! log root and is never removed automatically.

use std::sync::Arc;

use tracing::debug;

use dstore_core::{tokens, Attributes, NodeId, StatusState};
use dstore_store::{DataStore, Tree};

use crate::error::Result;
use crate::ledger::TransferLedger;

/// Builds command instances in a store, for one connection.
pub struct CommandGenerator {
    store: Arc<DataStore>,
    ledger: Arc<TransferLedger>,
}

impl CommandGenerator {
    pub fn new(store: Arc<DataStore>, ledger: Arc<TransferLedger>) -> Self {
        Self { store, ledger }
    }

    /// Instantiate `descriptor` on `subject` with `args` under the log root
    /// and return the id of its status node.
    ///
    /// With `ref_arg` set, values the peer already holds are attached as
    /// references instead of being sent again. Everything else is nested
    /// as is and marked pending so the next document carries it.
    pub fn generate_command(
        &self,
        descriptor: &NodeId,
        args: &[NodeId],
        subject: &NodeId,
        ref_arg: bool,
    ) -> Result<NodeId> {
        self.store.modify(|tree| -> Result<NodeId> {
            let attributes = {
                let d = tree.get(descriptor)?;
                Attributes::new(d.node_type(), NodeId::default(), d.name())
                    .with_value(d.value())
                    .with_source(descriptor.as_str())
            };
            let log = tree.log_root().clone();
            let command = tree.create_object(Some(&log), attributes)?;

            self.attach(tree, &command, subject, ref_arg)?;
            for arg in args {
                self.attach(tree, &command, arg, ref_arg)?;
            }

            let status = tree.create_object(
                Some(&command),
                Attributes::new(tokens::STATUS, NodeId::default(), StatusState::Start.as_str()),
            )?;
            debug!("command {} created with status {}", command, status);
            Ok(status)
        })
    }

    fn attach(&self, tree: &mut Tree, command: &NodeId, value: &NodeId, ref_arg: bool) -> Result<()> {
        let node = tree.get(value)?;
        if ref_arg && self.ledger.is_transmitted(value) && !node.is_spirit() {
            tree.create_reference(command, value, tokens::CONTENTS)?;
            return Ok(());
        }
        let purged = tree.purge_deleted(value);
        if purged > 0 {
            debug!("purged {} deleted nodes under {}", purged, value);
        }
        tree.link(command, value)?;
        self.ledger.mark_pending(value);
        Ok(())
    }
}
