//! Single-writer access to a tree.
//!
//! Every mutation goes through [`DataStore::modify`], which holds the write
//! guard for the whole closure and then wakes anyone waiting on a status.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use dstore_core::{Node, NodeId, StatusState};

use crate::error::{Result, StoreError};
use crate::spirit::{NoopMetrics, RemovalMetrics, SpiritRemover};
use crate::tree::Tree;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Whether disconnected nodes are evicted.
    pub spirit_enabled: bool,
    /// How long a disconnected node survives before it is spirited.
    pub spirit_expiry: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            spirit_enabled: false,
            spirit_expiry: Duration::from_secs(60),
        }
    }
}

/// A tree shared between a receiver and any number of callers.
pub struct DataStore {
    tree: RwLock<Tree>,
    changed: Notify,
    remover: SpiritRemover,
    config: StoreConfig,
}

impl DataStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a store reporting eviction to `metrics`.
    pub fn with_metrics(config: StoreConfig, metrics: Arc<dyn RemovalMetrics>) -> Self {
        Self {
            tree: RwLock::new(Tree::new()),
            changed: Notify::new(),
            remover: SpiritRemover::new(config.spirit_expiry, metrics),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared view of the tree.
    pub fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access, then notify waiters.
    pub fn modify<T>(&self, f: impl FnOnce(&mut Tree) -> T) -> T {
        let out = {
            let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut tree)
        };
        self.changed.notify_waiters();
        out
    }

    /// A copy of one node.
    pub fn find(&self, id: &str) -> Option<Node> {
        self.read().find(id).cloned()
    }

    /// Wait until the status node reaches `state` or a terminal state.
    ///
    /// On timeout the status node's name and value become `timeout`, so
    /// later readers see the terminal state, and [`StoreError::Timeout`] is
    /// returned.
    pub async fn wait_until(
        &self,
        status: &NodeId,
        state: StatusState,
        timeout: Duration,
    ) -> Result<StatusState> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = self.read().status_state(status)?;
            if current == state || current.is_terminal() {
                return Ok(current);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("wait on {} timed out in state {}", status, current);
                self.modify(|tree| {
                    if let Some(node) = tree.find_mut(status.as_str()) {
                        node.set_name(StatusState::Timeout.as_str());
                        node.set_value(StatusState::Timeout.as_str());
                    }
                });
                return Err(StoreError::Timeout(status.clone()));
            }
        }
    }

    /// Release a node. With spirit mode on it is queued for eviction.
    pub fn disconnect_object(&self, id: &NodeId) -> Result<()> {
        self.read().get(id)?;
        if self.config.spirit_enabled {
            self.remover.enqueue(id.clone());
        }
        Ok(())
    }

    /// Spirit every node whose expiry window has passed.
    pub fn sweep_spirits(&self) -> usize {
        let now = Instant::now();
        self.modify(|tree| self.remover.sweep(tree, now))
    }

    pub fn pending_spirits(&self) -> usize {
        self.remover.pending()
    }

    /// Periodically sweep expired nodes. Returns `None` when spirit mode is off.
    pub fn spawn_remover(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.spirit_enabled {
            return None;
        }
        let store = Arc::clone(self);
        let period = self.config.spirit_expiry.max(Duration::from_millis(10));
        info!("spirit remover running every {:?}", period);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                store.sweep_spirits();
            }
        }))
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
