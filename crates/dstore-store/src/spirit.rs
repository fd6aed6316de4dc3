//! Spirit eviction.
//!
//! Disconnected nodes are queued with the time they were released. Once the
//! expiry window has passed, a sweep turns them into spirits: attributes stay,
//! children are discarded and must be fetched again over the wire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use dstore_core::NodeId;

use crate::tree::Tree;

/// Counters for eviction bookkeeping. Diagnostic only.
pub trait RemovalMetrics: Send + Sync {
    /// A node was queued for eviction.
    fn queued(&self);

    /// A node was spirited and `discarded` descendants were dropped.
    fn spirited(&self, discarded: usize);
}

/// Metrics that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl RemovalMetrics for NoopMetrics {
    fn queued(&self) {}
    fn spirited(&self, _discarded: usize) {}
}

/// Atomic counters.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    queued: AtomicU64,
    spirited: AtomicU64,
    discarded: AtomicU64,
}

/// A point-in-time copy of [`CountingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemovalCounts {
    pub queued: u64,
    pub spirited: u64,
    pub discarded: u64,
}

impl CountingMetrics {
    pub fn snapshot(&self) -> RemovalCounts {
        RemovalCounts {
            queued: self.queued.load(Ordering::Relaxed),
            spirited: self.spirited.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl RemovalMetrics for CountingMetrics {
    fn queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    fn spirited(&self, discarded: usize) {
        self.spirited.fetch_add(1, Ordering::Relaxed);
        self.discarded.fetch_add(discarded as u64, Ordering::Relaxed);
    }
}

/// Queue of nodes waiting to become spirits.
pub struct SpiritRemover {
    queue: Mutex<VecDeque<(NodeId, Instant)>>,
    expiry: Duration,
    metrics: Arc<dyn RemovalMetrics>,
}

impl SpiritRemover {
    pub fn new(expiry: Duration, metrics: Arc<dyn RemovalMetrics>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            expiry,
            metrics,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Queue a node released now.
    pub fn enqueue(&self, id: NodeId) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((id, Instant::now()));
        self.metrics.queued();
    }

    /// Number of nodes still waiting.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spirit every queued node released at least one expiry window before
    /// `now`. Nodes that have vanished meanwhile are skipped. Returns how
    /// many nodes were spirited.
    pub fn sweep(&self, tree: &mut Tree, now: Instant) -> usize {
        let mut due = Vec::new();
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            while let Some((_, queued_at)) = queue.front() {
                if now.duration_since(*queued_at) < self.expiry {
                    break;
                }
                if let Some((id, _)) = queue.pop_front() {
                    due.push(id);
                }
            }
        }

        let mut spirited = 0;
        for id in due {
            match tree.spirit_node(&id) {
                Ok(discarded) => {
                    debug!("spirited {} ({} descendants dropped)", id, discarded);
                    self.metrics.spirited(discarded);
                    spirited += 1;
                }
                Err(e) => debug!("skipping eviction of {}: {}", id, e),
            }
        }
        spirited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_respects_expiry() {
        let metrics = Arc::new(CountingMetrics::default());
        let remover = SpiritRemover::new(Duration::from_secs(10), metrics.clone());
        let mut tree = Tree::new();
        let host = tree.host_root().clone();
        let a = tree.create(Some(&host), "dir", "a").unwrap();
        tree.create(Some(&a), "f", "child").unwrap();

        remover.enqueue(a.clone());
        assert_eq!(remover.sweep(&mut tree, Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(remover.sweep(&mut tree, Instant::now()), 1);
        assert!(tree.find(a.as_str()).unwrap().is_spirit());
        assert_eq!(remover.pending(), 0);

        let counts = metrics.snapshot();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.spirited, 1);
        assert_eq!(counts.discarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_node_skipped() {
        let remover = SpiritRemover::new(Duration::ZERO, Arc::new(NoopMetrics));
        let mut tree = Tree::new();
        remover.enqueue(NodeId::new("gone"));
        assert_eq!(remover.sweep(&mut tree, Instant::now()), 0);
        assert_eq!(remover.pending(), 0);
    }
}
