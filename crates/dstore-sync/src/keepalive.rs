//! Keep-alive negotiation and liveness probing.
//!
//! At connection start the watchdog waits up to the response timeout for a
//! keep-alive record from the peer. If one arrives the peer is capable: from
//! then on an idle read longer than the probe interval sends a probe, and a
//! second idle period while the probe is outstanding kills the connection.
//! If none arrives the peer is incapable and reads block indefinitely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// Keep-alive configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    /// Idle time before a probe is sent.
    pub probe_interval: Duration,
    /// How long to wait for a confirmation, and for negotiation.
    pub response_timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval: Duration::from_secs(120),
            response_timeout: Duration::from_secs(60),
        }
    }
}

/// The outgoing side as seen by the receiving side.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_keep_alive_request(&self) -> Result<()>;

    async fn send_keep_alive_confirmation(&self) -> Result<()>;

    /// Answer a class request.
    async fn send_class(&self, class_name: &str) -> Result<()>;
}

/// Negotiated liveness mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveMode {
    Negotiating { deadline: Instant },
    Capable,
    Incapable,
}

/// Liveness state of one connection's input side.
pub struct Watchdog {
    config: KeepAliveConfig,
    mode: KeepAliveMode,
    probe_outstanding: bool,
    probes_sent: u64,
    outbound: Arc<dyn Outbound>,
}

impl Watchdog {
    /// Start negotiating now, or start incapable if keep-alive is off.
    pub fn new(config: KeepAliveConfig, outbound: Arc<dyn Outbound>) -> Self {
        let mode = if config.enabled {
            KeepAliveMode::Negotiating {
                deadline: Instant::now() + config.response_timeout,
            }
        } else {
            KeepAliveMode::Incapable
        };
        Self {
            config,
            mode,
            probe_outstanding: false,
            probes_sent: 0,
            outbound,
        }
    }

    pub fn mode(&self) -> KeepAliveMode {
        self.mode
    }

    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    /// How long the next read may block, or `None` for no limit.
    pub fn read_budget(&self) -> Option<Duration> {
        match self.mode {
            KeepAliveMode::Negotiating { deadline } => {
                Some(deadline.saturating_duration_since(Instant::now()))
            }
            KeepAliveMode::Capable if self.probe_outstanding => Some(self.config.response_timeout),
            KeepAliveMode::Capable => Some(self.config.probe_interval),
            KeepAliveMode::Incapable => None,
        }
    }

    /// Bytes arrived; any outstanding probe is answered.
    pub fn on_input(&mut self) {
        self.probe_outstanding = false;
    }

    /// A keep-alive record arrived from the peer.
    pub fn on_keep_alive(&mut self) {
        if let KeepAliveMode::Negotiating { .. } = self.mode {
            info!("peer supports keep-alive");
            self.mode = KeepAliveMode::Capable;
        }
        self.probe_outstanding = false;
    }

    /// A read used up its whole budget.
    pub async fn on_idle(&mut self) -> Result<()> {
        match self.mode {
            KeepAliveMode::Negotiating { .. } => {
                info!("peer did not negotiate keep-alive; reads will block");
                self.mode = KeepAliveMode::Incapable;
                Ok(())
            }
            KeepAliveMode::Capable if self.probe_outstanding => {
                warn!("keep-alive probe unanswered");
                Err(SyncError::KeepAliveTimeout)
            }
            KeepAliveMode::Capable => {
                debug!("input idle, sending keep-alive probe");
                // The writer may be stuck behind a peer that stopped reading.
                let send = self.outbound.send_keep_alive_request();
                match tokio::time::timeout(self.config.response_timeout, send).await {
                    Ok(sent) => sent?,
                    Err(_) => {
                        warn!("keep-alive request could not be written");
                        return Err(SyncError::KeepAliveTimeout);
                    }
                }
                self.probe_outstanding = true;
                self.probes_sent += 1;
                Ok(())
            }
            KeepAliveMode::Incapable => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingOutbound {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl Outbound for CountingOutbound {
        async fn send_keep_alive_request(&self) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_keep_alive_confirmation(&self) -> Result<()> {
            Ok(())
        }

        async fn send_class(&self, _class_name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_negotiation_timeout_makes_incapable() {
        let out = Arc::new(CountingOutbound::default());
        let mut dog = Watchdog::new(KeepAliveConfig::default(), out.clone());
        assert!(matches!(dog.mode(), KeepAliveMode::Negotiating { .. }));

        dog.on_idle().await.unwrap();
        assert_eq!(dog.mode(), KeepAliveMode::Incapable);
        assert_eq!(dog.read_budget(), None);
        assert_eq!(out.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_idle_is_fatal() {
        let out = Arc::new(CountingOutbound::default());
        let mut dog = Watchdog::new(KeepAliveConfig::default(), out.clone());
        dog.on_keep_alive();
        assert_eq!(dog.mode(), KeepAliveMode::Capable);
        assert_eq!(dog.read_budget(), Some(Duration::from_secs(120)));

        dog.on_idle().await.unwrap();
        assert_eq!(out.requests.load(Ordering::SeqCst), 1);
        assert_eq!(dog.read_budget(), Some(Duration::from_secs(60)));

        assert!(matches!(dog.on_idle().await, Err(SyncError::KeepAliveTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_cancels_probe() {
        let out = Arc::new(CountingOutbound::default());
        let mut dog = Watchdog::new(KeepAliveConfig::default(), out.clone());
        dog.on_keep_alive();
        dog.on_idle().await.unwrap();
        dog.on_input();
        dog.on_idle().await.unwrap();
        assert_eq!(dog.probes_sent(), 2);
    }

    /// An outbound whose writer never makes progress.
    struct StalledOutbound;

    #[async_trait]
    impl Outbound for StalledOutbound {
        async fn send_keep_alive_request(&self) -> Result<()> {
            std::future::pending().await
        }

        async fn send_keep_alive_confirmation(&self) -> Result<()> {
            std::future::pending().await
        }

        async fn send_class(&self, _class_name: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_writer_is_fatal() {
        let mut dog = Watchdog::new(KeepAliveConfig::default(), Arc::new(StalledOutbound));
        dog.on_keep_alive();

        let started = Instant::now();
        assert!(matches!(dog.on_idle().await, Err(SyncError::KeepAliveTimeout)));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(dog.probes_sent(), 0);
    }

    #[test]
    fn test_disabled_starts_incapable() {
        let config = KeepAliveConfig {
            enabled: false,
            ..KeepAliveConfig::default()
        };
        let dog = Watchdog::new(config, Arc::new(CountingOutbound::default()));
        assert_eq!(dog.mode(), KeepAliveMode::Incapable);
    }
}
