//! Connection lifecycle shared by the sending and receiving sides.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::Notify;
use tracing::debug;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Connecting,
            1 => Phase::Active,
            2 => Phase::Closing,
            _ => Phase::Closed,
        }
    }
}

/// Phase, finish signal and error latch of one connection.
#[derive(Debug)]
pub struct ConnectionState {
    phase: AtomicU8,
    finish: Notify,
    finish_requested: AtomicBool,
    error_reported: AtomicBool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Connecting as u8),
            finish: Notify::new(),
            finish_requested: AtomicBool::new(false),
            error_reported: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Connecting -> Active. No effect in any other phase.
    pub fn activate(&self) {
        if self
            .phase
            .compare_exchange(
                Phase::Connecting as u8,
                Phase::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!("connection active");
        }
    }

    /// Move to Closing unless already closed.
    pub fn begin_close(&self) {
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                (p < Phase::Closing as u8).then_some(Phase::Closing as u8)
            });
    }

    pub fn close(&self) {
        if self.phase.swap(Phase::Closed as u8, Ordering::AcqRel) != Phase::Closed as u8 {
            debug!("connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Ask the receive loop to stop after the record in flight.
    pub fn request_finish(&self) {
        self.finish_requested.store(true, Ordering::Release);
        self.finish.notify_one();
    }

    pub fn finish_requested(&self) -> bool {
        self.finish_requested.load(Ordering::Acquire)
    }

    /// Resolves once [`request_finish`](Self::request_finish) has been called.
    pub async fn finished(&self) {
        if self.finish_requested() {
            return;
        }
        self.finish.notified().await;
    }

    /// True the first time only. Lets exactly one side report a fatal error.
    pub fn report_error_once(&self) -> bool {
        !self.error_reported.swap(true, Ordering::AcqRel)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
