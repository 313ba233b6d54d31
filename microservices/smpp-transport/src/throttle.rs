//! Throttle controller and the acceptance gate it drives
//!
//! The gate decides whether the bus consumer may take the next outbound
//! message. It is open only while no pause reason is active, so the session
//! and the throttle can close it independently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::metrics::TransportMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// No bound session
    Disconnected,
    /// Peer asked us to slow down
    Throttled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PauseReasons {
    disconnected: bool,
    throttled: bool,
}

impl PauseReasons {
    fn slot(&mut self, reason: PauseReason) -> &mut bool {
        match reason {
            PauseReason::Disconnected => &mut self.disconnected,
            PauseReason::Throttled => &mut self.throttled,
        }
    }

    fn is_open(&self) -> bool {
        !self.disconnected && !self.throttled
    }
}

#[derive(Debug, Clone)]
pub struct AcceptanceGate {
    reasons: Arc<watch::Sender<PauseReasons>>,
}

impl AcceptanceGate {
    /// Starts closed: nothing is accepted before the first connection
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PauseReasons {
            disconnected: true,
            throttled: false,
        });
        Self { reasons: Arc::new(tx) }
    }

    pub fn pause(&self, reason: PauseReason) {
        self.reasons.send_if_modified(|reasons| {
            let slot = reasons.slot(reason);
            let changed = !*slot;
            *slot = true;
            changed
        });
    }

    pub fn resume(&self, reason: PauseReason) {
        self.reasons.send_if_modified(|reasons| {
            let slot = reasons.slot(reason);
            let changed = *slot;
            *slot = false;
            changed
        });
    }

    pub fn is_open(&self) -> bool {
        self.reasons.borrow().is_open()
    }

    pub fn is_paused_for(&self, reason: PauseReason) -> bool {
        let mut reasons = *self.reasons.borrow();
        *reasons.slot(reason)
    }

    /// Resolves once every pause reason has been lifted
    pub async fn wait_open(&self) {
        let mut rx = self.reasons.subscribe();
        // The sender lives as long as self, so the channel cannot close here
        let _ = rx.wait_for(PauseReasons::is_open).await;
    }
}

impl Default for AcceptanceGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Instance-wide "peer is throttling us" flag
#[derive(Debug)]
pub struct Throttle {
    engaged: AtomicBool,
    gate: AcceptanceGate,
    metrics: Arc<TransportMetrics>,
}

impl Throttle {
    pub fn new(gate: AcceptanceGate, metrics: Arc<TransportMetrics>) -> Self {
        Self {
            engaged: AtomicBool::new(false),
            gate,
            metrics,
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Returns true when this call changed the state
    pub fn engage(&self) -> bool {
        if self
            .engaged
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        warn!("Throttling outbound messages");
        self.metrics.throttled.set_flag(true);
        self.gate.pause(PauseReason::Throttled);
        true
    }

    /// Returns true when this call changed the state
    pub fn clear(&self) -> bool {
        if self
            .engaged
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        info!("No longer throttling outbound messages");
        self.metrics.throttled.set_flag(false);
        self.gate.resume(PauseReason::Throttled);
        true
    }
}
