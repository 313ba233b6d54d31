//! Reconnect backoff

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            factor: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(*self)
    }
}

/// Capped exponential delay between connection attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current_delay: Duration,
    /// Consecutive failed attempts
    failure_count: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_delay: policy.initial_delay(),
            failure_count: 0,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Delay before the next attempt; grows the one after it
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay;
        self.failure_count = self.failure_count.saturating_add(1);
        let grown = delay.mul_f64(self.policy.factor.max(1.0));
        self.current_delay = grown.min(self.policy.max_delay());
        delay
    }

    /// Call after a successful bind
    pub fn reset(&mut self) {
        self.current_delay = self.policy.initial_delay();
        self.failure_count = 0;
    }
}
