//! Bike-off detection
//!
//! The ECU talks continuously while the ignition is on. When the line stays
//! silent for longer than the timeout the session is over and everything
//! synchronized to it must start from scratch on the next power-on.

use tracing::info;

pub struct LivenessMonitor {
    timeout_ms: u64,
    last_byte_ms: Option<u64>,
    enabled: bool,
}

impl LivenessMonitor {
    pub fn new(timeout_ms: u64, enabled: bool) -> Self {
        Self {
            timeout_ms,
            last_byte_ms: None,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Time of the last bus byte, `None` outside a session
    pub fn last_byte_ms(&self) -> Option<u64> {
        self.last_byte_ms
    }

    /// Record bus activity
    pub fn touch(&mut self, now_ms: u64) {
        self.last_byte_ms = Some(now_ms);
    }

    /// True exactly once when an active session has timed out
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.enabled {
            return false;
        }

        let Some(last) = self.last_byte_ms else {
            return false;
        };

        let silent = now_ms.saturating_sub(last);
        if silent > self.timeout_ms {
            info!("Bus silent for {}ms, session ended", silent);
            self.last_byte_ms = None;
            true
        } else {
            false
        }
    }
}
