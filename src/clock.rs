//! Monotonic millisecond time source
//!
//! The gateway never reads the wall clock directly so that liveness and
//! housekeeping can be driven deterministically in tests.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Milliseconds since an arbitrary fixed origin
pub trait TimeSource {
    fn now_ms(&self) -> u64;
}

/// Time since process start
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Rc<Cell<u64>>,
}

impl MockClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl TimeSource for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
