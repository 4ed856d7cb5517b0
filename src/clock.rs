//! Monotonic time source for the event loop.
//!
//! Scattering `Instant::now()` across the connection engine makes timeout
//! behaviour impossible to drive deterministically in tests. Every place
//! that needs "now" goes through a `Clock` instead.

use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock tests can advance by hand without sleeping real wall-clock time.
#[derive(Debug, Clone)]
pub struct FakeClock {
    base: Instant,
    offset: Duration,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Duration::ZERO,
        }
    }

    pub fn advance(&mut self, d: Duration) {
        self.offset += d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.offset
    }
}
