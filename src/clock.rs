//! Monotonic time source for request deadlines.
//!
//! The session never reads the system clock directly; it asks a `Clock`.
//! Production code uses [`MonotonicClock`], tests drive time by hand.

use core::time::Duration;
use std::time::Instant;

/// Monotonic time since an arbitrary fixed origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// `Instant`-backed clock; the origin is creation time.
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}
