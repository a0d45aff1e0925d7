//! Time source and sleeping, injectable so loop tests run instantly.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

pub trait Clock {
    fn now(&self) -> Instant;
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        debug!(secs = duration.as_secs(), "sleeping");
        thread::sleep(duration);
    }
}
