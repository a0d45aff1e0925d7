//! Wall-clock budget and wait policy for the fix loop.

use std::time::{Duration, Instant};

/// Multiple of the poll interval waited before extracting failure details,
/// so extraction does not race the CI system publishing its own logs.
pub const GRACE_PERIOD_POLL_MULTIPLIER: u32 = 3;

/// Wall-clock budget for a whole run, measured from `started`.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    started: Instant,
    limit: Duration,
}

impl Budget {
    pub fn new(started: Instant, limit: Duration) -> Self {
        Self { started, limit }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// True once elapsed time is strictly greater than the limit.
    pub fn is_exceeded(&self, now: Instant) -> bool {
        self.elapsed(now) > self.limit
    }

    /// Remaining time until the limit, zero once exhausted.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.limit.saturating_sub(self.elapsed(now))
    }
}

/// Wait applied before failure extraction. Saturates instead of overflowing.
pub fn grace_period(poll_interval: Duration) -> Duration {
    poll_interval.saturating_mul(GRACE_PERIOD_POLL_MULTIPLIER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_not_exceeded_at_the_limit() {
        let start = Instant::now();
        let budget = Budget::new(start, Duration::from_secs(60));
        assert!(!budget.is_exceeded(start + Duration::from_secs(60)));
        assert!(budget.is_exceeded(start + Duration::from_secs(61)));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let start = Instant::now();
        let budget = Budget::new(start, Duration::from_secs(10));
        assert_eq!(
            budget.remaining(start + Duration::from_secs(4)),
            Duration::from_secs(6)
        );
        assert_eq!(budget.remaining(start + Duration::from_secs(30)), Duration::ZERO);
    }

    #[test]
    fn grace_period_is_three_poll_intervals() {
        assert_eq!(
            grace_period(Duration::from_secs(30)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn grace_period_saturates_on_huge_intervals() {
        assert_eq!(grace_period(Duration::MAX), Duration::MAX);
        assert_eq!(
            grace_period(Duration::from_secs(u64::MAX / 2)),
            Duration::MAX
        );
    }
}
