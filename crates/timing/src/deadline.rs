//! Transaction Deadlines

use crate::Clock;
use std::time::Duration;

/// Shortest delay between polls of a pending transaction
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Poll interval for a millisecond setting, never below [`MIN_POLL_INTERVAL`]
///
/// A zero interval would never advance a simulated clock.
pub fn poll_interval(ms: u64) -> Duration {
    Duration::from_millis(ms).max(MIN_POLL_INTERVAL)
}

/// Point in clock time after which a blocking transaction gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Duration,
    timeout: Duration,
}

impl Deadline {
    /// Start a deadline `timeout` from the clock's current time
    pub fn after<C: Clock + ?Sized>(clock: &C, timeout: Duration) -> Self {
        Self {
            start: clock.now(),
            timeout,
        }
    }

    /// Whether the deadline has passed
    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        self.elapsed(clock) > self.timeout
    }

    /// Time since the deadline was started
    pub fn elapsed<C: Clock + ?Sized>(&self, clock: &C) -> Duration {
        clock.now().saturating_sub(self.start)
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining<C: Clock + ?Sized>(&self, clock: &C) -> Duration {
        self.timeout.saturating_sub(self.elapsed(clock))
    }

    /// The configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimClock;
    use proptest::prelude::*;

    #[test]
    fn test_poll_interval_is_clamped() {
        assert_eq!(poll_interval(0), MIN_POLL_INTERVAL);
        assert_eq!(poll_interval(1), Duration::from_millis(1));
        assert_eq!(poll_interval(25), Duration::from_millis(25));
    }

    #[test]
    fn test_deadline_expiry() {
        let clock = SimClock::new();
        let deadline = Deadline::after(&clock, Duration::from_millis(100));

        clock.advance(Duration::from_millis(100));
        assert!(!deadline.expired(&clock));

        clock.advance(Duration::from_millis(1));
        assert!(deadline.expired(&clock));
        assert_eq!(deadline.remaining(&clock), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn test_polling_loop_terminates(timeout_ms in 1u64..5_000, step_ms in 1u64..50) {
            let clock = SimClock::new();
            let deadline = Deadline::after(&clock, Duration::from_millis(timeout_ms));
            let mut polls = 0u64;
            while !deadline.expired(&clock) {
                clock.sleep(Duration::from_millis(step_ms));
                polls += 1;
            }
            prop_assert!(polls <= timeout_ms / step_ms + 1);
        }
    }
}
