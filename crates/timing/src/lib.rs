//! Bus Timing
//!
//! Provides the monotonic clock and sleep capability that every blocking bus
//! transaction is measured against. Drivers take a [`Clock`] so the same wait
//! loops run on wall time in production and on virtual time under test.

mod clock;
mod deadline;

pub use clock::{Clock, SimClock, SystemClock};
pub use deadline::{poll_interval, Deadline, MIN_POLL_INTERVAL};
