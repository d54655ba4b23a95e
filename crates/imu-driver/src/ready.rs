//! Data-Ready Flags
//!
//! Interrupt lines only ever set a flag; the acquisition loop consumes it with
//! a single test-and-clear. There is no queue behind a flag, so a set that is
//! not consumed before the next set is merged into it.

use crate::driver::Channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-bit readiness signal with read-clear semantics
#[derive(Debug, Default)]
pub struct ReadyFlag {
    ready: AtomicBool,
}

impl ReadyFlag {
    /// Create a cleared flag
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    /// Mark data as ready (producer side)
    pub fn set(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Consume the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.ready.swap(false, Ordering::AcqRel)
    }

    /// Observe the flag without consuming it
    pub fn is_set(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct Flags {
    accel: ReadyFlag,
    gyro: ReadyFlag,
    temperature: ReadyFlag,
}

/// Cloneable handle to the IMU readiness flags
///
/// INT1 carries accelerometer data-ready; INT2 carries gyroscope data-ready,
/// which also marks a fresh temperature sample.
#[derive(Debug, Clone, Default)]
pub struct ImuInterrupts {
    flags: Arc<Flags>,
}

impl ImuInterrupts {
    /// Create a set of cleared flags
    pub fn new() -> Self {
        Self::default()
    }

    /// INT1 edge handler
    pub fn on_int1(&self) {
        self.flags.accel.set();
    }

    /// INT2 edge handler
    pub fn on_int2(&self) {
        self.flags.gyro.set();
        self.flags.temperature.set();
    }

    /// Flag for one channel
    pub fn flag(&self, channel: Channel) -> &ReadyFlag {
        match channel {
            Channel::Accelerometer => &self.flags.accel,
            Channel::Gyroscope => &self.flags.gyro,
            Channel::Temperature => &self.flags.temperature,
        }
    }

    /// Test-and-clear the flag for one channel
    pub fn take(&self, channel: Channel) -> bool {
        self.flag(channel).take()
    }
}
