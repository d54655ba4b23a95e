//! Acquisition Cycle States

use serde::Serialize;
use std::fmt;

/// Step of the acquisition cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// Waiting for the next cycle
    Idle,
    /// Reading accelerometer, gyroscope and temperature
    RequestImu,
    /// Exchanging one request/response per configured PID
    RequestBus,
    /// Second readiness check for channels missed in interrupt mode
    WaitImu,
    /// Building the CSV record
    Process,
    /// Delivering the record to every sink
    Forward,
    /// Fault latched, drivers shut down
    Error,
}

impl SystemState {
    /// Whether the machine has latched a fault
    pub fn is_error(&self) -> bool {
        matches!(self, SystemState::Error)
    }
}

impl Default for SystemState {
    fn default() -> Self {
        SystemState::Idle
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemState::Idle => "idle",
            SystemState::RequestImu => "request_imu",
            SystemState::RequestBus => "request_bus",
            SystemState::WaitImu => "wait_imu",
            SystemState::Process => "process",
            SystemState::Forward => "forward",
            SystemState::Error => "error",
        };
        f.write_str(name)
    }
}
