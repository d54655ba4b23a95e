//! Telemetry Acquisition
//!
//! Periodic request, process and forward cycle combining IMU samples with
//! OBD-II PID values into one CSV record per cycle.

mod csv;
mod error;
mod machine;
mod runner;
mod sink;
mod state;

pub use csv::{header, CsvFormat, CsvRecord, LineEnding};
pub use error::{SystemError, SystemFlags};
pub use machine::{AcquisitionMachine, CycleReport, MachineConfig};
pub use runner::{tick, CycleRunner, RunFlag, RunnerConfig, StopHandle, StopReason, TickMode};
pub use sink::{ChannelSink, MemorySink, Sink, SinkError, WriterSink};
pub use state::SystemState;
