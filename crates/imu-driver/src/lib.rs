//! IMU Register Driver
//!
//! Half-duplex register protocol for the ASM330LHH accelerometer/gyroscope
//! over SPI. The driver owns its command and response buffers, converts raw
//! register pairs into physical units, and supports both status-register
//! polling and interrupt-driven readiness.

mod driver;
mod error;
mod ready;
mod registers;
mod scale;
mod sim;

pub use driver::{
    AcquisitionMode, Channel, ImuConfig, ImuDriver, InertialSensor, SensorSample, Vec3,
};
pub use error::{ImuError, ImuFlags};
pub use ready::{ImuInterrupts, ReadyFlag};
pub use registers::{status, RegisterAddress, READ_MASK, WRITE_MASK};
pub use scale::{temperature_c, AccelRange, GyroRange, OutputDataRate};
pub use sim::{SimulatedImu, SimulatedImuHandle, SimulatedSpiError};

/// Expected `WHO_AM_I` value for the ASM330LHH
pub const SENSOR_ID: u8 = 0x6B;

/// Command + payload buffer size in bytes
pub const BUFFER_SIZE: usize = 8;
