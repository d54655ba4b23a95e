//! OBD-II Protocol Implementation
//!
//! PID request/response exchange with a vehicle's engine control unit,
//! either as binary frames on a filtered CAN bus or as ASCII lines through
//! an ELM327-compatible adapter. Both drivers implement [`VehicleBus`] and
//! share the PID catalogue, slot layout and response correlation.

mod bus;
mod can;
mod error;
mod pid;
mod protocol;
mod sim;
mod text;

pub use bus::{RequestResponseSlot, VehicleBus};
pub use can::{CanBus, CanConfig, CanFilter, CanFrame, CanQueryDriver, Mailbox};
pub use error::{ObdError, ObdFlags};
pub use pid::{build_table, lookup, Pid, PidDescriptor};
pub use protocol::{
    ascii_to_hex, build_request, text_request, AtCommand, ObdProtocol, Service, EOF, FRAME_LEN,
    PAD_BYTE, REQUEST_ID, RESPONSE_ID_MAX, RESPONSE_ID_MIN, RESPONSE_OFFSET, SOF,
};
pub use sim::{SimulatedCanBus, SimulatedEcu, SimulatedElm, SimulatedUart};
pub use text::{
    decode_frame, Accumulated, DecodedFrame, FrameAccumulator, TextConfig, TextDriver, UartPort,
    ACCUMULATOR_CAPACITY, FORWARD_ATTEMPTS,
};
