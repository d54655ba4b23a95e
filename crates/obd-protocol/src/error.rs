//! OBD-II Error Types

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Fault categories reported by the vehicle bus drivers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObdFlags: u16 {
        const UNKNOWN = 1 << 0;
        const CMD = 1 << 1;
        const DATA = 1 << 2;
        const PID = 1 << 3;
        const CAN = 1 << 4;
        const CAN_TX = 1 << 5;
        const CAN_RX = 1 << 6;
        const CAN_FILTER = 1 << 7;
        const UART = 1 << 8;
        const UART_TX = 1 << 9;
        const UART_RX = 1 << 10;
        const UART_DMA = 1 << 11;
        const BUFFER = 1 << 12;
        const TIMEOUT = 1 << 13;
    }
}

/// Errors that can occur during OBD-II communication
#[derive(Debug, Clone, Error)]
pub enum ObdError {
    /// PID is not in the configured table
    #[error("PID {0:02X} not in the configured table")]
    UnsupportedPid(u8),

    /// Slot index outside the configured table
    #[error("No request slot {0}")]
    InvalidSlot(usize),

    /// Driver used before `init`
    #[error("Vehicle bus driver not initialized")]
    NotInitialized,

    /// CAN acceptance filter could not be configured
    #[error("CAN filter configuration failed: {0}")]
    Filter(String),

    /// CAN controller start/stop failed
    #[error("CAN controller error: {0}")]
    Controller(String),

    /// Request could not be queued for transmission
    #[error("CAN transmit enqueue failed: {0}")]
    TxEnqueue(String),

    /// Transmit mailbox still pending at the deadline
    #[error("Timeout after {0}ms waiting for CAN transmit")]
    TxTimeout(u64),

    /// No frame arrived before the deadline
    #[error("Timeout after {0}ms waiting for CAN response")]
    RxTimeout(u64),

    /// Frame signalled but could not be read
    #[error("CAN receive failed: {0}")]
    RxBuffer(String),

    /// Response does not answer the request in its slot
    #[error("Unknown response in slot {slot}: service {service:02X}, PID {pid:02X}")]
    UnknownResponse { slot: usize, service: u8, pid: u8 },

    /// UART write failed
    #[error("UART transmit failed: {0}")]
    UartWrite(String),

    /// Forwarding gave up after all retries
    #[error("UART transmit failed after {attempts} attempts")]
    UartRetriesExhausted { attempts: u8 },

    /// UART reception could not be armed or read
    #[error("UART receive failed: {0}")]
    UartReceive(String),

    /// No complete frame before the deadline
    #[error("Timeout after {0}ms waiting for adapter response")]
    UartTimeout(u64),

    /// Text frame is not a sequence of hex byte pairs
    #[error("Invalid response frame: {0}")]
    InvalidFrame(String),
}

impl ObdError {
    /// Fault flags for this error
    pub fn flags(&self) -> ObdFlags {
        match self {
            ObdError::UnsupportedPid(_) => ObdFlags::CMD | ObdFlags::PID,
            ObdError::InvalidSlot(_) | ObdError::NotInitialized => ObdFlags::CMD,
            ObdError::Filter(_) => ObdFlags::CAN | ObdFlags::CAN_FILTER,
            ObdError::Controller(_) => ObdFlags::CAN,
            ObdError::TxEnqueue(_) => ObdFlags::CAN | ObdFlags::CAN_TX | ObdFlags::BUFFER,
            ObdError::TxTimeout(_) => ObdFlags::CAN | ObdFlags::CAN_TX | ObdFlags::TIMEOUT,
            ObdError::RxTimeout(_) => ObdFlags::CAN | ObdFlags::CAN_RX | ObdFlags::TIMEOUT,
            ObdError::RxBuffer(_) => ObdFlags::CAN | ObdFlags::CAN_RX | ObdFlags::BUFFER,
            ObdError::UnknownResponse { .. } => ObdFlags::UNKNOWN,
            ObdError::UartWrite(_) | ObdError::UartRetriesExhausted { .. } => {
                ObdFlags::UART | ObdFlags::UART_TX
            }
            ObdError::UartReceive(_) => ObdFlags::UART | ObdFlags::UART_RX | ObdFlags::UART_DMA,
            ObdError::UartTimeout(_) => ObdFlags::UART | ObdFlags::UART_RX | ObdFlags::TIMEOUT,
            ObdError::InvalidFrame(_) => ObdFlags::DATA,
        }
    }

    /// Whether the error came from the CAN or UART transport
    ///
    /// Transport faults abandon the acquisition cycle; the rest only leave
    /// a field unresolved.
    pub fn is_transport(&self) -> bool {
        self.flags().intersects(ObdFlags::CAN | ObdFlags::UART)
    }
}
