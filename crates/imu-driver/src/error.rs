//! IMU Error Types

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Fault categories reported by the IMU driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImuFlags: u16 {
        const UNKNOWN = 1 << 0;
        const CMD = 1 << 1;
        const DATA = 1 << 2;
        const SPI = 1 << 3;
        const SPI_TX = 1 << 4;
        const SPI_RX = 1 << 5;
        const TIMEOUT = 1 << 6;
        const ID = 1 << 7;
    }
}

/// Errors that can occur while talking to the IMU
#[derive(Debug, Clone, Error)]
pub enum ImuError {
    /// Register access outside the command buffer
    #[error("Invalid register access: {count} bytes at {address:#04X}")]
    InvalidLength { address: u8, count: usize },

    /// Full-duplex read transfer failed
    #[error("SPI read transfer failed: {0}")]
    ReadTransfer(String),

    /// Write transfer failed
    #[error("SPI write transfer failed: {0}")]
    WriteTransfer(String),

    /// Data-available bit never set
    #[error("Timed out after {0}ms waiting for IMU data")]
    Timeout(u64),

    /// WHO_AM_I never matched
    #[error("IMU identification failed after {attempts} attempts (last id {last_id:?})")]
    Identification { attempts: u8, last_id: Option<u8> },
}

impl ImuError {
    /// Fault flags for this error
    pub fn flags(&self) -> ImuFlags {
        match self {
            ImuError::InvalidLength { .. } => ImuFlags::CMD | ImuFlags::DATA,
            ImuError::ReadTransfer(_) => ImuFlags::SPI | ImuFlags::SPI_TX | ImuFlags::SPI_RX,
            ImuError::WriteTransfer(_) => ImuFlags::SPI | ImuFlags::SPI_TX,
            ImuError::Timeout(_) => ImuFlags::TIMEOUT,
            ImuError::Identification { .. } => ImuFlags::ID,
        }
    }

    /// Whether the error came from the SPI transport itself
    pub fn is_bus_fault(&self) -> bool {
        self.flags().contains(ImuFlags::SPI)
    }
}
