//! System Error Types

use crate::sink::SinkError;
use bitflags::bitflags;
use imu_driver::{ImuError, ImuFlags};
use obd_protocol::{ObdError, ObdFlags};
use thiserror::Error;

bitflags! {
    /// Fault flags aggregated over one acquisition cycle
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SystemFlags: u32 {
        const UNKNOWN = 1 << 0;
        const CMD = 1 << 1;
        const DATA = 1 << 2;
        const PID = 1 << 3;
        const SPI = 1 << 4;
        const SPI_TX = 1 << 5;
        const SPI_RX = 1 << 6;
        const CAN = 1 << 7;
        const CAN_TX = 1 << 8;
        const CAN_RX = 1 << 9;
        const CAN_FILTER = 1 << 10;
        const UART = 1 << 11;
        const UART_TX = 1 << 12;
        const UART_RX = 1 << 13;
        const UART_DMA = 1 << 14;
        const BUFFER = 1 << 15;
        const TIMEOUT = 1 << 16;
        const ID = 1 << 17;
        const SINK = 1 << 18;
        const TRUNCATED = 1 << 19;
    }
}

impl From<ImuFlags> for SystemFlags {
    fn from(flags: ImuFlags) -> Self {
        let pairs = [
            (ImuFlags::UNKNOWN, SystemFlags::UNKNOWN),
            (ImuFlags::CMD, SystemFlags::CMD),
            (ImuFlags::DATA, SystemFlags::DATA),
            (ImuFlags::SPI, SystemFlags::SPI),
            (ImuFlags::SPI_TX, SystemFlags::SPI_TX),
            (ImuFlags::SPI_RX, SystemFlags::SPI_RX),
            (ImuFlags::TIMEOUT, SystemFlags::TIMEOUT),
            (ImuFlags::ID, SystemFlags::ID),
        ];
        pairs
            .into_iter()
            .filter(|(imu, _)| flags.contains(*imu))
            .fold(SystemFlags::empty(), |acc, (_, system)| acc | system)
    }
}

impl From<ObdFlags> for SystemFlags {
    fn from(flags: ObdFlags) -> Self {
        let pairs = [
            (ObdFlags::UNKNOWN, SystemFlags::UNKNOWN),
            (ObdFlags::CMD, SystemFlags::CMD),
            (ObdFlags::DATA, SystemFlags::DATA),
            (ObdFlags::PID, SystemFlags::PID),
            (ObdFlags::CAN, SystemFlags::CAN),
            (ObdFlags::CAN_TX, SystemFlags::CAN_TX),
            (ObdFlags::CAN_RX, SystemFlags::CAN_RX),
            (ObdFlags::CAN_FILTER, SystemFlags::CAN_FILTER),
            (ObdFlags::UART, SystemFlags::UART),
            (ObdFlags::UART_TX, SystemFlags::UART_TX),
            (ObdFlags::UART_RX, SystemFlags::UART_RX),
            (ObdFlags::UART_DMA, SystemFlags::UART_DMA),
            (ObdFlags::BUFFER, SystemFlags::BUFFER),
            (ObdFlags::TIMEOUT, SystemFlags::TIMEOUT),
        ];
        pairs
            .into_iter()
            .filter(|(obd, _)| flags.contains(*obd))
            .fold(SystemFlags::empty(), |acc, (_, system)| acc | system)
    }
}

/// Errors that stop an acquisition cycle
#[derive(Debug, Error)]
pub enum SystemError {
    /// IMU could not be brought up
    #[error("IMU error: {0}")]
    Imu(#[from] ImuError),

    /// Vehicle bus transport failed
    #[error("Vehicle bus error: {0}")]
    Bus(#[from] ObdError),

    /// Sink rejected the record while sink failures are fatal
    #[error("Sink {name} failed: {source}")]
    Sink {
        name: String,
        #[source]
        source: SinkError,
    },

    /// A fault is latched; cycles are refused until reset
    #[error("Acquisition halted with latched fault {0:?}")]
    Faulted(SystemFlags),
}

impl SystemError {
    /// Fault flags for this error
    pub fn flags(&self) -> SystemFlags {
        match self {
            SystemError::Imu(e) => e.flags().into(),
            SystemError::Bus(e) => e.flags().into(),
            SystemError::Sink { .. } => SystemFlags::SINK,
            SystemError::Faulted(flags) => *flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_flags_map_bit_for_bit() {
        let imu: SystemFlags = (ImuFlags::SPI | ImuFlags::SPI_RX).into();
        assert_eq!(imu, SystemFlags::SPI | SystemFlags::SPI_RX);

        let obd: SystemFlags = ObdError::TxTimeout(1000).flags().into();
        assert_eq!(obd, SystemFlags::CAN | SystemFlags::CAN_TX | SystemFlags::TIMEOUT);

        let all: SystemFlags = ObdFlags::all().into();
        assert!(!all.contains(SystemFlags::SPI));
        assert!(all.contains(SystemFlags::UART_DMA));
    }

    #[test]
    fn test_error_flags() {
        let err = SystemError::from(ImuError::Identification {
            attempts: 10,
            last_id: None,
        });
        assert_eq!(err.flags(), SystemFlags::ID);

        let err = SystemError::Sink {
            name: "vcp".into(),
            source: SinkError::Closed,
        };
        assert_eq!(err.flags(), SystemFlags::SINK);
        assert!(err.to_string().contains("vcp"));
    }
}
