//! Simulated IMU
//!
//! In-memory register file behind the `embedded-hal` SPI device contract.
//! Used by tests and by the node's simulated mode.

use crate::registers::{status, RegisterAddress, READ_MASK, WRITE_MASK};
use crate::SENSOR_ID;
use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation, SpiDevice};
use std::sync::{Arc, Mutex, MutexGuard};

const REGISTER_COUNT: usize = 0x80;

/// Error raised by the simulated bus when a fault is injected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedSpiError;

impl spi::Error for SimulatedSpiError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Debug)]
struct Device {
    registers: [u8; REGISTER_COUNT],
    writes: Vec<(u8, u8)>,
    transactions: usize,
    fault: bool,
}

impl Device {
    fn execute(&mut self, write: &[u8], read: Option<&mut [u8]>) {
        let Some(&command) = write.first() else {
            return;
        };
        let address = (command & WRITE_MASK) as usize;

        if command & READ_MASK != 0 {
            if let Some(read) = read {
                for (i, byte) in read.iter_mut().enumerate().skip(1) {
                    *byte = self.registers[(address + i - 1) % REGISTER_COUNT];
                }
                if let Some(first) = read.first_mut() {
                    *first = 0;
                }
            }
        } else {
            for (i, &value) in write.iter().enumerate().skip(1) {
                let register = (address + i - 1) % REGISTER_COUNT;
                if register != RegisterAddress::WhoAmI.addr() as usize {
                    self.registers[register] = value;
                }
                self.writes.push((register as u8, value));
            }
        }
    }
}

/// Simulated ASM330LHH
///
/// Reports `WHO_AM_I = 0x6B` and all data-available bits by default.
#[derive(Debug)]
pub struct SimulatedImu {
    device: Arc<Mutex<Device>>,
}

impl SimulatedImu {
    /// Create a device in its power-on state
    pub fn new() -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        registers[RegisterAddress::WhoAmI.addr() as usize] = SENSOR_ID;
        registers[RegisterAddress::StatusReg.addr() as usize] =
            status::XLDA | status::GDA | status::TDA;

        Self {
            device: Arc::new(Mutex::new(Device {
                registers,
                writes: Vec::new(),
                transactions: 0,
                fault: false,
            })),
        }
    }

    /// Control handle sharing this device's state
    pub fn handle(&self) -> SimulatedImuHandle {
        SimulatedImuHandle {
            device: self.device.clone(),
        }
    }
}

impl Default for SimulatedImu {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for SimulatedImu {
    type Error = SimulatedSpiError;
}

impl SpiDevice for SimulatedImu {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        let mut device = lock(&self.device);
        device.transactions += 1;
        if device.fault {
            return Err(SimulatedSpiError);
        }

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(write) => device.execute(write, None),
                Operation::Transfer(read, write) => device.execute(write, Some(&mut read[..])),
                Operation::TransferInPlace(buf) => {
                    let write = buf.to_vec();
                    device.execute(&write, Some(&mut buf[..]));
                }
                Operation::Read(read) => read.fill(0),
                Operation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}

/// Test-side view of a [`SimulatedImu`]
#[derive(Debug, Clone)]
pub struct SimulatedImuHandle {
    device: Arc<Mutex<Device>>,
}

impl SimulatedImuHandle {
    /// Current value of a register
    pub fn register(&self, register: RegisterAddress) -> u8 {
        lock(&self.device).registers[register.addr() as usize]
    }

    /// Overwrite a register
    pub fn set_register(&self, register: RegisterAddress, value: u8) {
        lock(&self.device).registers[register.addr() as usize] = value;
    }

    /// Value reported by WHO_AM_I
    pub fn set_who_am_i(&self, id: u8) {
        self.set_register(RegisterAddress::WhoAmI, id);
    }

    /// STATUS_REG contents
    pub fn set_status(&self, value: u8) {
        self.set_register(RegisterAddress::StatusReg, value);
    }

    /// Raw accelerometer output
    pub fn set_accel_raw(&self, axes: [i16; 3]) {
        self.set_words(RegisterAddress::OutxLA, &axes);
    }

    /// Raw gyroscope output
    pub fn set_gyro_raw(&self, axes: [i16; 3]) {
        self.set_words(RegisterAddress::OutxLG, &axes);
    }

    /// Raw temperature output
    pub fn set_temperature_raw(&self, raw: i16) {
        self.set_words(RegisterAddress::OutTempL, &[raw]);
    }

    /// Make every following transaction fail (or succeed again)
    pub fn set_fault(&self, fault: bool) {
        lock(&self.device).fault = fault;
    }

    /// Every (register, value) pair written so far
    pub fn writes(&self) -> Vec<(u8, u8)> {
        lock(&self.device).writes.clone()
    }

    /// Number of SPI transactions attempted
    pub fn transactions(&self) -> usize {
        lock(&self.device).transactions
    }

    fn set_words(&self, start: RegisterAddress, words: &[i16]) {
        let mut device = lock(&self.device);
        let base = start.addr() as usize;
        for (i, word) in words.iter().enumerate() {
            let [lo, hi] = word.to_le_bytes();
            device.registers[base + 2 * i] = lo;
            device.registers[base + 2 * i + 1] = hi;
        }
    }
}

fn lock(device: &Mutex<Device>) -> MutexGuard<'_, Device> {
    device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
