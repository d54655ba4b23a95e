//! Linux Hardware Adapters
//!
//! `spidev` backs the IMU's SPI bus and `gpiod` edge events on the two
//! interrupt lines feed the IMU data-ready flags.

use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation, SpiDevice};
use gpiod::{Chip, EdgeDetect, Options};
use imu_driver::ImuInterrupts;
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::io;
use std::thread;
use thiserror::Error;
use tracing::{error, info};

/// I/O failure on the spidev node
#[derive(Debug, Error)]
#[error("spidev I/O error: {0}")]
pub struct SpidevError(#[from] pub io::Error);

impl spi::Error for SpidevError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// `embedded-hal` SPI device over a Linux spidev node
///
/// Every transaction is one `SPI_IOC_MESSAGE` so chip select stays asserted
/// across its operations.
pub struct SpidevDevice {
    spi: Spidev,
}

impl SpidevDevice {
    /// Open `path` in mode 3, 8 bits per word
    pub fn open(path: &str, speed_hz: u32) -> io::Result<Self> {
        info!("Opening SPI device {} at {} Hz", path, speed_hz);
        let mut spi = Spidev::open(path)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_3)
            .lsb_first(false)
            .build();
        spi.configure(&options)?;
        Ok(Self { spi })
    }
}

impl ErrorType for SpidevDevice {
    type Error = SpidevError;
}

impl SpiDevice for SpidevDevice {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        // Transmit copies for in-place transfers
        let in_place: Vec<Vec<u8>> = operations
            .iter()
            .map(|op| match op {
                Operation::TransferInPlace(buf) => buf.to_vec(),
                _ => Vec::new(),
            })
            .collect();

        let mut transfers: Vec<SpidevTransfer<'_, '_>> = Vec::with_capacity(operations.len());
        for (operation, tx) in operations.iter_mut().zip(&in_place) {
            match operation {
                Operation::Read(buf) => transfers.push(SpidevTransfer::read(buf)),
                Operation::Write(buf) => transfers.push(SpidevTransfer::write(buf)),
                Operation::Transfer(read, write) => {
                    if read.len() != write.len() {
                        return Err(SpidevError(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "transfer buffers differ in length",
                        )));
                    }
                    transfers.push(SpidevTransfer::read_write(write, read));
                }
                Operation::TransferInPlace(buf) => {
                    transfers.push(SpidevTransfer::read_write(tx, buf))
                }
                Operation::DelayNs(ns) => {
                    if let Some(last) = transfers.last_mut() {
                        last.delay_usecs = (*ns / 1000).min(u16::MAX as u32) as u16;
                    }
                }
            }
        }

        self.spi.transfer_multiple(&mut transfers)?;
        Ok(())
    }
}

/// Forward rising edges on the IMU interrupt lines to `interrupts`
///
/// INT1 carries accelerometer data-ready, INT2 gyroscope data-ready (which
/// also marks the temperature sample fresh). Each line gets a dedicated
/// thread that blocks on edge events.
pub fn watch_interrupts(
    chip: &str,
    int1: Option<u32>,
    int2: Option<u32>,
    interrupts: ImuInterrupts,
) -> io::Result<()> {
    let chip = Chip::new(chip)?;

    if let Some(line) = int1 {
        let interrupts = interrupts.clone();
        spawn_edge_thread(&chip, line, "imu-int1", move || interrupts.on_int1())?;
    }
    if let Some(line) = int2 {
        spawn_edge_thread(&chip, line, "imu-int2", move || interrupts.on_int2())?;
    }
    Ok(())
}

fn spawn_edge_thread<F>(chip: &Chip, line: u32, name: &str, on_edge: F) -> io::Result<()>
where
    F: Fn() + Send + 'static,
{
    let options = Options::input([line])
        .edge(EdgeDetect::Rising)
        .consumer(name);
    let mut input = chip.request_lines(options)?;
    info!("Watching GPIO line {} as {}", line, name);

    let label = name.to_string();
    thread::Builder::new().name(label.clone()).spawn(move || loop {
        match input.read_event() {
            Ok(_) => on_edge(),
            Err(e) => {
                error!("{} edge watch stopped: {}", label, e);
                break;
            }
        }
    })?;
    Ok(())
}
