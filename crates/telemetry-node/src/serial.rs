//! Serial Port Adapters
//!
//! The ELM327 adapter is read by a dedicated thread that hands each received
//! chunk to the text driver through a bounded channel; the driver polls the
//! channel without blocking.

use obd_protocol::UartPort;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_serial::{ClearBuffer, SerialPort};
use tracing::{debug, error, info};

/// Fragments buffered between the reader thread and the driver
const FRAGMENT_QUEUE: usize = 64;

/// Read timeout of the reader thread
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Open a serial port
pub fn open_port(path: &str, baud_rate: u32) -> io::Result<Box<dyn SerialPort>> {
    info!("Opening serial port {} at {} baud", path, baud_rate);
    let port = tokio_serial::new(path, baud_rate)
        .timeout(READ_TIMEOUT)
        .open()?;
    Ok(port)
}

/// ELM327 adapter on a serial port
pub struct SerialAdapter {
    port: Box<dyn SerialPort>,
    fragments: mpsc::Receiver<Vec<u8>>,
}

impl SerialAdapter {
    pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        let port = open_port(path, baud_rate)?;
        let reader = port.try_clone()?;
        let (tx, fragments) = mpsc::channel(FRAGMENT_QUEUE);

        thread::Builder::new()
            .name("elm-reader".to_string())
            .spawn(move || read_loop(reader, tx))?;

        Ok(Self { port, fragments })
    }
}

fn read_loop(mut reader: Box<dyn SerialPort>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    debug!("Adapter receiver dropped, reader exiting");
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                error!("Serial read failed: {}", e);
                return;
            }
        }
    }
}

impl UartPort for SerialAdapter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn abort_transmit(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn arm_receive(&mut self) -> io::Result<()> {
        // Stale input would otherwise be taken for the next answer
        while self.fragments.try_recv().is_ok() {}
        Ok(())
    }

    fn poll_fragment(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.fragments.try_recv() {
            Ok(fragment) => Ok(Some(fragment)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial reader stopped",
            )),
        }
    }
}

/// Write-only serial link for forwarding decoded frames
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        Ok(Self {
            port: open_port(path, baud_rate)?,
        })
    }
}

impl UartPort for SerialLink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn abort_transmit(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn arm_receive(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn poll_fragment(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
