//! Record Sinks
//!
//! A sink accepts one finished CSV record at a time. Failures are reported
//! per sink; one failing sink never prevents delivery to the others.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors a sink can report
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Underlying write failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Receiver side is gone
    #[error("Sink closed")]
    Closed,

    /// Sink cannot take more data right now
    #[error("Sink full")]
    Full,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

/// Destination for telemetry records
pub trait Sink {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Deliver one record
    fn send(&mut self, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Sink over any [`std::io::Write`] (serial port, file, stdout)
pub struct WriterSink<W> {
    name: String,
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer,
        }
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink handing records to an async consumer without blocking
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.tx.try_send(bytes.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<Vec<u8>>,
    failing: bool,
}

/// In-memory sink; clones share the recorded data
#[derive(Debug, Clone)]
pub struct MemorySink {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Records delivered so far
    pub fn records(&self) -> Vec<Vec<u8>> {
        self.lock().records.clone()
    }

    /// Records delivered so far, as text
    pub fn lines(&self) -> Vec<String> {
        self.lock()
            .records
            .iter()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .collect()
    }

    /// Reject every following record (or accept again)
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let mut state = self.lock();
        if state.failing {
            return Err(SinkError::Io("injected failure".into()));
        }
        state.records.push(bytes.to_vec());
        Ok(())
    }
}
