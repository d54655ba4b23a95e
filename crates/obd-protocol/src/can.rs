//! OBD-II over CAN
//!
//! Binary PID exchange on a filtered CAN bus. Requests go out on the
//! functional broadcast identifier; only ECU response identifiers are
//! accepted on receive.

use crate::bus::{allocate_slots, RequestResponseSlot, VehicleBus};
use crate::error::ObdError;
use crate::pid::{build_table, lookup, Pid, PidDescriptor};
use crate::protocol::{
    build_request, FRAME_LEN, PAD_BYTE, PID_INDEX, REQUEST_ID, RESPONSE_ID_MAX,
    RESPONSE_ID_MIN,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use timing::{poll_interval, Clock, Deadline};
use tracing::{debug, info, warn};

/// Classic CAN frame with a standard identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    /// 11-bit identifier
    pub id: u16,
    /// Data length code
    pub dlc: u8,
    /// Payload
    pub data: [u8; FRAME_LEN],
}

impl CanFrame {
    /// Full-length frame
    pub fn new(id: u16, data: [u8; FRAME_LEN]) -> Self {
        Self {
            id,
            dlc: FRAME_LEN as u8,
            data,
        }
    }
}

/// Acceptance filter over standard identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFilter {
    pub low: u16,
    pub high: u16,
}

impl CanFilter {
    /// OBD-II ECU response range 0x7E8..=0x7EF
    pub const OBD_RESPONSES: CanFilter = CanFilter {
        low: RESPONSE_ID_MIN,
        high: RESPONSE_ID_MAX,
    };

    /// Whether `id` passes the filter
    pub fn accepts(&self, id: u16) -> bool {
        (self.low..=self.high).contains(&id)
    }
}

/// Transmit mailbox handle returned by [`CanBus::add_tx`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mailbox(pub u32);

/// CAN controller operations the query driver needs
pub trait CanBus {
    /// Install the receive acceptance filter
    fn configure_filter(&mut self, filter: CanFilter) -> io::Result<()>;

    /// Start the controller
    fn start(&mut self) -> io::Result<()>;

    /// Stop the controller
    fn stop(&mut self) -> io::Result<()>;

    /// Queue a frame for transmission
    fn add_tx(&mut self, frame: &CanFrame) -> io::Result<Mailbox>;

    /// Whether the mailbox has not been transmitted yet
    fn tx_pending(&self, mailbox: Mailbox) -> bool;

    /// Number of frames waiting in the receive queue
    fn rx_fill_level(&self) -> usize;

    /// Take the oldest received frame
    fn pop_rx(&mut self) -> io::Result<CanFrame>;
}

/// CAN query driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    /// PIDs queried each cycle, in order
    pub pids: Vec<Pid>,
    /// Filler for unused request bytes
    pub pad_byte: u8,
    /// Per-transaction timeout in milliseconds
    pub timeout_ms: u64,
    /// Delay between mailbox/queue polls in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            pids: Pid::DEFAULT_TABLE.to_vec(),
            pad_byte: PAD_BYTE,
            timeout_ms: 1000,
            poll_interval_ms: 1,
        }
    }
}

/// OBD-II query driver over a [`CanBus`]
pub struct CanQueryDriver<B, C> {
    bus: B,
    clock: C,
    config: CanConfig,
    table: Vec<PidDescriptor>,
    slots: Vec<RequestResponseSlot>,
    initialized: bool,
}

impl<B: CanBus, C: Clock> CanQueryDriver<B, C> {
    /// Create a driver; the controller is not touched until `init`
    pub fn new(bus: B, clock: C, config: CanConfig) -> Self {
        info!("Creating CAN query driver with {} PIDs", config.pids.len());
        let table = build_table(&config.pids);

        Self {
            bus,
            clock,
            config,
            table,
            slots: Vec::new(),
            initialized: false,
        }
    }

    /// Whether `init` completed
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut RequestResponseSlot, ObdError> {
        if !self.initialized {
            return Err(ObdError::NotInitialized);
        }
        self.slots.get_mut(slot).ok_or(ObdError::InvalidSlot(slot))
    }

    fn wait_tx(&self, mailbox: Mailbox) -> Result<(), ObdError> {
        let deadline = Deadline::after(&self.clock, self.timeout());
        let interval = poll_interval(self.config.poll_interval_ms);

        while self.bus.tx_pending(mailbox) {
            if deadline.expired(&self.clock) {
                return Err(ObdError::TxTimeout(self.config.timeout_ms));
            }
            self.clock.sleep(interval);
        }
        Ok(())
    }

    fn wait_rx(&self) -> Result<(), ObdError> {
        let deadline = Deadline::after(&self.clock, self.timeout());
        let interval = poll_interval(self.config.poll_interval_ms);

        while self.bus.rx_fill_level() == 0 {
            if deadline.expired(&self.clock) {
                return Err(ObdError::RxTimeout(self.config.timeout_ms));
            }
            self.clock.sleep(interval);
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<CanFrame, ObdError> {
        self.bus
            .pop_rx()
            .map_err(|e| ObdError::RxBuffer(e.to_string()))
    }

    /// Drop frames left over from earlier requests
    fn discard_stale(&mut self) -> Result<(), ObdError> {
        for _ in 0..self.bus.rx_fill_level() {
            let frame = self.pop()?;
            debug!("Discarding stale frame from {:03X}: {:02X?}", frame.id, frame.data);
        }
        Ok(())
    }
}

impl<B: CanBus, C: Clock> VehicleBus for CanQueryDriver<B, C> {
    fn init(&mut self) -> Result<(), ObdError> {
        info!("Initializing CAN query driver");
        self.bus
            .configure_filter(CanFilter::OBD_RESPONSES)
            .map_err(|e| ObdError::Filter(e.to_string()))?;
        self.bus
            .start()
            .map_err(|e| ObdError::Controller(e.to_string()))?;

        self.slots = allocate_slots(&self.table);
        self.initialized = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), ObdError> {
        info!("Stopping CAN query driver");
        self.initialized = false;
        self.bus
            .stop()
            .map_err(|e| ObdError::Controller(e.to_string()))
    }

    fn pid_table(&self) -> &[PidDescriptor] {
        &self.table
    }

    fn send(&mut self, slot: usize, pid: u8) -> Result<(), ObdError> {
        if lookup(&self.table, pid).is_none() {
            return Err(ObdError::UnsupportedPid(pid));
        }
        let request = build_request(pid, self.config.pad_byte);
        self.slot_mut(slot)?.request = request;
        self.discard_stale()?;

        debug!("Sending PID {:02X} from slot {}", pid, slot);
        let mailbox = self
            .bus
            .add_tx(&CanFrame::new(REQUEST_ID, request))
            .map_err(|e| ObdError::TxEnqueue(e.to_string()))?;

        self.wait_tx(mailbox)
    }

    fn receive(&mut self, slot: usize) -> Result<(), ObdError> {
        let target = self.slot_mut(slot)?;
        target.clear_response();
        let pid = target.request[PID_INDEX];
        self.wait_rx()?;

        // An unrelated frame is only kept when nothing queued behind it
        let mut frame = self.pop()?;
        while frame.data[PID_INDEX] != pid && self.bus.rx_fill_level() > 0 {
            debug!("Skipping frame for PID {:02X} from {:03X}", frame.data[PID_INDEX], frame.id);
            frame = self.pop()?;
        }
        if frame.dlc as usize != FRAME_LEN {
            warn!("Short CAN frame from {:03X}: dlc={}", frame.id, frame.dlc);
        }

        let len = (frame.dlc as usize).min(FRAME_LEN);
        self.slot_mut(slot)?.response[..len].copy_from_slice(&frame.data[..len]);
        Ok(())
    }

    fn slot(&self, slot: usize) -> Option<&RequestResponseSlot> {
        self.slots.get(slot)
    }
}
