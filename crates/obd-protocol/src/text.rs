//! OBD-II over an ELM327-style UART Link
//!
//! Requests are ASCII lines (`010C\r`). Responses arrive as arbitrary
//! fragments that are accumulated until a frame `4x .. \r` can be cut out.
//! Decoded frames are converted into the same binary slot layout the CAN
//! driver uses, so correlation and decoding are shared.

use crate::bus::{allocate_slots, RequestResponseSlot, VehicleBus};
use crate::error::ObdError;
use crate::pid::{build_table, lookup, Pid, PidDescriptor};
use crate::protocol::{
    ascii_to_hex, build_request, text_request, AtCommand, ObdProtocol, Service, EOF, FRAME_LEN,
    PAD_BYTE, SOF,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io;
use std::ops::RangeInclusive;
use std::time::Duration;
use timing::{poll_interval, Clock, Deadline};
use tracing::{debug, error, info, warn};

/// Rolling receive buffer size in bytes
pub const ACCUMULATOR_CAPACITY: usize = 48;

/// Attempts made when forwarding a frame to the outbound link
pub const FORWARD_ATTEMPTS: u8 = 3;

/// Serial link operations the text driver needs
pub trait UartPort {
    /// Transmit bytes
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Abort an in-flight transmission
    fn abort_transmit(&mut self) -> io::Result<()>;

    /// Start (or restart) fragment reception
    fn arm_receive(&mut self) -> io::Result<()>;

    /// Next received fragment, if any, without blocking
    fn poll_fragment(&mut self) -> io::Result<Option<Vec<u8>>>;
}

impl<T: UartPort + ?Sized> UartPort for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn abort_transmit(&mut self) -> io::Result<()> {
        (**self).abort_transmit()
    }

    fn arm_receive(&mut self) -> io::Result<()> {
        (**self).arm_receive()
    }

    fn poll_fragment(&mut self) -> io::Result<Option<Vec<u8>>> {
        (**self).poll_fragment()
    }
}

/// Locate the first complete frame in `buf`
///
/// A frame starts at the first `'4'` followed by a service digit and ends
/// at the next `'\r'` (inclusive). Only that first candidate is considered.
pub fn decode_frame(buf: &[u8]) -> Option<RangeInclusive<usize>> {
    let start = buf
        .windows(2)
        .position(|w| w[0] == SOF && Service::is_valid(ascii_to_hex(w[1])))?;
    let end = start + 1 + buf[start + 1..].iter().position(|&b| b == EOF)?;
    Some(start..=end)
}

/// A response frame cut out of the receive stream, terminator included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    bytes: Vec<u8>,
}

impl DecodedFrame {
    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame as text
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Convert hex text (`41 0C 1A F8`) into a response buffer
    /// `[len, 0x41, 0x0C, 0x1A, 0xF8, 0, 0, 0]`
    pub fn to_response(&self) -> Result<[u8; FRAME_LEN], ObdError> {
        let digits: Vec<u8> = self
            .bytes
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();

        let count = digits.len() / 2;
        if digits.is_empty() || digits.len() % 2 != 0 || count >= FRAME_LEN {
            return Err(ObdError::InvalidFrame(self.text().trim_end().to_string()));
        }

        let mut response = [0u8; FRAME_LEN];
        response[0] = count as u8;
        for (i, pair) in digits.chunks(2).enumerate() {
            let byte = std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| ObdError::InvalidFrame(self.text().trim_end().to_string()))?;
            response[i + 1] = byte;
        }
        Ok(response)
    }
}

/// What happened to a fragment handed to the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulated {
    /// Appended to the current contents
    Appended,
    /// Buffer would overflow; cleared and restarted with the fragment
    Reset,
    /// Fragment alone exceeds capacity; buffer cleared and fragment dropped
    Dropped,
}

/// Bounded rolling buffer of received fragments
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
    capacity: usize,
}

impl FrameAccumulator {
    /// Create an accumulator holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a fragment
    pub fn push(&mut self, fragment: &[u8]) -> Accumulated {
        if self.buf.len() + fragment.len() <= self.capacity {
            self.buf.extend_from_slice(fragment);
            return Accumulated::Appended;
        }

        self.buf.clear();
        if fragment.len() > self.capacity {
            return Accumulated::Dropped;
        }
        self.buf.extend_from_slice(fragment);
        Accumulated::Reset
    }

    /// Cut out the first complete frame, clearing the buffer on success
    pub fn extract(&mut self) -> Option<DecodedFrame> {
        let range = decode_frame(&self.buf)?;
        let frame = DecodedFrame {
            bytes: self.buf[range].to_vec(),
        };
        self.buf.clear();
        Some(frame)
    }

    /// Current contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(ACCUMULATOR_CAPACITY)
    }
}

/// Text driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// PIDs queried each cycle, in order
    pub pids: Vec<Pid>,
    /// Send `ATZ` during init
    pub reset_on_init: bool,
    /// Wait after `ATZ` in milliseconds
    pub reset_delay_ms: u64,
    /// Bus protocol selected with `ATSP`
    pub protocol: ObdProtocol,
    /// Filler for unused bytes of the recorded request
    pub pad_byte: u8,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
    /// Delay between fragment polls in milliseconds
    pub poll_interval_ms: u64,
    /// Attempts when forwarding a frame to the outbound link
    pub forward_attempts: u8,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            pids: Pid::DEFAULT_TABLE.to_vec(),
            reset_on_init: true,
            reset_delay_ms: 1000,
            protocol: ObdProtocol::Auto,
            pad_byte: PAD_BYTE,
            timeout_ms: 1000,
            poll_interval_ms: 1,
            forward_attempts: FORWARD_ATTEMPTS,
        }
    }
}

/// OBD-II driver for ELM327-compatible adapters
pub struct TextDriver<P, C> {
    port: P,
    clock: C,
    config: TextConfig,
    accumulator: FrameAccumulator,
    forward: Option<Box<dyn UartPort + Send>>,
    forward_failures: u64,
    table: Vec<PidDescriptor>,
    slots: Vec<RequestResponseSlot>,
    initialized: bool,
}

impl<P: UartPort, C: Clock> TextDriver<P, C> {
    /// Create a driver; the adapter is not touched until `init`
    pub fn new(port: P, clock: C, config: TextConfig) -> Self {
        info!("Creating text OBD driver with {} PIDs", config.pids.len());
        let table = build_table(&config.pids);

        Self {
            port,
            clock,
            config,
            accumulator: FrameAccumulator::default(),
            forward: None,
            forward_failures: 0,
            table,
            slots: Vec::new(),
            initialized: false,
        }
    }

    /// Forward every decoded frame to `link`
    pub fn with_forward(mut self, link: Box<dyn UartPort + Send>) -> Self {
        self.forward = Some(link);
        self
    }

    /// Number of frames that could not be forwarded
    pub fn forward_failures(&self) -> u64 {
        self.forward_failures
    }

    /// Whether `init` completed
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Arm reception and configure the adapter
    pub fn initialize(&mut self, reset: bool) -> Result<(), ObdError> {
        info!("Initializing OBD adapter (reset={})", reset);
        self.listen()?;

        if reset {
            self.command(AtCommand::Reset)?;
            self.clock
                .sleep(Duration::from_millis(self.config.reset_delay_ms));
        }
        self.command(AtCommand::EchoOff)?;
        self.command(AtCommand::LinefeedsOff)?;
        self.command(AtCommand::SetProtocol(self.config.protocol))?;

        self.slots = allocate_slots(&self.table);
        self.initialized = true;
        info!("OBD adapter initialized");
        Ok(())
    }

    /// Transmit a command, optionally followed by `'\r'`
    pub fn write(&mut self, command: &str, append_terminator: bool) -> Result<(), ObdError> {
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        if append_terminator {
            line.push(EOF);
        }

        debug!("Writing {:?}", command);
        self.port
            .write(&line)
            .map_err(|e| ObdError::UartWrite(e.to_string()))
    }

    /// Arm fragment reception
    pub fn listen(&mut self) -> Result<(), ObdError> {
        self.port
            .arm_receive()
            .map_err(|e| ObdError::UartReceive(e.to_string()))
    }

    /// Feed one received fragment
    ///
    /// Returns the decoded frame once one is complete. Every frame is also
    /// forwarded to the outbound link when one is attached.
    pub fn on_fragment(&mut self, fragment: &[u8]) -> Option<DecodedFrame> {
        match self.accumulator.push(fragment) {
            Accumulated::Appended => {}
            Accumulated::Reset => debug!("Receive buffer overflow, restarting accumulation"),
            Accumulated::Dropped => {
                warn!("Dropping {} byte fragment larger than receive buffer", fragment.len())
            }
        }

        let frame = self.accumulator.extract()?;
        debug!("Decoded frame {:?}", frame.text());
        if let Err(e) = self.forward(&frame) {
            self.forward_failures += 1;
            error!("Failed to forward frame: {}", e);
        }
        Some(frame)
    }

    /// Write a frame to the outbound link, retrying on failure
    pub fn forward(&mut self, frame: &DecodedFrame) -> Result<(), ObdError> {
        let attempts = self.config.forward_attempts;
        let Some(link) = self.forward.as_mut() else {
            return Ok(());
        };

        for attempt in 1..=attempts {
            match link.write(frame.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Forward attempt {}/{} failed: {}", attempt, attempts, e);
                    if let Err(e) = link.abort_transmit() {
                        warn!("Abort transmit failed: {}", e);
                    }
                }
            }
        }
        Err(ObdError::UartRetriesExhausted { attempts })
    }

    fn command(&mut self, command: AtCommand) -> Result<(), ObdError> {
        self.write(command.as_str(), true)?;
        self.drain();
        Ok(())
    }

    /// Discard whatever the adapter has answered so far
    fn drain(&mut self) {
        while let Ok(Some(fragment)) = self.port.poll_fragment() {
            debug!("Adapter: {:?}", String::from_utf8_lossy(&fragment));
        }
        self.accumulator.clear();
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut RequestResponseSlot, ObdError> {
        if !self.initialized {
            return Err(ObdError::NotInitialized);
        }
        self.slots.get_mut(slot).ok_or(ObdError::InvalidSlot(slot))
    }
}

impl<P: UartPort, C: Clock> VehicleBus for TextDriver<P, C> {
    fn init(&mut self) -> Result<(), ObdError> {
        self.initialize(self.config.reset_on_init)
    }

    fn deinit(&mut self) -> Result<(), ObdError> {
        info!("Stopping text OBD driver");
        self.initialized = false;
        self.accumulator.clear();
        Ok(())
    }

    fn pid_table(&self) -> &[PidDescriptor] {
        &self.table
    }

    fn send(&mut self, slot: usize, pid: u8) -> Result<(), ObdError> {
        if lookup(&self.table, pid).is_none() {
            return Err(ObdError::UnsupportedPid(pid));
        }
        let pad = self.config.pad_byte;
        self.slot_mut(slot)?.request = build_request(pid, pad);
        self.drain();
        self.write(&text_request(pid), true)
    }

    fn receive(&mut self, slot: usize) -> Result<(), ObdError> {
        self.slot_mut(slot)?.clear_response();

        let timeout_ms = self.config.timeout_ms;
        let interval = poll_interval(self.config.poll_interval_ms);
        let deadline = Deadline::after(&self.clock, Duration::from_millis(timeout_ms));

        loop {
            let fragment = self
                .port
                .poll_fragment()
                .map_err(|e| ObdError::UartReceive(e.to_string()))?;

            match fragment {
                Some(fragment) => {
                    if let Some(frame) = self.on_fragment(&fragment) {
                        let response = frame.to_response()?;
                        self.slot_mut(slot)?.response = response;
                        return Ok(());
                    }
                }
                None => self.clock.sleep(interval),
            }

            if deadline.expired(&self.clock) {
                return Err(ObdError::UartTimeout(timeout_ms));
            }
        }
    }

    fn slot(&self, slot: usize) -> Option<&RequestResponseSlot> {
        self.slots.get(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObdFlags;
    use crate::sim::{SimulatedEcu, SimulatedElm, SimulatedUart};
    use proptest::prelude::*;
    use timing::SimClock;

    fn frame(text: &str) -> DecodedFrame {
        DecodedFrame {
            bytes: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_searching_noise_is_skipped() {
        let mut acc = FrameAccumulator::default();
        assert_eq!(acc.push(b"SEARCHING...\r"), Accumulated::Appended);
        assert_eq!(acc.extract(), None);

        acc.push(b"41 0D 00 \r\r>");
        let decoded = acc.extract().unwrap();
        assert_eq!(decoded.as_bytes(), b"41 0D 00 \r");
        assert!(acc.is_empty());
    }

    #[test]
    fn test_frame_split_across_fragments() {
        let mut acc = FrameAccumulator::default();
        acc.push(b"41 0C 1A");
        assert_eq!(acc.extract(), None);
        acc.push(b" F8 \r");
        assert_eq!(acc.extract().unwrap().as_bytes(), b"41 0C 1A F8 \r");
    }

    #[test]
    fn test_only_first_candidate_is_extracted() {
        let mut acc = FrameAccumulator::default();
        acc.push(b"41 0C 1A F8 \r41 0D 20 \r");
        assert_eq!(acc.extract().unwrap().as_bytes(), b"41 0C 1A F8 \r");
        assert_eq!(acc.extract(), None);
    }

    #[test]
    fn test_sof_requires_service_digit() {
        assert_eq!(decode_frame(b"ELM327 v1.4\r"), None);
        assert_eq!(decode_frame(b"40 \r"), None);
        assert_eq!(decode_frame(b"x4A\r"), None);
        assert_eq!(decode_frame(b"x41\r"), Some(1..=3));
    }

    #[test]
    fn test_overflow_resets_and_resumes() {
        let mut acc = FrameAccumulator::default();
        acc.push(&[b'.'; 40]);
        assert_eq!(acc.push(b"41 0D 00 \r"), Accumulated::Reset);
        assert_eq!(acc.len(), 10);
        assert_eq!(acc.extract().unwrap().as_bytes(), b"41 0D 00 \r");

        assert_eq!(acc.push(&[b'.'; 49]), Accumulated::Dropped);
        assert!(acc.is_empty());
        acc.push(b"41 0C 00 00\r");
        assert!(acc.extract().is_some());
    }

    proptest! {
        #[test]
        fn test_accumulator_stays_bounded(fragments in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32)) {
            let mut acc = FrameAccumulator::default();
            for fragment in &fragments {
                acc.push(fragment);
                prop_assert!(acc.len() <= ACCUMULATOR_CAPACITY);
                if let Some(frame) = acc.extract() {
                    prop_assert_eq!(frame.as_bytes()[0], SOF);
                    prop_assert_eq!(*frame.as_bytes().last().unwrap(), EOF);
                    prop_assert!(acc.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_hex_text_to_response() {
        assert_eq!(
            frame("41 0C 1A F8 \r").to_response().unwrap(),
            [4, 0x41, 0x0C, 0x1A, 0xF8, 0, 0, 0]
        );
        assert_eq!(
            frame("410D20\r").to_response().unwrap(),
            [3, 0x41, 0x0D, 0x20, 0, 0, 0, 0]
        );

        let err = frame("41 0C 1G\r").to_response().unwrap_err();
        assert_eq!(err.flags(), ObdFlags::DATA);
        assert!(frame("41 0\r").to_response().is_err());
        assert!(frame("41 01 02 03 04 05 06 07\r").to_response().is_err());
    }

    fn elm() -> (TextDriver<SimulatedElm, SimClock>, SimulatedElm, SimulatedEcu, SimClock) {
        let ecu = SimulatedEcu::new();
        let port = SimulatedElm::new(ecu.clone());
        let clock = SimClock::new();
        let driver = TextDriver::new(port.clone(), clock.clone(), TextConfig::default());
        (driver, port, ecu, clock)
    }

    #[test]
    fn test_init_sequence() {
        let (mut driver, port, _, clock) = elm();
        driver.init().unwrap();

        assert_eq!(port.commands(), ["ATZ", "ATE0", "ATL0", "ATSP0"]);
        assert_eq!(clock.now_ms(), 1000);
        assert!(driver.is_initialized());

        let (mut driver, port, _, clock) = elm();
        driver.initialize(false).unwrap();
        assert_eq!(port.commands(), ["ATE0", "ATL0", "ATSP0"]);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn test_query_through_adapter() {
        let (mut driver, port, ecu, _) = elm();
        ecu.set_data(0x0C, &[0x1A, 0xF8]);
        driver.init().unwrap();

        driver.send(0, 0x0C).unwrap();
        driver.receive(0).unwrap();

        assert_eq!(port.commands().last().map(String::as_str), Some("010C"));
        assert_eq!(driver.request(0).unwrap()[..3], [0x02, 0x01, 0x0C]);
        assert_eq!(driver.decode(0).unwrap(), Some(1726.0));
    }

    #[test]
    fn test_receive_times_out() {
        let (mut driver, _, ecu, clock) = elm();
        driver.init().unwrap();
        ecu.set_silent(true);

        driver.send(1, 0x0D).unwrap();
        let start = clock.now_ms();
        let err = driver.receive(1).unwrap_err();
        assert!(matches!(err, ObdError::UartTimeout(1000)));
        assert!(err.is_transport());
        assert!(clock.now_ms() - start > 1000);
    }

    #[test]
    fn test_leftover_frame_does_not_answer_next_request() {
        let (mut driver, port, ecu, _) = elm();
        ecu.set_data(0x0C, &[0x1A, 0xF8]);
        driver.init().unwrap();
        port.push_fragment(b"41 05 7B \r");

        driver.send(0, 0x0C).unwrap();
        driver.receive(0).unwrap();
        assert_eq!(driver.decode(0).unwrap(), Some(1726.0));
    }

    #[test]
    fn test_forward_retries_with_abort() {
        let link = SimulatedUart::new();
        let (driver, _, _, _) = elm();
        let mut driver = driver.with_forward(Box::new(link.clone()));

        link.fail_writes(2);
        driver.forward(&frame("41 0D 00 \r")).unwrap();
        assert_eq!(link.aborts(), 2);
        assert_eq!(link.written(), [b"41 0D 00 \r".to_vec()]);

        link.fail_writes(5);
        let err = driver.forward(&frame("41 0D 00 \r")).unwrap_err();
        assert!(matches!(err, ObdError::UartRetriesExhausted { attempts: 3 }));
        assert_eq!(link.aborts(), 5);
    }

    #[test]
    fn test_decoded_frames_are_forwarded() {
        let link = SimulatedUart::new();
        let (driver, _, _, _) = elm();
        let mut driver = driver.with_forward(Box::new(link.clone()));

        assert_eq!(driver.on_fragment(b"SEARCHING...\r"), None);
        let decoded = driver.on_fragment(b"41 0D 00 \r\r>").unwrap();
        assert_eq!(decoded.text(), "41 0D 00 \r");
        assert_eq!(link.written(), [b"41 0D 00 \r".to_vec()]);

        link.fail_writes(3);
        assert!(driver.on_fragment(b"41 0D 01 \r").is_some());
        assert_eq!(driver.forward_failures(), 1);
    }
}
