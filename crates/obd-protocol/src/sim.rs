//! Simulated Vehicle Bus Peers
//!
//! An in-memory ECU plus the two transports that reach it: a CAN controller
//! and an ELM327-style adapter. Also a recording UART for outbound links.
//! All types are cheap clones sharing state, so tests keep a handle while
//! the driver owns the transport.

use crate::can::{CanBus, CanFilter, CanFrame, Mailbox};
use crate::pid::Pid;
use crate::protocol::{Service, FRAME_LEN, PID_INDEX, REQUEST_ID, RESPONSE_ID_MIN, SERVICE_INDEX};
use crate::text::UartPort;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct EcuState {
    data: HashMap<u8, Vec<u8>>,
    silent: bool,
    animated: bool,
    requests: u64,
}

/// Simulated engine control unit answering service 01 requests
#[derive(Debug, Clone)]
pub struct SimulatedEcu {
    state: Arc<Mutex<EcuState>>,
}

impl SimulatedEcu {
    /// ECU with fixed idle values for every catalogue PID
    pub fn new() -> Self {
        let data = Pid::ALL
            .iter()
            .map(|pid| (pid.as_hex(), idle_data(*pid)))
            .collect();

        Self {
            state: Arc::new(Mutex::new(EcuState {
                data,
                silent: false,
                animated: false,
                requests: 0,
            })),
        }
    }

    /// ECU whose engine speed, vehicle speed and load vary per request
    pub fn animated() -> Self {
        let ecu = Self::new();
        lock(&ecu.state).animated = true;
        ecu
    }

    /// Data bytes (A, B, ..) returned for a PID
    pub fn set_data(&self, pid: u8, data: &[u8]) {
        lock(&self.state).data.insert(pid, data.to_vec());
    }

    /// Stop answering requests
    pub fn set_silent(&self, silent: bool) {
        lock(&self.state).silent = silent;
    }

    /// Positive response bytes `[0x41, pid, data..]`, or `None` if unanswered
    pub fn respond(&self, service: u8, pid: u8) -> Option<Vec<u8>> {
        let mut state = lock(&self.state);
        if state.silent || service != Service::CurrentData.code() {
            return None;
        }

        state.requests += 1;
        let n = state.requests;
        let data = match pid {
            0x0C if state.animated => {
                let encoded = (800 + (n * 137 % 2700) as u16) * 4;
                encoded.to_be_bytes().to_vec()
            }
            0x0D if state.animated => vec![(n * 3 % 120) as u8],
            0x04 if state.animated => vec![(51 + n * 7 % 153) as u8],
            _ => state.data.get(&pid)?.clone(),
        };

        let mut response = vec![Service::CurrentData.response_code(), pid];
        response.extend(data);
        Some(response)
    }
}

impl Default for SimulatedEcu {
    fn default() -> Self {
        Self::new()
    }
}

fn idle_data(pid: Pid) -> Vec<u8> {
    match pid {
        Pid::EngineSpeed => vec![0x0D, 0x48],
        Pid::VehicleSpeed => vec![0x00],
        Pid::EngineLoad => vec![0x33],
        Pid::ThrottlePosition => vec![0x26],
        Pid::DistanceWithMil => vec![0x00, 0x00],
        Pid::O2Sensor1Voltage | Pid::O2Sensor2Voltage => vec![0x5A],
        Pid::O2Sensor1Current | Pid::O2Sensor2Current => vec![0x80, 0x00, 0x80, 0x00],
        Pid::CoolantTemperature => vec![0x7B],
        Pid::ShortFuelTrim => vec![0x80],
        Pid::LongFuelTrim => vec![0x82],
        Pid::IntakeManifoldPressure => vec![0x21],
        Pid::MassAirFlow => vec![0x01, 0xF4],
    }
}

#[derive(Debug, Default)]
struct CanState {
    filter: Option<CanFilter>,
    started: bool,
    rx: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    pending: Vec<Mailbox>,
    after_tx: Vec<CanFrame>,
    next_mailbox: u32,
    tx_stalled: bool,
    tx_full: bool,
}

impl CanState {
    fn deliver(&mut self, frame: CanFrame) {
        let accepted = self.filter.map_or(true, |f| f.accepts(frame.id));
        if self.started && accepted {
            self.rx.push_back(frame);
        }
    }
}

/// Simulated CAN controller wired to a [`SimulatedEcu`]
#[derive(Debug, Clone)]
pub struct SimulatedCanBus {
    ecu: SimulatedEcu,
    state: Arc<Mutex<CanState>>,
}

impl SimulatedCanBus {
    /// Controller in its stopped state
    pub fn new(ecu: SimulatedEcu) -> Self {
        Self {
            ecu,
            state: Arc::new(Mutex::new(CanState::default())),
        }
    }

    /// Every frame accepted for transmission
    pub fn sent(&self) -> Vec<CanFrame> {
        lock(&self.state).sent.clone()
    }

    /// Put a frame on the bus as if another node sent it
    pub fn inject(&self, frame: CanFrame) {
        lock(&self.state).deliver(frame);
    }

    /// Put a frame on the bus right after the next request, ahead of the
    /// ECU's reply
    pub fn inject_after_tx(&self, frame: CanFrame) {
        lock(&self.state).after_tx.push(frame);
    }

    /// Keep transmit mailboxes pending forever
    pub fn set_tx_stalled(&self, stalled: bool) {
        let mut state = lock(&self.state);
        state.tx_stalled = stalled;
        if !stalled {
            state.pending.clear();
        }
    }

    /// Refuse new transmissions
    pub fn set_tx_full(&self, full: bool) {
        lock(&self.state).tx_full = full;
    }
}

impl CanBus for SimulatedCanBus {
    fn configure_filter(&mut self, filter: CanFilter) -> io::Result<()> {
        lock(&self.state).filter = Some(filter);
        Ok(())
    }

    fn start(&mut self) -> io::Result<()> {
        lock(&self.state).started = true;
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.started = false;
        state.rx.clear();
        Ok(())
    }

    fn add_tx(&mut self, frame: &CanFrame) -> io::Result<Mailbox> {
        let mut state = lock(&self.state);
        if state.tx_full || !state.started {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no free transmit mailbox"));
        }

        state.sent.push(*frame);
        let mailbox = Mailbox(state.next_mailbox);
        state.next_mailbox = state.next_mailbox.wrapping_add(1);
        if state.tx_stalled {
            state.pending.push(mailbox);
            return Ok(mailbox);
        }

        for stray in std::mem::take(&mut state.after_tx) {
            state.deliver(stray);
        }
        if frame.id == REQUEST_ID {
            let reply = self
                .ecu
                .respond(frame.data[SERVICE_INDEX], frame.data[PID_INDEX]);
            if let Some(reply) = reply {
                let mut data = [0u8; FRAME_LEN];
                data[0] = reply.len() as u8;
                data[1..=reply.len()].copy_from_slice(&reply);
                state.deliver(CanFrame::new(RESPONSE_ID_MIN, data));
            }
        }
        Ok(mailbox)
    }

    fn tx_pending(&self, mailbox: Mailbox) -> bool {
        lock(&self.state).pending.contains(&mailbox)
    }

    fn rx_fill_level(&self) -> usize {
        lock(&self.state).rx.len()
    }

    fn pop_rx(&mut self) -> io::Result<CanFrame> {
        lock(&self.state)
            .rx
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "receive queue empty"))
    }
}

#[derive(Debug, Default)]
struct ElmState {
    armed: bool,
    line: Vec<u8>,
    commands: Vec<String>,
    rx: VecDeque<Vec<u8>>,
    searching: bool,
    scripted: HashMap<String, Vec<u8>>,
}

/// Simulated ELM327 adapter wired to a [`SimulatedEcu`]
///
/// The first PID request after a reset is preceded by `SEARCHING...`, and
/// every frame is delivered in two fragments.
#[derive(Debug, Clone)]
pub struct SimulatedElm {
    ecu: SimulatedEcu,
    state: Arc<Mutex<ElmState>>,
}

impl SimulatedElm {
    pub fn new(ecu: SimulatedEcu) -> Self {
        Self {
            ecu,
            state: Arc::new(Mutex::new(ElmState {
                searching: true,
                ..Default::default()
            })),
        }
    }

    /// Command lines received so far, terminators stripped
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Queue a raw fragment for reception
    pub fn push_fragment(&self, fragment: &[u8]) {
        lock(&self.state).rx.push_back(fragment.to_vec());
    }

    /// Answer the next `command` with `reply` instead of asking the ECU
    pub fn script_reply(&self, command: &str, reply: &[u8]) {
        lock(&self.state)
            .scripted
            .insert(command.to_ascii_uppercase(), reply.to_vec());
    }

    fn execute(&self, state: &mut ElmState, command: &str) {
        if let Some(reply) = state.scripted.remove(command) {
            state.rx.push_back(reply);
            return;
        }
        let reply: Vec<Vec<u8>> = match command {
            "ATZ" => {
                state.searching = true;
                vec![b"\r\rELM327 v1.5\r\r>".to_vec()]
            }
            c if c.starts_with("AT") => vec![b"OK\r\r>".to_vec()],
            c => match parse_request(c).and_then(|(service, pid)| self.ecu.respond(service, pid)) {
                Some(bytes) => {
                    let text: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                    let text = format!("{} \r\r>", text.join(" "));
                    let (head, tail) = text.split_at(text.len() / 2);

                    let mut fragments = Vec::new();
                    if std::mem::take(&mut state.searching) {
                        fragments.push(b"SEARCHING...\r".to_vec());
                    }
                    fragments.push(head.as_bytes().to_vec());
                    fragments.push(tail.as_bytes().to_vec());
                    fragments
                }
                None => vec![b"NO DATA\r\r>".to_vec()],
            },
        };
        state.rx.extend(reply);
    }
}

fn parse_request(command: &str) -> Option<(u8, u8)> {
    if command.len() != 4 {
        return None;
    }
    let service = u8::from_str_radix(command.get(0..2)?, 16).ok()?;
    let pid = u8::from_str_radix(command.get(2..4)?, 16).ok()?;
    Some((service, pid))
}

impl UartPort for SimulatedElm {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.state);
        for &byte in bytes {
            if byte != b'\r' {
                state.line.push(byte);
                continue;
            }
            let line = std::mem::take(&mut state.line);
            let command = String::from_utf8_lossy(&line).trim().to_ascii_uppercase();
            state.commands.push(command.clone());
            self.execute(&mut state, &command);
        }
        Ok(())
    }

    fn abort_transmit(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn arm_receive(&mut self) -> io::Result<()> {
        lock(&self.state).armed = true;
        Ok(())
    }

    fn poll_fragment(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut state = lock(&self.state);
        if !state.armed {
            return Ok(None);
        }
        Ok(state.rx.pop_front())
    }
}

#[derive(Debug, Default)]
struct UartState {
    written: Vec<Vec<u8>>,
    failing_writes: usize,
    aborts: usize,
    rx: VecDeque<Vec<u8>>,
}

/// Recording UART with transmit fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedUart {
    state: Arc<Mutex<UartState>>,
}

impl SimulatedUart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes
    pub fn fail_writes(&self, count: usize) {
        lock(&self.state).failing_writes = count;
    }

    /// Successfully written buffers
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    /// Number of `abort_transmit` calls
    pub fn aborts(&self) -> usize {
        lock(&self.state).aborts
    }

    /// Queue a fragment for reception
    pub fn push_fragment(&self, fragment: &[u8]) {
        lock(&self.state).rx.push_back(fragment.to_vec());
    }
}

impl UartPort for SimulatedUart {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "transmit timeout"));
        }
        state.written.push(bytes.to_vec());
        Ok(())
    }

    fn abort_transmit(&mut self) -> io::Result<()> {
        lock(&self.state).aborts += 1;
        Ok(())
    }

    fn arm_receive(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn poll_fragment(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(lock(&self.state).rx.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecu_answers_current_data_only() {
        let ecu = SimulatedEcu::new();
        assert_eq!(ecu.respond(0x01, 0x0D), Some(vec![0x41, 0x0D, 0x00]));
        assert_eq!(ecu.respond(0x09, 0x02), None);
        assert_eq!(ecu.respond(0x01, 0x42), None);

        ecu.set_silent(true);
        assert_eq!(ecu.respond(0x01, 0x0D), None);
    }

    #[test]
    fn test_animated_engine_speed_in_range() {
        let ecu = SimulatedEcu::animated();
        for _ in 0..50 {
            let reply = ecu.respond(0x01, 0x0C).unwrap();
            let rpm = u16::from_be_bytes([reply[2], reply[3]]) / 4;
            assert!((800..3500).contains(&rpm));
        }
    }

    #[test]
    fn test_elm_requires_armed_receive() {
        let mut elm = SimulatedElm::new(SimulatedEcu::new());
        elm.write(b"ATE0\r").unwrap();
        assert_eq!(elm.poll_fragment().unwrap(), None);

        elm.arm_receive().unwrap();
        assert_eq!(elm.poll_fragment().unwrap(), Some(b"OK\r\r>".to_vec()));
    }

    #[test]
    fn test_elm_formats_response() {
        let ecu = SimulatedEcu::new();
        ecu.set_data(0x0C, &[0x1A, 0xF8]);
        let mut elm = SimulatedElm::new(ecu);
        elm.arm_receive().unwrap();
        elm.write(b"010c\r").unwrap();

        let mut text = Vec::new();
        while let Some(fragment) = elm.poll_fragment().unwrap() {
            text.extend(fragment);
        }
        assert_eq!(text, b"SEARCHING...\r41 0C 1A F8 \r\r>".to_vec());
    }
}
