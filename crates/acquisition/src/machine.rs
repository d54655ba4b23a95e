//! Acquisition State Machine
//!
//! One cycle reads the IMU, queries every configured PID, builds a CSV
//! record and hands it to each sink. IMU and per-PID decode failures only
//! degrade the cycle; a vehicle bus transport failure shuts both drivers
//! down and latches a fault until [`AcquisitionMachine::reset`].

use crate::csv::{header, CsvFormat, CsvRecord};
use crate::error::{SystemError, SystemFlags};
use crate::sink::{Sink, SinkError};
use crate::state::SystemState;
use imu_driver::{Channel, InertialSensor};
use metrics::{counter, gauge};
use obd_protocol::{ObdError, VehicleBus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use timing::Clock;
use tracing::{debug, error, info, warn};

/// Configuration for the acquisition machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Treat any sink failure as fatal
    pub halt_on_sink_failure: bool,
    /// Send a CSV header line to every sink on start
    pub write_header: bool,
    /// Record formatting
    pub csv: CsvFormat,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            halt_on_sink_failure: false,
            write_header: true,
            csv: CsvFormat::default(),
        }
    }
}

/// Outcome of one completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Milliseconds since start
    pub timestamp_ms: u64,
    /// Non-fatal faults seen during the cycle
    pub flags: SystemFlags,
    /// PIDs whose field was left empty
    pub unresolved: usize,
    /// Sinks that accepted the record
    pub delivered: usize,
    /// Record length in bytes
    pub record_len: usize,
}

impl CycleReport {
    /// Whether any part of the cycle failed
    pub fn is_degraded(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// IMU + vehicle bus acquisition cycle
pub struct AcquisitionMachine<I, B, C> {
    imu: I,
    bus: B,
    clock: C,
    config: MachineConfig,
    sinks: Vec<Box<dyn Sink + Send>>,
    record: CsvRecord,
    pids: Vec<u8>,
    values: Vec<Option<f64>>,
    state: SystemState,
    fault: Option<SystemFlags>,
    epoch: Duration,
    started: bool,
    cycles: u64,
}

impl<I: InertialSensor, B: VehicleBus, C: Clock> AcquisitionMachine<I, B, C> {
    /// Create a machine; drivers are brought up by [`AcquisitionMachine::start`]
    pub fn new(imu: I, bus: B, clock: C, config: MachineConfig) -> Self {
        info!(
            "Creating acquisition machine: pids={}, halt_on_sink_failure={}",
            bus.pid_table().len(),
            config.halt_on_sink_failure
        );

        let record = CsvRecord::new(config.csv.clone());
        Self {
            imu,
            bus,
            clock,
            config,
            sinks: Vec::new(),
            record,
            pids: Vec::new(),
            values: Vec::new(),
            state: SystemState::Idle,
            fault: None,
            epoch: Duration::ZERO,
            started: false,
            cycles: 0,
        }
    }

    /// Register a record destination
    pub fn add_sink<S: Sink + Send + 'static>(&mut self, sink: S) {
        info!("Adding sink {}", sink.name());
        self.sinks.push(Box::new(sink));
    }

    /// Initialize both drivers and send the header line
    pub fn start(&mut self) -> Result<(), SystemError> {
        info!("Starting acquisition");
        self.bring_up()?;

        self.epoch = self.clock.now();
        self.started = true;

        if self.config.write_header {
            let line = header(self.bus.pid_table(), &self.config.csv);
            let (_, failures) = deliver(&mut self.sinks, line.as_bytes());
            for (name, e) in failures {
                warn!("Header not delivered to {}: {}", name, e);
            }
        }
        Ok(())
    }

    /// Run one complete cycle
    ///
    /// Starts the machine on first use. Returns [`SystemError::Faulted`]
    /// without touching any driver while a fault is latched.
    pub fn run_cycle(&mut self) -> Result<CycleReport, SystemError> {
        if let Some(flags) = self.fault {
            return Err(SystemError::Faulted(flags));
        }
        if !self.started {
            self.start()?;
        }

        self.cycles += 1;
        counter!("acquisition_cycles_total").increment(1);
        let mut flags = SystemFlags::empty();

        self.state = SystemState::RequestImu;
        let mut missed = Vec::new();
        for channel in Channel::ALL {
            match self.imu.read_axes(channel) {
                Ok(Some(_)) => {}
                Ok(None) => missed.push(channel),
                Err(e) => {
                    warn!("IMU {:?} read failed: {}", channel, e);
                    flags |= SystemFlags::from(e.flags());
                }
            }
        }

        self.state = SystemState::RequestBus;
        let mut unresolved = 0;
        for slot in 0..self.pids.len() {
            match self.exchange(slot) {
                Ok(value) => {
                    if value.is_none() {
                        debug!("PID {:02X} response too short", self.pids[slot]);
                        unresolved += 1;
                    }
                    self.values[slot] = value;
                }
                Err(e) if e.is_transport() => return Err(self.fail(e.into())),
                Err(e) => {
                    debug!("PID {:02X} unresolved: {}", self.pids[slot], e);
                    flags |= SystemFlags::from(e.flags());
                    self.values[slot] = None;
                    unresolved += 1;
                }
            }
        }
        if unresolved > 0 {
            counter!("acquisition_unresolved_pids_total").increment(unresolved as u64);
        }

        if !missed.is_empty() {
            self.state = SystemState::WaitImu;
            for channel in missed {
                match self.imu.read_axes(channel) {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!("{:?} not ready, keeping previous values", channel),
                    Err(e) => {
                        warn!("IMU {:?} read failed: {}", channel, e);
                        flags |= SystemFlags::from(e.flags());
                    }
                }
            }
        }

        self.state = SystemState::Process;
        let timestamp_ms = self.clock.now().saturating_sub(self.epoch).as_millis() as u64;
        let sample = self.imu.sample();
        self.record.clear();
        self.record.push_sample(timestamp_ms, &sample);
        for value in &self.values {
            self.record.push_pid(*value);
        }
        self.record.finish();
        if self.record.is_truncated() {
            warn!("Record truncated at {} bytes", self.record.len());
            flags |= SystemFlags::TRUNCATED;
        }
        gauge!("acquisition_record_bytes").set(self.record.len() as f64);

        self.state = SystemState::Forward;
        let (delivered, failures) = deliver(&mut self.sinks, self.record.as_bytes());
        let mut escalate = None;
        for (name, e) in failures {
            warn!("Sink {} failed: {}", name, e);
            counter!("acquisition_sink_failures_total", "sink" => name.clone()).increment(1);
            flags |= SystemFlags::SINK;
            if self.config.halt_on_sink_failure && escalate.is_none() {
                escalate = Some(SystemError::Sink { name, source: e });
            }
        }
        if let Some(e) = escalate {
            return Err(self.fail(e));
        }

        self.state = SystemState::Idle;
        Ok(CycleReport {
            cycle: self.cycles,
            timestamp_ms,
            flags,
            unresolved,
            delivered,
            record_len: self.record.len(),
        })
    }

    /// Re-initialize both drivers and clear a latched fault
    pub fn reset(&mut self) -> Result<(), SystemError> {
        info!("Resetting acquisition, latched fault: {:?}", self.fault);
        self.fault = None;
        self.state = SystemState::Idle;
        self.bring_up()?;
        if !self.started {
            self.epoch = self.clock.now();
            self.started = true;
        }
        Ok(())
    }

    /// Current cycle step
    pub fn state(&self) -> SystemState {
        self.state
    }

    /// Whether the drivers have been brought up and the epoch taken
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether a fault is latched
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// Latched fault flags
    pub fn fault_flags(&self) -> Option<SystemFlags> {
        self.fault
    }

    /// Cycles attempted since creation
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Most recent record, terminator included
    pub fn last_record(&self) -> &str {
        self.record.as_str()
    }

    pub fn imu(&self) -> &I {
        &self.imu
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    fn bring_up(&mut self) -> Result<(), SystemError> {
        if let Err(e) = self.imu.init() {
            return Err(self.fail(e.into()));
        }
        if let Err(e) = self.bus.init() {
            return Err(self.fail(e.into()));
        }

        self.pids = self.bus.pid_table().iter().map(|d| d.code).collect();
        self.values = vec![None; self.pids.len()];
        Ok(())
    }

    fn exchange(&mut self, slot: usize) -> Result<Option<f64>, ObdError> {
        let pid = self.pids[slot];
        self.bus.send(slot, pid)?;
        self.bus.receive(slot)?;
        self.bus.decode(slot)
    }

    fn fail(&mut self, err: SystemError) -> SystemError {
        let flags = err.flags();
        self.state = SystemState::Error;
        self.fault = Some(flags);

        if let Err(e) = self.imu.deinit() {
            warn!("IMU shutdown failed: {}", e);
        }
        if let Err(e) = self.bus.deinit() {
            warn!("Vehicle bus shutdown failed: {}", e);
        }

        error!(
            cycle = self.cycles,
            flags = ?flags,
            "Acquisition halted: {}", err
        );
        counter!("acquisition_faults_total").increment(1);
        err
    }
}

/// Send `bytes` to every sink, returning the delivery count and failures
fn deliver(
    sinks: &mut [Box<dyn Sink + Send>],
    bytes: &[u8],
) -> (usize, Vec<(String, SinkError)>) {
    let mut delivered = 0;
    let mut failures = Vec::new();
    for sink in sinks.iter_mut() {
        match sink.send(bytes) {
            Ok(()) => delivered += 1,
            Err(e) => failures.push((sink.name().to_string(), e)),
        }
    }
    (delivered, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use imu_driver::{ImuConfig, ImuDriver, SimulatedImu};
    use obd_protocol::{build_table, CanConfig, CanQueryDriver, Pid, SimulatedCanBus, SimulatedEcu};
    use timing::SimClock;

    type Machine = AcquisitionMachine<
        ImuDriver<SimulatedImu, SimClock>,
        CanQueryDriver<SimulatedCanBus, SimClock>,
        SimClock,
    >;

    fn machine(config: MachineConfig) -> (Machine, SimulatedCanBus, MemorySink) {
        let clock = SimClock::new();
        let imu = ImuDriver::new(SimulatedImu::new(), clock.clone(), ImuConfig::default());
        let can = SimulatedCanBus::new(SimulatedEcu::new());
        let bus_config = CanConfig {
            pids: vec![Pid::EngineSpeed, Pid::VehicleSpeed],
            ..Default::default()
        };
        let bus = CanQueryDriver::new(can.clone(), clock.clone(), bus_config);

        let sink = MemorySink::new("memory");
        let mut machine = AcquisitionMachine::new(imu, bus, clock, config);
        machine.add_sink(sink.clone());
        (machine, can, sink)
    }

    fn headerless() -> MachineConfig {
        MachineConfig {
            write_header: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_cycle_returns_to_idle() {
        let (mut machine, _, sink) = machine(headerless());
        let report = machine.run_cycle().unwrap();

        assert_eq!(machine.state(), SystemState::Idle);
        assert_eq!(report.cycle, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.unresolved, 0);
        assert!(!report.is_degraded());
        assert_eq!(sink.lines().len(), 1);
        assert_eq!(report.record_len, machine.last_record().len());
    }

    #[test]
    fn test_header_written_on_start() {
        let (mut machine, _, sink) = machine(MachineConfig::default());
        machine.start().unwrap();

        let expected = header(&build_table(&[Pid::EngineSpeed, Pid::VehicleSpeed]), &CsvFormat::default());
        assert_eq!(sink.lines(), [expected.as_str().to_string()]);
    }

    #[test]
    fn test_faulted_machine_refuses_cycles() {
        let (mut machine, can, _) = machine(headerless());
        machine.start().unwrap();
        can.set_tx_full(true);

        let err = machine.run_cycle().unwrap_err();
        assert!(err.flags().contains(SystemFlags::CAN | SystemFlags::CAN_TX));
        assert_eq!(machine.state(), SystemState::Error);

        let cycles = machine.cycles();
        assert!(matches!(machine.run_cycle(), Err(SystemError::Faulted(_))));
        assert_eq!(machine.cycles(), cycles);
    }

    #[test]
    fn test_sink_failure_escalates_when_configured() {
        let config = MachineConfig {
            halt_on_sink_failure: true,
            ..headerless()
        };
        let (mut machine, _, sink) = machine(config);
        sink.set_failing(true);

        let err = machine.run_cycle().unwrap_err();
        assert!(matches!(err, SystemError::Sink { .. }));
        assert_eq!(machine.fault_flags(), Some(SystemFlags::SINK));
    }
}
