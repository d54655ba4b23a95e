//! Cycle pacing under a simulated clock

use acquisition::{
    AcquisitionMachine, CycleRunner, MachineConfig, MemorySink, RunnerConfig, StopReason,
    SystemFlags, TickMode,
};
use imu_driver::{ImuConfig, ImuDriver, SimulatedImu};
use obd_protocol::{
    CanConfig, CanQueryDriver, Pid, SimulatedCanBus, SimulatedEcu, SimulatedElm, TextConfig,
    TextDriver,
};
use std::time::Duration;
use timing::{Clock, SimClock};

type Machine = AcquisitionMachine<
    ImuDriver<SimulatedImu, SimClock>,
    CanQueryDriver<SimulatedCanBus, SimClock>,
    SimClock,
>;

fn machine(clock: &SimClock, ecu: &SimulatedEcu) -> (Machine, MemorySink) {
    let imu = ImuDriver::new(SimulatedImu::new(), clock.clone(), ImuConfig::default());
    let bus_config = CanConfig {
        pids: vec![Pid::EngineSpeed, Pid::VehicleSpeed],
        ..Default::default()
    };
    let bus = CanQueryDriver::new(SimulatedCanBus::new(ecu.clone()), clock.clone(), bus_config);

    let sink = MemorySink::new("memory");
    let config = MachineConfig {
        write_header: false,
        ..Default::default()
    };
    let mut machine = AcquisitionMachine::new(imu, bus, clock.clone(), config);
    machine.add_sink(sink.clone());
    (machine, sink)
}

fn timestamps(sink: &MemorySink) -> Vec<u64> {
    sink.lines()
        .iter()
        .map(|line| line.split(',').next().unwrap().parse().unwrap())
        .collect()
}

#[test]
fn test_delay_mode_paces_cycles() {
    let clock = SimClock::new();
    let ecu = SimulatedEcu::new();
    let (mut machine, sink) = machine(&clock, &ecu);
    machine.start().unwrap();

    let runner = CycleRunner::new(
        clock.clone(),
        RunnerConfig {
            max_cycles: Some(4),
            ..Default::default()
        },
    );

    assert_eq!(runner.run(&mut machine), StopReason::CycleLimit);
    assert_eq!(timestamps(&sink), [0, 250, 500, 750]);
}

#[test]
fn test_first_period_excludes_bring_up() {
    let clock = SimClock::new();
    let imu = ImuDriver::new(SimulatedImu::new(), clock.clone(), ImuConfig::default());
    let bus_config = TextConfig {
        pids: vec![Pid::EngineSpeed],
        ..Default::default()
    };
    let adapter = SimulatedElm::new(SimulatedEcu::new());
    let bus = TextDriver::new(adapter, clock.clone(), bus_config);

    let sink = MemorySink::new("memory");
    let config = MachineConfig {
        write_header: false,
        ..Default::default()
    };
    let mut machine = AcquisitionMachine::new(imu, bus, clock.clone(), config);
    machine.add_sink(sink.clone());

    let runner = CycleRunner::new(
        clock.clone(),
        RunnerConfig {
            max_cycles: Some(3),
            ..Default::default()
        },
    );
    assert_eq!(runner.run(&mut machine), StopReason::CycleLimit);
    assert!(machine.is_started());
    // Adapter reset delay and IMU settle happen before the first period
    assert_eq!(timestamps(&sink), [0, 250, 500]);
}

#[test]
fn test_start_failure_stops_loop() {
    let clock = SimClock::new();
    let ecu = SimulatedEcu::new();
    let device = SimulatedImu::new();
    device.handle().set_who_am_i(0x00);
    let imu = ImuDriver::new(device, clock.clone(), ImuConfig::default());
    let bus = CanQueryDriver::new(SimulatedCanBus::new(ecu), clock.clone(), CanConfig::default());
    let mut machine = AcquisitionMachine::new(imu, bus, clock.clone(), MachineConfig::default());

    let runner = CycleRunner::new(clock, RunnerConfig::default());
    match runner.run(&mut machine) {
        StopReason::Fault(flags) => assert!(flags.contains(SystemFlags::ID)),
        other => panic!("unexpected stop: {other:?}"),
    }
    assert_eq!(machine.cycles(), 0);
}

#[test]
fn test_timer_mode_waits_for_run_flag() {
    let clock = SimClock::new();
    let ecu = SimulatedEcu::new();
    let (mut machine, sink) = machine(&clock, &ecu);

    let runner = CycleRunner::new(
        clock.clone(),
        RunnerConfig {
            tick: TickMode::Timer,
            max_cycles: Some(1),
            ..Default::default()
        },
    );
    runner.run_flag().set();

    assert_eq!(runner.run(&mut machine), StopReason::CycleLimit);
    assert_eq!(sink.records().len(), 1);
    assert!(!runner.run_flag().take());
}

#[test]
fn test_stop_request_ends_loop() {
    let clock = SimClock::new();
    let ecu = SimulatedEcu::new();
    let (mut machine, sink) = machine(&clock, &ecu);

    let runner = CycleRunner::new(clock, RunnerConfig::default());
    runner.stop_handle().stop();

    assert_eq!(runner.run(&mut machine), StopReason::Shutdown);
    assert!(sink.records().is_empty());
    assert_eq!(machine.cycles(), 0);
}

#[test]
fn test_fault_stops_loop() {
    let clock = SimClock::new();
    let ecu = SimulatedEcu::new();
    ecu.set_silent(true);
    let (mut machine, _) = machine(&clock, &ecu);

    let runner = CycleRunner::new(clock, RunnerConfig::default());
    match runner.run(&mut machine) {
        StopReason::Fault(flags) => assert!(flags.contains(SystemFlags::CAN_RX)),
        other => panic!("unexpected stop: {other:?}"),
    }
    assert!(machine.is_faulted());
}

#[test]
fn test_fault_is_reset_when_not_stopping() {
    let clock = SimClock::new();
    let ecu = SimulatedEcu::new();
    ecu.set_silent(true);
    let (mut machine, sink) = machine(&clock, &ecu);

    let runner = CycleRunner::new(
        clock.clone(),
        RunnerConfig {
            stop_on_fault: false,
            max_cycles: Some(1),
            ..Default::default()
        },
    );
    assert_eq!(runner.run(&mut machine), StopReason::CycleLimit);
    assert!(!machine.is_faulted());
    assert!(sink.records().is_empty());
    // Receive timeout plus reset delay
    assert!(clock.now() >= Duration::from_millis(2000));

    ecu.set_silent(false);
    let runner = CycleRunner::new(
        clock,
        RunnerConfig {
            max_cycles: Some(1),
            ..Default::default()
        },
    );
    assert_eq!(runner.run(&mut machine), StopReason::CycleLimit);
    assert_eq!(sink.records().len(), 1);
}
