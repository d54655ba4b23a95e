//! Node Wiring
//!
//! Builds the IMU, vehicle bus and sinks from [`Settings`], then runs the
//! blocking cycle loop beside the async tick and shutdown handling.

use crate::hardware::{watch_interrupts, SpidevDevice};
use crate::serial::{open_port, SerialAdapter, SerialLink};
use crate::settings::{Settings, Transport};
use acquisition::{tick, AcquisitionMachine, CycleRunner, StopReason, TickMode, WriterSink};
use anyhow::{bail, Context, Result};
use imu_driver::{AcquisitionMode, ImuDriver, InertialSensor, SimulatedImu};
use obd_protocol::{
    CanQueryDriver, SimulatedCanBus, SimulatedEcu, SimulatedElm, TextDriver, VehicleBus,
};
use std::time::Duration;
use timing::SystemClock;
use tracing::{info, warn};

/// Run the node until Ctrl-C or a latched fault
pub async fn run(settings: Settings) -> Result<()> {
    let clock = SystemClock::new();

    if settings.simulate {
        info!("Running against simulated hardware");
        let device = SimulatedImu::new();
        let handle = device.handle();
        handle.set_accel_raw([0, 0, 4096]);
        handle.set_temperature_raw(0);

        let imu = ImuDriver::new(device, clock, settings.imu.driver.clone());
        if settings.imu.driver.mode == AcquisitionMode::Interrupt {
            warn!("Interrupt mode without interrupt lines; every cycle reuses the primed sample");
        }
        return with_bus(imu, settings, clock).await;
    }

    let spi = SpidevDevice::open(&settings.imu.device, settings.imu.speed_hz)
        .with_context(|| format!("Failed to open {}", settings.imu.device))?;
    let imu = ImuDriver::new(spi, clock, settings.imu.driver.clone());

    if settings.imu.driver.mode == AcquisitionMode::Interrupt {
        watch_interrupts(
            &settings.imu.gpio_chip,
            settings.imu.int1_line,
            settings.imu.int2_line,
            imu.interrupts(),
        )
        .with_context(|| format!("Failed to watch {}", settings.imu.gpio_chip))?;
    }
    with_bus(imu, settings, clock).await
}

async fn with_bus<I>(imu: I, settings: Settings, clock: SystemClock) -> Result<()>
where
    I: InertialSensor + Send + 'static,
{
    let bus = &settings.bus;
    match (bus.transport, settings.simulate) {
        (Transport::Can, true) => {
            let can = SimulatedCanBus::new(SimulatedEcu::animated());
            let driver = CanQueryDriver::new(can, clock, bus.can.clone());
            drive(imu, driver, settings, clock).await
        }
        (Transport::Can, false) => {
            bail!("CAN transport has no hardware controller on this host; set simulate = true")
        }
        (Transport::Text, true) => {
            let adapter = SimulatedElm::new(SimulatedEcu::animated());
            let driver = TextDriver::new(adapter, clock, bus.text.clone());
            drive(imu, driver, settings, clock).await
        }
        (Transport::Text, false) => {
            let adapter = SerialAdapter::open(&bus.port, bus.baud_rate)
                .with_context(|| format!("Failed to open adapter on {}", bus.port))?;
            let mut driver = TextDriver::new(adapter, clock, bus.text.clone());
            if let Some(path) = &bus.forward_port {
                let link = SerialLink::open(path, bus.baud_rate)
                    .with_context(|| format!("Failed to open forward port {}", path))?;
                driver = driver.with_forward(Box::new(link));
            }
            drive(imu, driver, settings, clock).await
        }
    }
}

async fn drive<I, B>(imu: I, bus: B, settings: Settings, clock: SystemClock) -> Result<()>
where
    I: InertialSensor + Send + 'static,
    B: VehicleBus + Send + 'static,
{
    let mut machine = AcquisitionMachine::new(imu, bus, clock, settings.machine.clone());
    if settings.sinks.stdout {
        machine.add_sink(WriterSink::new("stdout", std::io::stdout()));
    }
    for sink in &settings.sinks.serial {
        let port = open_port(&sink.port, sink.baud_rate)
            .with_context(|| format!("Failed to open sink {}", sink.port))?;
        machine.add_sink(WriterSink::new(sink.port.clone(), port));
    }

    let runner = CycleRunner::new(clock, settings.runner.clone());
    let stop = runner.stop_handle();

    let ticker = match settings.runner.tick {
        TickMode::Timer => {
            let period = Duration::from_millis(settings.runner.period_ms);
            Some(tokio::spawn(tick(runner.run_flag(), period, stop.clone())))
        }
        TickMode::Delay => None,
    };

    let mut cycles = tokio::task::spawn_blocking(move || runner.run(&mut machine));
    let reason = tokio::select! {
        result = &mut cycles => result.context("Cycle loop panicked")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            stop.stop();
            cycles.await.context("Cycle loop panicked")?
        }
    };

    stop.stop();
    if let Some(ticker) = ticker {
        ticker.abort();
    }

    match reason {
        StopReason::Fault(flags) => bail!("Acquisition halted with fault {:?}", flags),
        StopReason::Shutdown | StopReason::CycleLimit => {
            info!("Acquisition stopped: {:?}", reason);
            Ok(())
        }
    }
}
