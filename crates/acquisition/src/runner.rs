//! Cycle Runner
//!
//! Drives an [`AcquisitionMachine`] at a fixed period. In timer mode an
//! external tick (see [`tick`]) sets a [`RunFlag`] that the loop consumes
//! with test-and-clear; in delay mode the loop sleeps out the remainder of
//! the period itself.

use crate::error::SystemFlags;
use crate::machine::AcquisitionMachine;
use imu_driver::{InertialSensor, ReadyFlag};
use obd_protocol::VehicleBus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use timing::{poll_interval, Clock};
use tracing::{debug, info, warn};

/// Periodic "run one cycle" signal
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<ReadyFlag>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cycle
    pub fn set(&self) {
        self.0.set();
    }

    /// Consume a pending request
    pub fn take(&self) -> bool {
        self.0.take()
    }
}

/// Shared shutdown request
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How cycles are paced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    /// Wait for the run flag set by an external timer
    Timer,
    /// Sleep the rest of the period after each cycle
    Delay,
}

impl Default for TickMode {
    fn default() -> Self {
        TickMode::Delay
    }
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Cycle period in milliseconds
    pub period_ms: u64,
    /// Pacing mode
    pub tick: TickMode,
    /// Stop when the machine latches a fault instead of resetting it
    pub stop_on_fault: bool,
    /// Wait before a reset attempt in milliseconds
    pub reset_delay_ms: u64,
    /// Run flag poll interval in timer mode, milliseconds
    pub poll_interval_ms: u64,
    /// Stop after this many cycles
    pub max_cycles: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            period_ms: 250,
            tick: TickMode::Delay,
            stop_on_fault: true,
            reset_delay_ms: 1000,
            poll_interval_ms: 1,
            max_cycles: None,
        }
    }
}

/// Why [`CycleRunner::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stop was requested
    Shutdown,
    /// The machine latched a fault
    Fault(SystemFlags),
    /// `max_cycles` reached
    CycleLimit,
}

/// Blocking cycle loop
pub struct CycleRunner<C> {
    clock: C,
    config: RunnerConfig,
    run: RunFlag,
    stop: StopHandle,
}

impl<C: Clock> CycleRunner<C> {
    pub fn new(clock: C, config: RunnerConfig) -> Self {
        info!(
            "Creating cycle runner: period={}ms, tick={:?}, stop_on_fault={}",
            config.period_ms, config.tick, config.stop_on_fault
        );

        Self {
            clock,
            config,
            run: RunFlag::new(),
            stop: StopHandle::default(),
        }
    }

    /// Flag to set from the periodic timer in [`TickMode::Timer`]
    pub fn run_flag(&self) -> RunFlag {
        self.run.clone()
    }

    /// Handle that ends [`CycleRunner::run`] before its next cycle
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run cycles until stopped
    pub fn run<I, B, MC>(&self, machine: &mut AcquisitionMachine<I, B, MC>) -> StopReason
    where
        I: InertialSensor,
        B: VehicleBus,
        MC: Clock,
    {
        let period = Duration::from_millis(self.config.period_ms);
        let poll = poll_interval(self.config.poll_interval_ms);
        let mut completed = 0u64;

        // Bring-up stays out of the first period
        if !self.stop.is_stopped() && !machine.is_started() && !machine.is_faulted() {
            if let Err(e) = machine.start() {
                if self.config.stop_on_fault {
                    warn!("Acquisition failed to start: {}", e);
                    return StopReason::Fault(e.flags());
                }
                warn!("Acquisition failed to start, retrying through reset: {}", e);
            }
        }

        info!("Cycle loop started");
        loop {
            if self.stop.is_stopped() {
                info!("Cycle loop stopped after {} cycle(s)", completed);
                return StopReason::Shutdown;
            }
            if self.config.max_cycles.is_some_and(|max| completed >= max) {
                info!("Cycle limit of {} reached", completed);
                return StopReason::CycleLimit;
            }
            if self.config.tick == TickMode::Timer && !self.run.take() {
                self.clock.sleep(poll);
                continue;
            }

            let started = self.clock.now();
            completed += 1;
            match machine.run_cycle() {
                Ok(report) if report.is_degraded() => {
                    debug!("Cycle {} degraded: {:?}", report.cycle, report.flags)
                }
                Ok(_) => {}
                Err(e) if self.config.stop_on_fault => {
                    warn!("Cycle loop halted: {}", e);
                    return StopReason::Fault(e.flags());
                }
                Err(e) => {
                    warn!("Cycle failed, resetting: {}", e);
                    self.clock
                        .sleep(Duration::from_millis(self.config.reset_delay_ms));
                    if let Err(e) = machine.reset() {
                        warn!("Reset failed: {}", e);
                    }
                }
            }

            if self.config.tick == TickMode::Delay {
                let elapsed = self.clock.now().saturating_sub(started);
                self.clock.sleep(period.saturating_sub(elapsed));
            }
        }
    }
}

/// Set `flag` every `period` until `stop` is requested
pub async fn tick(flag: RunFlag, period: Duration, stop: StopHandle) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !stop.is_stopped() {
        interval.tick().await;
        flag.set();
    }
    debug!("Tick task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flag_is_single_shot() {
        let flag = RunFlag::new();
        let timer = flag.clone();

        assert!(!flag.take());
        timer.set();
        timer.set();
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn test_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.period_ms, 250);
        assert_eq!(config.tick, TickMode::Delay);
        assert!(config.stop_on_fault);
        assert_eq!(config.max_cycles, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sets_flag_each_period() {
        let flag = RunFlag::new();
        let stop = StopHandle::default();
        let task = tokio::spawn(tick(flag.clone(), Duration::from_millis(250), stop.clone()));

        // First tick completes immediately
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(flag.take());
        assert!(!flag.take());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(flag.take());

        stop.stop();
        tokio::time::sleep(Duration::from_millis(250)).await;
        task.await.unwrap();
    }
}
