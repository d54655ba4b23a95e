//! Vehicle Telemetry Node
//!
//! Runs the IMU + OBD-II acquisition cycle on Linux hardware (spidev, GPIO
//! interrupt lines, serial ELM327 adapter) or fully simulated, streaming one
//! CSV record per cycle to the configured sinks.

mod app;
mod hardware;
mod logging;
mod serial;
mod settings;

pub use app::run;
pub use hardware::{watch_interrupts, SpidevDevice, SpidevError};
pub use logging::init_logging;
pub use serial::{open_port, SerialAdapter, SerialLink};
pub use settings::{
    BusSettings, Cli, ImuSettings, LogSettings, MetricsSettings, SerialSinkSettings, Settings,
    SinkSettings, Transport, CONFIG_ENV,
};

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Start the Prometheus exporter on `addr`
pub fn install_metrics(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics address {:?}", addr))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!("acquisition_cycles_total", "Acquisition cycles attempted");
    describe_counter!("acquisition_faults_total", "Faults latched by the acquisition machine");
    describe_counter!("acquisition_unresolved_pids_total", "PID fields left empty");
    describe_counter!("acquisition_sink_failures_total", "Records rejected by a sink");
    describe_gauge!("acquisition_record_bytes", "Length of the last CSV record");

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}
