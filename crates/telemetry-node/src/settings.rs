//! Node Settings
//!
//! Loaded from an optional TOML file layered with `TELEMETRY__*`
//! environment variables (`TELEMETRY__RUNNER__PERIOD_MS=100`).

use acquisition::{MachineConfig, RunnerConfig};
use clap::Parser;
use config::{Config, ConfigError, Environment, File, FileFormat, Map};
use imu_driver::ImuConfig;
use obd_protocol::{CanConfig, TextConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "TELEMETRY";

/// Environment variable naming the settings file
pub const CONFIG_ENV: &str = "TELEMETRY_CONFIG";

/// Settings file looked up in the working directory by default
pub const DEFAULT_CONFIG: &str = "telemetry";

/// Top-level node settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run against simulated IMU and vehicle
    pub simulate: bool,
    pub log: LogSettings,
    pub imu: ImuSettings,
    pub bus: BusSettings,
    pub machine: MachineConfig,
    pub runner: RunnerConfig,
    pub sinks: SinkSettings,
    pub metrics: MetricsSettings,
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Maximum level (`trace` .. `error`)
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// IMU wiring and driver options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuSettings {
    /// spidev device node
    pub device: String,
    /// SPI clock in Hz
    pub speed_hz: u32,
    /// GPIO chip carrying the interrupt lines
    pub gpio_chip: String,
    /// Line offset of INT1 (accelerometer data-ready)
    pub int1_line: Option<u32>,
    /// Line offset of INT2 (gyroscope data-ready)
    pub int2_line: Option<u32>,
    pub driver: ImuConfig,
}

impl Default for ImuSettings {
    fn default() -> Self {
        Self {
            device: "/dev/spidev0.0".to_string(),
            speed_hz: 1_000_000,
            gpio_chip: "gpiochip0".to_string(),
            int1_line: None,
            int2_line: None,
            driver: ImuConfig::default(),
        }
    }
}

/// Vehicle bus transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// ELM327-compatible adapter on a serial port
    Text,
    /// Raw CAN controller
    Can,
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Text
    }
}

/// Vehicle bus options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub transport: Transport,
    /// Adapter serial port
    pub port: String,
    /// Adapter baud rate
    pub baud_rate: u32,
    /// Serial port receiving a copy of every decoded adapter frame
    pub forward_port: Option<String>,
    pub text: TextConfig,
    pub can: CanConfig,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            transport: Transport::Text,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 38_400,
            forward_port: None,
            text: TextConfig::default(),
            can: CanConfig::default(),
        }
    }
}

/// Record destinations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Write records to standard output
    pub stdout: bool,
    /// Serial ports receiving every record
    pub serial: Vec<SerialSinkSettings>,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            stdout: true,
            serial: Vec::new(),
        }
    }
}

/// One serial record destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSinkSettings {
    pub port: String,
    #[serde(default = "default_sink_baud")]
    pub baud_rate: u32,
}

fn default_sink_baud() -> u32 {
    115_200
}

/// Prometheus exporter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Listen address, exporter disabled when unset
    pub listen: Option<String>,
}

impl Settings {
    /// Load settings from `path` (or `telemetry.toml` if present) and the
    /// process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };
        Self::build(Config::builder().add_source(file), None)
    }

    /// Parse TOML text layered with an explicit environment map
    pub fn from_toml(toml: &str, env: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let file = File::from_str(toml, FileFormat::Toml);
        Self::build(Config::builder().add_source(file), env)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(env);

        builder.add_source(environment).build()?.try_deserialize()
    }
}

/// Command line
#[derive(Debug, Parser)]
#[command(name = "telemetry-node", version, about = "IMU and OBD-II telemetry node")]
pub struct Cli {
    /// Settings file (defaults to `telemetry.toml` when present)
    #[arg(long, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use acquisition::TickMode;
    use imu_driver::AcquisitionMode;
    use obd_protocol::Pid;

    fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("", env(&[])).unwrap();

        assert!(!settings.simulate);
        assert_eq!(settings.log.level, "info");
        assert_eq!(settings.runner.period_ms, 250);
        assert_eq!(settings.runner.tick, TickMode::Delay);
        assert!(settings.runner.stop_on_fault);
        assert!(settings.machine.write_header);
        assert!(!settings.machine.halt_on_sink_failure);
        assert_eq!(settings.machine.csv.capacity, 512);
        assert_eq!(settings.imu.driver.timeout_ms, 1000);
        assert_eq!(settings.imu.driver.identify_attempts, 10);
        assert_eq!(settings.bus.transport, Transport::Text);
        assert_eq!(settings.bus.text.forward_attempts, 3);
        assert_eq!(settings.bus.can.pids.len(), 9);
        assert!(settings.sinks.stdout);
        assert!(settings.metrics.listen.is_none());
    }

    #[test]
    fn test_file_values() {
        let toml = r#"
            simulate = true

            [imu.driver]
            mode = "interrupt"

            [bus]
            transport = "can"

            [bus.can]
            pids = ["engine_speed", "vehicle_speed"]

            [[sinks.serial]]
            port = "/dev/ttyACM0"
        "#;
        let settings = Settings::from_toml(toml, env(&[])).unwrap();

        assert!(settings.simulate);
        assert_eq!(settings.imu.driver.mode, AcquisitionMode::Interrupt);
        assert_eq!(settings.bus.transport, Transport::Can);
        assert_eq!(settings.bus.can.pids, [Pid::EngineSpeed, Pid::VehicleSpeed]);
        assert_eq!(settings.sinks.serial[0].baud_rate, 115_200);
    }

    #[test]
    fn test_environment_overrides_file() {
        let toml = r#"
            [runner]
            period_ms = 500
        "#;
        let settings = Settings::from_toml(
            toml,
            env(&[
                ("TELEMETRY__RUNNER__PERIOD_MS", "100"),
                ("TELEMETRY__RUNNER__TICK", "timer"),
                ("TELEMETRY__MACHINE__HALT_ON_SINK_FAILURE", "true"),
                ("TELEMETRY__LOG__LEVEL", "debug"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.runner.period_ms, 100);
        assert_eq!(settings.runner.tick, TickMode::Timer);
        assert!(settings.machine.halt_on_sink_failure);
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    fn test_cli_config_path() {
        // Only test touching the variable
        std::env::remove_var(CONFIG_ENV);

        let cli = Cli::try_parse_from(["node", "--config", "a.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));

        let cli = Cli::try_parse_from(["node", "--config=c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));

        let cli = Cli::try_parse_from(["node"]).unwrap();
        assert_eq!(cli.config, None);

        std::env::set_var(CONFIG_ENV, "b.toml");
        let from_env = Cli::try_parse_from(["node"]).map(|cli| cli.config);
        let from_arg = Cli::try_parse_from(["node", "--config", "a.toml"]).map(|cli| cli.config);
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(from_env.unwrap(), Some(PathBuf::from("b.toml")));
        assert_eq!(from_arg.unwrap(), Some(PathBuf::from("a.toml")));
        assert!(Cli::try_parse_from(["node", "--config"]).is_err());
    }
}
