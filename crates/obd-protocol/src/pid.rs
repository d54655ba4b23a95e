//! OBD-II PID Definitions and Response Decoding
//!
//! Each PID carries its own decode formula. Formulas read the raw response
//! buffer `[len, service + 0x40, pid, A, B, C, D, ..]` and refuse to decode
//! when the declared length `len` does not cover the bytes they need.

use serde::{Deserialize, Serialize};

/// Standard OBD-II PIDs for service 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Pid {
    /// Engine speed (0x0C)
    EngineSpeed = 0x0C,
    /// Vehicle speed (0x0D)
    VehicleSpeed = 0x0D,
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Distance traveled with malfunction indicator lamp on (0x21)
    DistanceWithMil = 0x21,
    /// Oxygen sensor 1 voltage (0x24)
    O2Sensor1Voltage = 0x24,
    /// Oxygen sensor 2 voltage (0x25)
    O2Sensor2Voltage = 0x25,
    /// Oxygen sensor 1 current (0x34)
    O2Sensor1Current = 0x34,
    /// Oxygen sensor 2 current (0x35)
    O2Sensor2Current = 0x35,
    /// Engine coolant temperature (0x05)
    CoolantTemperature = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrim = 0x07,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Mass air flow rate (0x10)
    MassAirFlow = 0x10,
}

impl Pid {
    /// Every supported PID in catalogue order
    pub const ALL: [Pid; 14] = [
        Pid::EngineSpeed,
        Pid::VehicleSpeed,
        Pid::EngineLoad,
        Pid::ThrottlePosition,
        Pid::DistanceWithMil,
        Pid::O2Sensor1Voltage,
        Pid::O2Sensor2Voltage,
        Pid::O2Sensor1Current,
        Pid::O2Sensor2Current,
        Pid::CoolantTemperature,
        Pid::ShortFuelTrim,
        Pid::LongFuelTrim,
        Pid::IntakeManifoldPressure,
        Pid::MassAirFlow,
    ];

    /// Default acquisition table
    pub const DEFAULT_TABLE: [Pid; 9] = [
        Pid::EngineSpeed,
        Pid::VehicleSpeed,
        Pid::EngineLoad,
        Pid::ThrottlePosition,
        Pid::DistanceWithMil,
        Pid::O2Sensor1Voltage,
        Pid::O2Sensor2Voltage,
        Pid::O2Sensor1Current,
        Pid::O2Sensor2Current,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Look up a PID by its code
    pub fn from_code(code: u8) -> Option<Pid> {
        Pid::ALL.into_iter().find(|pid| pid.as_hex() == code)
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Pid::EngineSpeed => "Engine speed",
            Pid::VehicleSpeed => "Vehicle speed",
            Pid::EngineLoad => "Calculated engine load",
            Pid::ThrottlePosition => "Throttle position",
            Pid::DistanceWithMil => "Distance traveled with MIL on",
            Pid::O2Sensor1Voltage => "Oxygen sensor 1 (Voltage)",
            Pid::O2Sensor2Voltage => "Oxygen sensor 2 (Voltage)",
            Pid::O2Sensor1Current => "Oxygen sensor 1 (Current)",
            Pid::O2Sensor2Current => "Oxygen sensor 2 (Current)",
            Pid::CoolantTemperature => "Engine coolant temperature",
            Pid::ShortFuelTrim => "Short term fuel trim",
            Pid::LongFuelTrim => "Long term fuel trim",
            Pid::IntakeManifoldPressure => "Intake manifold pressure",
            Pid::MassAirFlow => "Mass air flow",
        }
    }

    /// Unit of the decoded value
    pub fn unit(&self) -> &'static str {
        match self {
            Pid::EngineSpeed => "rpm",
            Pid::VehicleSpeed => "km/h",
            Pid::EngineLoad | Pid::ThrottlePosition => "%",
            Pid::ShortFuelTrim | Pid::LongFuelTrim => "%",
            Pid::DistanceWithMil => "km",
            Pid::O2Sensor1Voltage | Pid::O2Sensor2Voltage => "V",
            Pid::O2Sensor1Current | Pid::O2Sensor2Current => "mA",
            Pid::CoolantTemperature => "°C",
            Pid::IntakeManifoldPressure => "kPa",
            Pid::MassAirFlow => "g/s",
        }
    }

    /// Number of data bytes the formula consumes (A, B, C, D)
    pub fn data_bytes(&self) -> usize {
        match self {
            Pid::EngineSpeed | Pid::DistanceWithMil | Pid::MassAirFlow => 2,
            Pid::O2Sensor1Current | Pid::O2Sensor2Current => 4,
            _ => 1,
        }
    }

    /// Decode a raw response buffer
    ///
    /// Returns `None` when the declared length is too short for the formula.
    pub fn decode(&self, response: &[u8]) -> Option<f64> {
        let declared = *response.first()? as usize;
        let needed = 2 + self.data_bytes();
        if declared < needed || response.len() <= needed {
            return None;
        }

        let byte = |i: usize| response[i] as f64;
        let (a, b) = (byte(3), byte(4));
        let value = match self {
            // ((A*256)+B)/4
            Pid::EngineSpeed => (a * 256.0 + b) / 4.0,
            Pid::VehicleSpeed | Pid::IntakeManifoldPressure => a,
            // A/2.55
            Pid::EngineLoad | Pid::ThrottlePosition => a / 2.55,
            Pid::DistanceWithMil => a * 256.0 + b,
            Pid::O2Sensor1Voltage | Pid::O2Sensor2Voltage => a / 200.0,
            // ((C*256)+D)/256 - 128
            Pid::O2Sensor1Current | Pid::O2Sensor2Current => {
                (byte(5) * 256.0 + byte(6)) / 256.0 - 128.0
            }
            Pid::CoolantTemperature => a - 40.0,
            // (A-128)*100/128
            Pid::ShortFuelTrim | Pid::LongFuelTrim => (a - 128.0) * 100.0 / 128.0,
            Pid::MassAirFlow => (a * 256.0 + b) / 100.0,
        };
        Some(value)
    }
}

/// Entry of a driver's PID table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidDescriptor {
    /// PID code as sent on the bus
    pub code: u8,
    /// Human-readable name
    pub name: &'static str,
    /// Unit of the decoded value
    pub unit: &'static str,
    /// Decode kind
    pub kind: Pid,
}

impl PidDescriptor {
    /// Decode a raw response buffer with this entry's formula
    pub fn decode(&self, response: &[u8]) -> Option<f64> {
        self.kind.decode(response)
    }
}

impl From<Pid> for PidDescriptor {
    fn from(pid: Pid) -> Self {
        Self {
            code: pid.as_hex(),
            name: pid.name(),
            unit: pid.unit(),
            kind: pid,
        }
    }
}

/// Build a descriptor table from a list of PIDs, preserving order
pub fn build_table(pids: &[Pid]) -> Vec<PidDescriptor> {
    pids.iter().copied().map(PidDescriptor::from).collect()
}

/// Find the descriptor for a PID code
pub fn lookup(table: &[PidDescriptor], code: u8) -> Option<&PidDescriptor> {
    table.iter().find(|descriptor| descriptor.code == code)
}
