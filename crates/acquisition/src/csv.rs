//! CSV Telemetry Record
//!
//! Line layout: `timestamp,ax,ay,az,gx,gy,gz,temp,pid1,..,pidN` plus a line
//! terminator. The record never grows past its capacity (terminator
//! included); a field that does not fit is cut short and the record is
//! marked truncated.

use imu_driver::SensorSample;
use obd_protocol::PidDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Field separator
pub const SEPARATOR: char = ',';

/// Line terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Crlf,
    Lf,
}

impl LineEnding {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Crlf => "\r\n",
            LineEnding::Lf => "\n",
        }
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        LineEnding::Crlf
    }
}

/// Record formatting options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvFormat {
    /// Maximum line length in bytes, terminator included
    pub capacity: usize,
    /// Line terminator
    pub line_ending: LineEnding,
    /// Decimals for accelerometer and gyroscope fields
    pub imu_precision: usize,
    /// Decimals for the temperature field
    pub temperature_precision: usize,
    /// Decimals for PID fields
    pub pid_precision: usize,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            capacity: 512,
            line_ending: LineEnding::Crlf,
            imu_precision: 4,
            temperature_precision: 2,
            pid_precision: 2,
        }
    }
}

/// One bounded CSV line
#[derive(Debug, Clone)]
pub struct CsvRecord {
    line: String,
    format: CsvFormat,
    fields: usize,
    truncated: bool,
    scratch: String,
}

impl CsvRecord {
    pub fn new(format: CsvFormat) -> Self {
        Self {
            line: String::with_capacity(format.capacity),
            format,
            fields: 0,
            truncated: false,
            scratch: String::new(),
        }
    }

    /// Start a new line
    pub fn clear(&mut self) {
        self.line.clear();
        self.fields = 0;
        self.truncated = false;
    }

    /// Append a raw text field
    pub fn push_str(&mut self, field: &str) {
        let reserved = self.format.line_ending.as_str().len();
        let mut available = self
            .format
            .capacity
            .saturating_sub(reserved)
            .saturating_sub(self.line.len());

        if self.fields > 0 {
            if available == 0 {
                self.truncated = true;
                return;
            }
            self.line.push(SEPARATOR);
            available -= 1;
        }
        self.fields += 1;

        if field.len() <= available {
            self.line.push_str(field);
        } else {
            let mut cut = available;
            while !field.is_char_boundary(cut) {
                cut -= 1;
            }
            self.line.push_str(&field[..cut]);
            self.truncated = true;
        }
    }

    /// Append an integer field
    pub fn push_u64(&mut self, value: u64) {
        self.push_formatted(format_args!("{}", value));
    }

    /// Append a fixed-precision field
    pub fn push_f64(&mut self, value: f64, precision: usize) {
        self.push_formatted(format_args!("{:.*}", precision, value));
    }

    /// Append an empty placeholder field
    pub fn push_empty(&mut self) {
        self.push_str("");
    }

    /// Append the timestamp and IMU fields of one sample
    pub fn push_sample(&mut self, timestamp_ms: u64, sample: &SensorSample) {
        let imu = self.format.imu_precision;
        self.push_u64(timestamp_ms);
        for axis in [sample.accel.x, sample.accel.y, sample.accel.z] {
            self.push_f64(axis as f64, imu);
        }
        for axis in [sample.gyro.x, sample.gyro.y, sample.gyro.z] {
            self.push_f64(axis as f64, imu);
        }
        self.push_f64(sample.temperature_c as f64, self.format.temperature_precision);
    }

    /// Append one PID field, empty when unresolved
    pub fn push_pid(&mut self, value: Option<f64>) {
        match value {
            Some(value) => self.push_f64(value, self.format.pid_precision),
            None => self.push_empty(),
        }
    }

    /// Terminate the line
    pub fn finish(&mut self) {
        self.line.push_str(self.format.line_ending.as_str());
    }

    /// Line contents
    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.line.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    /// Number of fields started on this line
    pub fn fields(&self) -> usize {
        self.fields
    }

    /// Whether any field was cut short
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn push_formatted(&mut self, args: std::fmt::Arguments<'_>) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        // Writing into a String cannot fail
        let _ = scratch.write_fmt(args);
        self.push_str(&scratch);
        self.scratch = scratch;
    }
}

/// Header line naming every column of a record built from `table`
pub fn header(table: &[PidDescriptor], format: &CsvFormat) -> CsvRecord {
    let mut record = CsvRecord::new(format.clone());
    for column in [
        "timestamp_ms",
        "accel_x_g",
        "accel_y_g",
        "accel_z_g",
        "gyro_x_dps",
        "gyro_y_dps",
        "gyro_z_dps",
        "temperature_c",
    ] {
        record.push_str(column);
    }
    for descriptor in table {
        record.push_str(&format!("{} [{}]", descriptor.name, descriptor.unit));
    }
    record.finish();
    record
}
