//! Measurement Ranges and Sensitivities

use serde::{Deserialize, Serialize};

/// Temperature sensitivity (LSB per degree Celsius)
pub const TEMP_SENSITIVITY: f32 = 256.0;

/// Temperature reported for a raw value of zero (degrees Celsius)
pub const TEMP_OFFSET_C: f32 = 25.0;

/// Accelerometer full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelRange {
    /// +/- 2 g
    G2,
    /// +/- 4 g
    G4,
    /// +/- 8 g
    G8,
    /// +/- 16 g
    G16,
}

impl AccelRange {
    /// Sensitivity in mg/LSB
    pub fn sensitivity_mg(&self) -> f32 {
        match self {
            AccelRange::G2 => 0.061,
            AccelRange::G4 => 0.122,
            AccelRange::G8 => 0.244,
            AccelRange::G16 => 0.488,
        }
    }

    /// FS_XL field of CTRL1_XL (bits 3:2)
    pub fn ctrl_bits(&self) -> u8 {
        let fs = match self {
            AccelRange::G2 => 0b00,
            AccelRange::G16 => 0b01,
            AccelRange::G4 => 0b10,
            AccelRange::G8 => 0b11,
        };
        fs << 2
    }

    /// Convert a raw sample to g
    pub fn to_g(&self, raw: i16) -> f32 {
        raw as f32 * self.sensitivity_mg() / 1000.0
    }
}

impl Default for AccelRange {
    fn default() -> Self {
        AccelRange::G8
    }
}

/// Gyroscope full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GyroRange {
    Dps125,
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
    Dps4000,
}

impl GyroRange {
    /// Sensitivity in mdps/LSB
    pub fn sensitivity_mdps(&self) -> f32 {
        match self {
            GyroRange::Dps125 => 4.37,
            GyroRange::Dps250 => 8.75,
            GyroRange::Dps500 => 17.5,
            GyroRange::Dps1000 => 35.0,
            GyroRange::Dps2000 => 70.0,
            GyroRange::Dps4000 => 140.0,
        }
    }

    /// FS_G, FS_125 and FS_4000 fields of CTRL2_G (bits 3:0)
    pub fn ctrl_bits(&self) -> u8 {
        match self {
            GyroRange::Dps125 => 0b0010,
            GyroRange::Dps250 => 0b0000,
            GyroRange::Dps500 => 0b0100,
            GyroRange::Dps1000 => 0b1000,
            GyroRange::Dps2000 => 0b1100,
            GyroRange::Dps4000 => 0b0001,
        }
    }

    /// Convert a raw sample to degrees per second
    pub fn to_dps(&self, raw: i16) -> f32 {
        raw as f32 * self.sensitivity_mdps() / 1000.0
    }
}

impl Default for GyroRange {
    fn default() -> Self {
        GyroRange::Dps1000
    }
}

/// Output data rate shared by accelerometer and gyroscope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputDataRate {
    PowerDown,
    Hz12_5,
    Hz26,
    Hz52,
    Hz104,
    Hz208,
    Hz416,
    Hz833,
    Hz1667,
    Hz3333,
    Hz6667,
}

impl OutputDataRate {
    /// ODR field (bits 7:4 of CTRL1_XL / CTRL2_G)
    pub fn ctrl_bits(&self) -> u8 {
        let odr: u8 = match self {
            OutputDataRate::PowerDown => 0x0,
            OutputDataRate::Hz12_5 => 0x1,
            OutputDataRate::Hz26 => 0x2,
            OutputDataRate::Hz52 => 0x3,
            OutputDataRate::Hz104 => 0x4,
            OutputDataRate::Hz208 => 0x5,
            OutputDataRate::Hz416 => 0x6,
            OutputDataRate::Hz833 => 0x7,
            OutputDataRate::Hz1667 => 0x8,
            OutputDataRate::Hz3333 => 0x9,
            OutputDataRate::Hz6667 => 0xA,
        };
        odr << 4
    }
}

impl Default for OutputDataRate {
    fn default() -> Self {
        OutputDataRate::Hz416
    }
}

/// Convert a raw temperature sample to degrees Celsius
pub fn temperature_c(raw: i16) -> f32 {
    raw as f32 / TEMP_SENSITIVITY + TEMP_OFFSET_C
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accel_scaling() {
        // 4096 LSB at 8g -> 4096 * 0.244 mg = 999.424 mg
        let g = AccelRange::G8.to_g(4096);
        assert!((g - 0.999_424).abs() < 1e-5);

        let neg = AccelRange::G2.to_g(-1000);
        assert!((neg + 0.061).abs() < 1e-6);
    }

    #[test]
    fn test_gyro_scaling() {
        // 1000 LSB at 1000dps -> 35 dps
        assert!((GyroRange::Dps1000.to_dps(1000) - 35.0).abs() < 1e-4);
        assert!((GyroRange::Dps2000.to_dps(i16::MIN) + 2293.76).abs() < 1e-2);
    }

    #[test]
    fn test_temperature_offset() {
        assert_eq!(temperature_c(0), 25.0);
        assert_eq!(temperature_c(512), 27.0);
        assert_eq!(temperature_c(-256), 24.0);
    }

    #[test]
    fn test_ctrl_register_composition() {
        let reg = OutputDataRate::Hz416.ctrl_bits() | AccelRange::G8.ctrl_bits();
        assert_eq!(reg, 0x6C);

        let reg = OutputDataRate::Hz1667.ctrl_bits() | GyroRange::Dps2000.ctrl_bits();
        assert_eq!(reg, 0x8C);
    }

    proptest! {
        #[test]
        fn test_accel_stays_within_full_scale(raw in any::<i16>()) {
            let ranges = [
                (AccelRange::G2, 2.0),
                (AccelRange::G4, 4.0),
                (AccelRange::G8, 8.0),
                (AccelRange::G16, 16.0),
            ];
            for (range, full_scale) in ranges {
                let g = range.to_g(raw);
                prop_assert!(g.abs() <= full_scale);
                prop_assert_eq!(g < 0.0, raw < 0);
            }
        }
    }
}
