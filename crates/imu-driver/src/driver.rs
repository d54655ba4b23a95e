//! IMU Driver
//!
//! Register-level access to the ASM330LHH. Every transaction is a single
//! command byte followed by payload; reads are full-duplex and the byte
//! clocked in during the command is discarded.

use crate::error::ImuError;
use crate::ready::ImuInterrupts;
use crate::registers::{init, status, RegisterAddress};
use crate::scale::{temperature_c, AccelRange, GyroRange, OutputDataRate};
use crate::{BUFFER_SIZE, SENSOR_ID};
use embedded_hal::spi::SpiDevice;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use timing::{poll_interval, Clock, Deadline};
use tracing::{debug, info, warn};

/// How the driver learns that fresh data is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Poll STATUS_REG before each burst read
    Polling,
    /// Consume data-ready flags set by the interrupt lines
    Interrupt,
}

impl Default for AcquisitionMode {
    fn default() -> Self {
        AcquisitionMode::Polling
    }
}

/// Measurement channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Accelerometer,
    Gyroscope,
    Temperature,
}

impl Channel {
    /// All channels in acquisition order
    pub const ALL: [Channel; 3] = [
        Channel::Accelerometer,
        Channel::Gyroscope,
        Channel::Temperature,
    ];

    /// STATUS_REG bit signalling new data on this channel
    pub fn status_bit(&self) -> u8 {
        match self {
            Channel::Accelerometer => status::XLDA,
            Channel::Gyroscope => status::GDA,
            Channel::Temperature => status::TDA,
        }
    }

    /// First output register and byte count of the burst read
    fn output(&self) -> (RegisterAddress, usize) {
        match self {
            Channel::Accelerometer => (RegisterAddress::OutxLA, 6),
            Channel::Gyroscope => (RegisterAddress::OutxLG, 6),
            Channel::Temperature => (RegisterAddress::OutTempL, 2),
        }
    }
}

/// Three-axis measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Latest converted readings
///
/// Values stay at zero until the first successful read of each channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Acceleration (g)
    pub accel: Vec3,
    /// Angular rate (dps)
    pub gyro: Vec3,
    /// Die temperature (degrees Celsius)
    pub temperature_c: f32,
}

/// IMU driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Readiness mode
    pub mode: AcquisitionMode,
    /// Accelerometer full scale
    pub accel_range: AccelRange,
    /// Gyroscope full scale
    pub gyro_range: GyroRange,
    /// Output data rate for both sensors
    pub odr: OutputDataRate,
    /// Per-transaction timeout in milliseconds
    pub timeout_ms: u64,
    /// WHO_AM_I attempts before giving up
    pub identify_attempts: u8,
    /// Delay between WHO_AM_I attempts in milliseconds
    pub identify_delay_ms: u64,
    /// Settle time after configuration in milliseconds
    pub settle_ms: u64,
    /// Delay between STATUS_REG polls in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Polling,
            accel_range: AccelRange::G8,
            gyro_range: GyroRange::Dps1000,
            odr: OutputDataRate::Hz416,
            timeout_ms: 1000,
            identify_attempts: 10,
            identify_delay_ms: 10,
            settle_ms: 10,
            poll_interval_ms: 1,
        }
    }
}

/// Operations the acquisition cycle needs from an IMU
pub trait InertialSensor {
    /// Bring the device up
    fn init(&mut self) -> Result<(), ImuError>;

    /// Power the device down
    fn deinit(&mut self) -> Result<(), ImuError>;

    /// Acquire one channel; `Ok(None)` when not ready
    fn read_axes(&mut self, channel: Channel) -> Result<Option<SensorSample>, ImuError>;

    /// Most recent converted sample
    fn sample(&self) -> SensorSample;

    /// Readiness mode
    fn mode(&self) -> AcquisitionMode;
}

/// ASM330LHH driver over an `embedded-hal` SPI device
pub struct ImuDriver<S, C> {
    spi: S,
    clock: C,
    config: ImuConfig,
    interrupts: ImuInterrupts,
    tx: [u8; BUFFER_SIZE],
    rx: [u8; BUFFER_SIZE],
    sample: SensorSample,
    initialized: bool,
}

impl<S: SpiDevice, C: Clock> ImuDriver<S, C> {
    /// Create a driver; the device is not touched until [`ImuDriver::init`]
    pub fn new(spi: S, clock: C, config: ImuConfig) -> Self {
        info!(
            "Creating IMU driver: mode={:?}, accel={:?}, gyro={:?}, odr={:?}",
            config.mode, config.accel_range, config.gyro_range, config.odr
        );

        Self {
            spi,
            clock,
            config,
            interrupts: ImuInterrupts::new(),
            tx: [0; BUFFER_SIZE],
            rx: [0; BUFFER_SIZE],
            sample: SensorSample::default(),
            initialized: false,
        }
    }

    /// Handle for interrupt sources to signal data-ready
    pub fn interrupts(&self) -> ImuInterrupts {
        self.interrupts.clone()
    }

    /// Most recent converted sample
    pub fn sample(&self) -> SensorSample {
        self.sample
    }

    /// Driver configuration
    pub fn config(&self) -> &ImuConfig {
        &self.config
    }

    /// Whether [`ImuDriver::init`] completed
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Reset, identify and configure the device, then prime every channel
    pub fn init(&mut self) -> Result<(), ImuError> {
        info!("Initializing IMU");
        self.initialized = false;

        self.write_register(RegisterAddress::Ctrl3C, &[init::CTRL3_C_RESET])?;
        self.identify()?;

        let (int1, int2) = match self.config.mode {
            AcquisitionMode::Interrupt => (init::INT1_DRDY_XL, init::INT2_DRDY_G),
            AcquisitionMode::Polling => (0, 0),
        };
        let ctrl1_xl = self.config.odr.ctrl_bits() | self.config.accel_range.ctrl_bits();
        let ctrl2_g = self.config.odr.ctrl_bits() | self.config.gyro_range.ctrl_bits();

        let sequence = [
            (RegisterAddress::Ctrl9Xl, init::CTRL9_XL_CONFIG),
            (RegisterAddress::Int1Ctrl, int1),
            (RegisterAddress::Int2Ctrl, int2),
            (RegisterAddress::Ctrl1Xl, ctrl1_xl),
            (RegisterAddress::Ctrl2G, ctrl2_g),
            (RegisterAddress::Ctrl3C, init::CTRL3_C_BDU),
            (RegisterAddress::Ctrl4C, init::CTRL4_C),
            (RegisterAddress::IntCfg0, init::INT_CFG0),
            (RegisterAddress::IntCfg1, init::INT_CFG1),
            (RegisterAddress::Ctrl9Xl, init::CTRL9_XL_DEFAULT),
        ];
        for (register, value) in sequence {
            self.write_register(register, &[value])?;
        }

        self.clock
            .sleep(Duration::from_millis(self.config.settle_ms));
        self.initialized = true;

        for channel in Channel::ALL {
            let primed = self
                .wait_data_ready(channel)
                .and_then(|_| self.burst_read(channel));
            if let Err(e) = primed {
                warn!("Priming {:?} failed: {}", channel, e);
            }
        }

        info!("IMU initialized");
        Ok(())
    }

    /// Power down both sensors
    pub fn deinit(&mut self) -> Result<(), ImuError> {
        info!("Powering down IMU");
        self.initialized = false;
        let off = OutputDataRate::PowerDown.ctrl_bits();
        self.write_register(
            RegisterAddress::Ctrl1Xl,
            &[off | self.config.accel_range.ctrl_bits()],
        )?;
        self.write_register(
            RegisterAddress::Ctrl2G,
            &[off | self.config.gyro_range.ctrl_bits()],
        )
    }

    /// Read `count` consecutive registers starting at `register`
    pub fn read_register(
        &mut self,
        register: RegisterAddress,
        count: usize,
    ) -> Result<&[u8], ImuError> {
        if count == 0 || count >= BUFFER_SIZE {
            return Err(ImuError::InvalidLength {
                address: register.addr(),
                count,
            });
        }

        let len = count + 1;
        self.tx[..len].fill(0);
        self.tx[0] = register.read_command();
        self.rx.fill(0);

        self.spi
            .transfer(&mut self.rx[..len], &self.tx[..len])
            .map_err(|e| ImuError::ReadTransfer(format!("{:?}", e)))?;

        Ok(&self.rx[1..len])
    }

    /// Write `data` to consecutive registers starting at `register`
    pub fn write_register(&mut self, register: RegisterAddress, data: &[u8]) -> Result<(), ImuError> {
        if data.is_empty() || data.len() >= BUFFER_SIZE {
            return Err(ImuError::InvalidLength {
                address: register.addr(),
                count: data.len(),
            });
        }

        let len = data.len() + 1;
        self.tx[0] = register.write_command();
        self.tx[1..len].copy_from_slice(data);

        self.spi
            .write(&self.tx[..len])
            .map_err(|e| ImuError::WriteTransfer(format!("{:?}", e)))
    }

    /// Acquire one channel
    ///
    /// Returns `Ok(None)` in interrupt mode when the channel's flag is not
    /// set; the bus is not touched in that case.
    pub fn read_axes(&mut self, channel: Channel) -> Result<Option<SensorSample>, ImuError> {
        match self.config.mode {
            AcquisitionMode::Polling => self.wait_data_ready(channel)?,
            AcquisitionMode::Interrupt => {
                if !self.interrupts.take(channel) {
                    return Ok(None);
                }
            }
        }

        self.burst_read(channel)?;
        Ok(Some(self.sample))
    }

    fn identify(&mut self) -> Result<(), ImuError> {
        let attempts = self.config.identify_attempts;
        let delay = Duration::from_millis(self.config.identify_delay_ms);
        let mut last_id = None;

        for attempt in 1..=attempts {
            match self.read_register(RegisterAddress::WhoAmI, 1) {
                Ok(id) if id[0] == SENSOR_ID => {
                    debug!("IMU identified after {} attempt(s)", attempt);
                    return Ok(());
                }
                Ok(id) => {
                    debug!("WHO_AM_I returned {:#04X}", id[0]);
                    last_id = Some(id[0]);
                }
                Err(e) => debug!("WHO_AM_I read failed: {}", e),
            }
            self.clock.sleep(delay);
        }

        Err(ImuError::Identification { attempts, last_id })
    }

    fn wait_data_ready(&mut self, channel: Channel) -> Result<(), ImuError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let interval = poll_interval(self.config.poll_interval_ms);
        let deadline = Deadline::after(&self.clock, timeout);

        loop {
            let status = self.read_register(RegisterAddress::StatusReg, 1)?[0];
            if status & channel.status_bit() != 0 {
                return Ok(());
            }
            if deadline.expired(&self.clock) {
                return Err(ImuError::Timeout(self.config.timeout_ms));
            }
            self.clock.sleep(interval);
        }
    }

    fn burst_read(&mut self, channel: Channel) -> Result<(), ImuError> {
        let (register, count) = channel.output();
        let accel_range = self.config.accel_range;
        let gyro_range = self.config.gyro_range;
        let mut raw = [0u8; 6];
        raw[..count].copy_from_slice(self.read_register(register, count)?);
        let word = |i: usize| i16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]);

        match channel {
            Channel::Accelerometer => {
                self.sample.accel = Vec3 {
                    x: accel_range.to_g(word(0)),
                    y: accel_range.to_g(word(1)),
                    z: accel_range.to_g(word(2)),
                };
            }
            Channel::Gyroscope => {
                self.sample.gyro = Vec3 {
                    x: gyro_range.to_dps(word(0)),
                    y: gyro_range.to_dps(word(1)),
                    z: gyro_range.to_dps(word(2)),
                };
            }
            Channel::Temperature => {
                self.sample.temperature_c = temperature_c(word(0));
            }
        }
        Ok(())
    }
}

impl<S: SpiDevice, C: Clock> InertialSensor for ImuDriver<S, C> {
    fn init(&mut self) -> Result<(), ImuError> {
        ImuDriver::init(self)
    }

    fn deinit(&mut self) -> Result<(), ImuError> {
        ImuDriver::deinit(self)
    }

    fn read_axes(&mut self, channel: Channel) -> Result<Option<SensorSample>, ImuError> {
        ImuDriver::read_axes(self, channel)
    }

    fn sample(&self) -> SensorSample {
        self.sample
    }

    fn mode(&self) -> AcquisitionMode {
        self.config.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImuFlags;
    use crate::sim::SimulatedImu;
    use timing::SimClock;

    fn driver(mode: AcquisitionMode) -> (ImuDriver<SimulatedImu, SimClock>, crate::SimulatedImuHandle, SimClock) {
        let imu = SimulatedImu::new();
        let handle = imu.handle();
        let clock = SimClock::new();
        let config = ImuConfig {
            mode,
            ..Default::default()
        };
        (ImuDriver::new(imu, clock.clone(), config), handle, clock)
    }

    #[test]
    fn test_init_writes_configuration() {
        let (mut imu, handle, _) = driver(AcquisitionMode::Interrupt);
        imu.init().unwrap();

        assert!(imu.is_initialized());
        assert_eq!(handle.register(RegisterAddress::Ctrl1Xl), 0x6C);
        assert_eq!(handle.register(RegisterAddress::Ctrl2G), 0x68);
        assert_eq!(handle.register(RegisterAddress::Int1Ctrl), 0x01);
        assert_eq!(handle.register(RegisterAddress::Int2Ctrl), 0x02);
        assert_eq!(handle.register(RegisterAddress::Ctrl3C), 0x44);
        assert_eq!(handle.register(RegisterAddress::Ctrl9Xl), 0xE0);

        let writes = handle.writes();
        assert_eq!(writes.first(), Some(&(RegisterAddress::Ctrl3C.addr(), 0x05)));
    }

    #[test]
    fn test_identification_exhausts_attempts() {
        let (mut imu, handle, clock) = driver(AcquisitionMode::Polling);
        handle.set_who_am_i(0x6A);

        let err = imu.init().unwrap_err();
        match err {
            ImuError::Identification { attempts, last_id } => {
                assert_eq!(attempts, 10);
                assert_eq!(last_id, Some(0x6A));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.flags(), ImuFlags::ID);
        assert_eq!(clock.now_ms(), 100);
        assert!(!imu.is_initialized());
    }

    #[test]
    fn test_polling_read_scales_axes() {
        let (mut imu, handle, _) = driver(AcquisitionMode::Polling);
        imu.init().unwrap();

        handle.set_accel_raw([4096, -4096, 0]);
        handle.set_gyro_raw([1000, 0, -1000]);
        handle.set_temperature_raw(512);

        imu.read_axes(Channel::Accelerometer).unwrap();
        imu.read_axes(Channel::Gyroscope).unwrap();
        let sample = imu.read_axes(Channel::Temperature).unwrap().unwrap();

        assert!((sample.accel.x - 0.999_424).abs() < 1e-5);
        assert!((sample.accel.y + 0.999_424).abs() < 1e-5);
        assert_eq!(sample.accel.z, 0.0);
        assert!((sample.gyro.x - 35.0).abs() < 1e-4);
        assert!((sample.gyro.z + 35.0).abs() < 1e-4);
        assert_eq!(sample.temperature_c, 27.0);
    }

    #[test]
    fn test_polling_times_out() {
        let (mut imu, handle, clock) = driver(AcquisitionMode::Polling);
        imu.init().unwrap();
        handle.set_status(0);

        let start = clock.now_ms();
        let err = imu.read_axes(Channel::Gyroscope).unwrap_err();
        assert!(matches!(err, ImuError::Timeout(1000)));
        assert!(err.flags().contains(ImuFlags::TIMEOUT));
        assert!(clock.now_ms() - start >= 1000);
    }

    #[test]
    fn test_zero_poll_interval_still_times_out() {
        let imu = SimulatedImu::new();
        let handle = imu.handle();
        let clock = SimClock::new();
        let config = ImuConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let mut imu = ImuDriver::new(imu, clock.clone(), config);
        imu.init().unwrap();
        handle.set_status(0);

        assert!(matches!(
            imu.read_axes(Channel::Accelerometer),
            Err(ImuError::Timeout(1000))
        ));
        assert!(clock.now_ms() >= 1000);
    }

    #[test]
    fn test_interrupt_mode_skips_bus_when_not_ready() {
        let (mut imu, handle, _) = driver(AcquisitionMode::Interrupt);
        imu.init().unwrap();
        let interrupts = imu.interrupts();

        let before = handle.transactions();
        assert_eq!(imu.read_axes(Channel::Accelerometer).unwrap(), None);
        assert_eq!(handle.transactions(), before);

        handle.set_accel_raw([0, 0, 4096]);
        interrupts.on_int1();
        let sample = imu.read_axes(Channel::Accelerometer).unwrap().unwrap();
        assert!((sample.accel.z - 0.999_424).abs() < 1e-5);
        assert_eq!(imu.read_axes(Channel::Accelerometer).unwrap(), None);
    }

    #[test]
    fn test_length_violations() {
        let (mut imu, handle, _) = driver(AcquisitionMode::Polling);

        let err = imu.read_register(RegisterAddress::OutxLA, 8).unwrap_err();
        assert_eq!(err.flags(), ImuFlags::CMD | ImuFlags::DATA);
        assert!(imu.read_register(RegisterAddress::OutxLA, 0).is_err());
        assert!(imu.write_register(RegisterAddress::Ctrl1Xl, &[]).is_err());
        assert!(imu.write_register(RegisterAddress::Ctrl1Xl, &[0; 8]).is_err());
        assert_eq!(handle.transactions(), 0);

        assert_eq!(imu.read_register(RegisterAddress::OutxLA, 7).unwrap().len(), 7);
    }

    #[test]
    fn test_bus_fault_maps_to_spi_flags() {
        let (mut imu, handle, _) = driver(AcquisitionMode::Polling);
        imu.init().unwrap();
        handle.set_fault(true);

        let err = imu.read_axes(Channel::Temperature).unwrap_err();
        assert!(err.is_bus_fault());
        assert!(err.flags().contains(ImuFlags::SPI_RX));

        let err = imu.deinit().unwrap_err();
        assert_eq!(err.flags(), ImuFlags::SPI | ImuFlags::SPI_TX);
    }

    #[test]
    fn test_deinit_powers_down() {
        let (mut imu, handle, _) = driver(AcquisitionMode::Polling);
        imu.init().unwrap();
        imu.deinit().unwrap();

        assert!(!imu.is_initialized());
        assert_eq!(handle.register(RegisterAddress::Ctrl1Xl) & 0xF0, 0);
        assert_eq!(handle.register(RegisterAddress::Ctrl2G) & 0xF0, 0);
    }
}
