//! ASM330LHH Register Map

/// MSB set selects a register read
pub const READ_MASK: u8 = 0x80;

/// MSB cleared selects a register write
pub const WRITE_MASK: u8 = 0x7F;

/// Register addresses (7-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterAddress {
    PinCtrl = 0x02,
    FifoCtrl1 = 0x07,
    FifoCtrl2 = 0x08,
    FifoCtrl3 = 0x09,
    FifoCtrl4 = 0x0A,
    CounterBdrReg1 = 0x0B,
    CounterBdrReg2 = 0x0C,
    /// INT1 pin routing
    Int1Ctrl = 0x0D,
    /// INT2 pin routing
    Int2Ctrl = 0x0E,
    /// Device identification (read-only)
    WhoAmI = 0x0F,
    /// Accelerometer ODR and full scale
    Ctrl1Xl = 0x10,
    /// Gyroscope ODR and full scale
    Ctrl2G = 0x11,
    /// Reset, block data update, auto-increment
    Ctrl3C = 0x12,
    Ctrl4C = 0x13,
    Ctrl5C = 0x14,
    Ctrl6C = 0x15,
    Ctrl7G = 0x16,
    Ctrl8Xl = 0x17,
    Ctrl9Xl = 0x18,
    Ctrl10C = 0x19,
    AllIntSrc = 0x1A,
    WakeUpSrc = 0x1B,
    D6dSrc = 0x1D,
    /// Data-available flags
    StatusReg = 0x1E,
    OutTempL = 0x20,
    OutTempH = 0x21,
    OutxLG = 0x22,
    OutxHG = 0x23,
    OutyLG = 0x24,
    OutyHG = 0x25,
    OutzLG = 0x26,
    OutzHG = 0x27,
    OutxLA = 0x28,
    OutxHA = 0x29,
    OutyLA = 0x2A,
    OutyHA = 0x2B,
    OutzLA = 0x2C,
    OutzHA = 0x2D,
    FifoStatus1 = 0x3A,
    FifoStatus2 = 0x3B,
    Timestamp0 = 0x40,
    Timestamp1 = 0x41,
    Timestamp2 = 0x42,
    Timestamp3 = 0x43,
    IntCfg0 = 0x56,
    IntCfg1 = 0x58,
    Ths6d = 0x59,
    WakeUpThs = 0x5B,
    WakeUpDur = 0x5C,
    FreeFall = 0x5D,
    Md1Cfg = 0x5E,
    Md2Cfg = 0x5F,
    InternalFreqFine = 0x63,
    XOfsUsr = 0x73,
    YOfsUsr = 0x74,
    ZOfsUsr = 0x75,
    FifoDataOutTag = 0x78,
    FifoDataOutXL = 0x79,
    FifoDataOutXH = 0x7A,
    FifoDataOutYL = 0x7B,
    FifoDataOutYH = 0x7C,
    FifoDataOutZL = 0x7D,
    FifoDataOutZH = 0x7E,
}

impl RegisterAddress {
    /// Raw 7-bit address
    pub fn addr(self) -> u8 {
        self as u8
    }

    /// Command byte for a read transaction
    pub fn read_command(self) -> u8 {
        self.addr() | READ_MASK
    }

    /// Command byte for a write transaction
    pub fn write_command(self) -> u8 {
        self.addr() & WRITE_MASK
    }
}

/// STATUS_REG data-available bits
pub mod status {
    /// Accelerometer data available
    pub const XLDA: u8 = 0x01;
    /// Gyroscope data available
    pub const GDA: u8 = 0x02;
    /// Temperature data available
    pub const TDA: u8 = 0x04;
}

/// Fixed register values written during initialization
pub(crate) mod init {
    /// CTRL3_C: software reset with register auto-increment
    pub const CTRL3_C_RESET: u8 = 0b0000_0101;
    /// CTRL3_C: block data update and auto-increment
    pub const CTRL3_C_BDU: u8 = 0b0100_0100;
    /// CTRL4_C: I2C disabled, gyro sleep and LPF1 off
    pub const CTRL4_C: u8 = 0b0000_0100;
    /// CTRL9_XL with embedded configuration access enabled
    pub const CTRL9_XL_CONFIG: u8 = 0b1110_0010;
    /// CTRL9_XL default
    pub const CTRL9_XL_DEFAULT: u8 = 0b1110_0000;
    /// INT1_CTRL: accelerometer data-ready
    pub const INT1_DRDY_XL: u8 = 0b0000_0001;
    /// INT2_CTRL: gyroscope data-ready
    pub const INT2_DRDY_G: u8 = 0b0000_0010;
    /// INT_CFG0: latched interrupts cleared on read
    pub const INT_CFG0: u8 = 0b0100_0001;
    /// INT_CFG1: interrupt generation enabled
    pub const INT_CFG1: u8 = 0b1000_0000;
}
