//! OBD-II Protocol Definitions

use serde::{Deserialize, Serialize};

/// Functional broadcast identifier for requests
pub const REQUEST_ID: u16 = 0x7DF;

/// First ECU response identifier
pub const RESPONSE_ID_MIN: u16 = 0x7E8;

/// Last ECU response identifier
pub const RESPONSE_ID_MAX: u16 = 0x7EF;

/// Positive responses echo the service code plus this offset
pub const RESPONSE_OFFSET: u8 = 0x40;

/// Default filler for unused request bytes
pub const PAD_BYTE: u8 = 0xCC;

/// Request and response buffer size
pub const FRAME_LEN: usize = 8;

/// Index of the service byte in request/response buffers
pub const SERVICE_INDEX: usize = 1;

/// Index of the PID byte in request/response buffers
pub const PID_INDEX: usize = 2;

/// Text frame start marker (first digit of `4x`)
pub const SOF: u8 = b'4';

/// Text frame end marker
pub const EOF: u8 = b'\r';

/// OBD-II services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Service {
    /// Current data
    CurrentData = 0x01,
    /// Freeze frame data
    FreezeFrame = 0x02,
    /// Stored diagnostic trouble codes
    StoredDtc = 0x03,
    /// Clear trouble codes
    ClearDtc = 0x04,
    /// Oxygen sensor monitoring (non-CAN)
    O2Monitoring = 0x05,
    /// On-board monitoring
    OnBoardMonitoring = 0x06,
    /// Pending trouble codes
    PendingDtc = 0x07,
    /// Control of on-board systems
    Control = 0x08,
    /// Vehicle information
    VehicleInfo = 0x09,
    /// Permanent trouble codes
    PermanentDtc = 0x0A,
}

impl Service {
    /// Service code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Service code echoed in a positive response
    pub fn response_code(&self) -> u8 {
        self.code() + RESPONSE_OFFSET
    }

    /// Whether `code` names a defined service
    pub fn is_valid(code: u8) -> bool {
        (Service::CurrentData.code()..=Service::PermanentDtc.code()).contains(&code)
    }
}

/// Supported OBD-II protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// Get the ELM327 AT command for this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141_2 => "ATSP3",
            ObdProtocol::Iso14230_4Kwp => "ATSP4",
            ObdProtocol::Iso14230_4KwpFast => "ATSP5",
            ObdProtocol::Iso15765_4Can11bit500 => "ATSP6",
            ObdProtocol::Iso15765_4Can29bit500 => "ATSP7",
            ObdProtocol::Iso15765_4Can11bit250 => "ATSP8",
            ObdProtocol::Iso15765_4Can29bit250 => "ATSP9",
        }
    }
}

impl Default for ObdProtocol {
    fn default() -> Self {
        ObdProtocol::Auto
    }
}

/// ELM327 adapter commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtCommand {
    /// Full adapter reset
    Reset,
    /// Disable command echo
    EchoOff,
    /// Disable linefeeds after carriage returns
    LinefeedsOff,
    /// Select the bus protocol
    SetProtocol(ObdProtocol),
}

impl AtCommand {
    /// Command text without terminator
    pub fn as_str(&self) -> &'static str {
        match self {
            AtCommand::Reset => "ATZ",
            AtCommand::EchoOff => "ATE0",
            AtCommand::LinefeedsOff => "ATL0",
            AtCommand::SetProtocol(protocol) => protocol.to_elm_command(),
        }
    }
}

/// Build a service 01 request frame `[0x02, 0x01, pid, pad x5]`
pub fn build_request(pid: u8, pad: u8) -> [u8; FRAME_LEN] {
    let mut frame = [pad; FRAME_LEN];
    frame[0] = 0x02;
    frame[SERVICE_INDEX] = Service::CurrentData.code();
    frame[PID_INDEX] = pid;
    frame
}

/// Service value of an ASCII digit (`byte - '0'`)
pub fn ascii_to_hex(byte: u8) -> u8 {
    byte.wrapping_sub(b'0')
}

/// Text-mode service request for a PID, e.g. `010C`
pub fn text_request(pid: u8) -> String {
    format!("{:02X}{:02X}", Service::CurrentData.code(), pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        assert_eq!(
            build_request(0x0C, PAD_BYTE),
            [0x02, 0x01, 0x0C, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]
        );
        assert_eq!(build_request(0x0D, 0x00)[3..], [0; 5]);
    }

    #[test]
    fn test_service_range() {
        assert!(Service::is_valid(ascii_to_hex(b'1')));
        assert!(Service::is_valid(ascii_to_hex(b':')));
        assert!(!Service::is_valid(ascii_to_hex(b'0')));
        assert!(!Service::is_valid(ascii_to_hex(b' ')));
        assert_eq!(Service::CurrentData.response_code(), 0x41);
    }

    #[test]
    fn test_at_commands() {
        assert_eq!(AtCommand::Reset.as_str(), "ATZ");
        assert_eq!(AtCommand::SetProtocol(ObdProtocol::Auto).as_str(), "ATSP0");
        assert_eq!(
            AtCommand::SetProtocol(ObdProtocol::Iso15765_4Can11bit500).as_str(),
            "ATSP6"
        );
        assert_eq!(text_request(0x0C), "010C");
    }
}
