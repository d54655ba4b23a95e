//! Vehicle Bus Abstraction
//!
//! Both transports exchange the same 8-byte request/response layout, one
//! slot per configured PID, so correlation and decoding are shared.

use crate::error::ObdError;
use crate::pid::{lookup, PidDescriptor};
use crate::protocol::{FRAME_LEN, PID_INDEX, RESPONSE_OFFSET, SERVICE_INDEX};

/// Request and response buffers for one configured PID
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestResponseSlot {
    pub request: [u8; FRAME_LEN],
    pub response: [u8; FRAME_LEN],
}

impl RequestResponseSlot {
    /// Zero the response buffer
    pub fn clear_response(&mut self) {
        self.response = [0; FRAME_LEN];
    }

    /// Check that the response answers the request
    ///
    /// The response service must be the request service plus 0x40, its PID
    /// byte must match the request, and the PID must be in `table`.
    pub fn correlate<'a>(
        &self,
        slot: usize,
        table: &'a [PidDescriptor],
    ) -> Result<&'a PidDescriptor, ObdError> {
        let service = self.response[SERVICE_INDEX];
        let pid = self.response[PID_INDEX];
        let unknown = ObdError::UnknownResponse { slot, service, pid };

        if service.wrapping_sub(self.request[SERVICE_INDEX]) != RESPONSE_OFFSET {
            return Err(unknown);
        }
        if pid != self.request[PID_INDEX] {
            return Err(unknown);
        }
        lookup(table, pid).ok_or(unknown)
    }
}

/// Allocate one empty slot per table entry
pub(crate) fn allocate_slots(table: &[PidDescriptor]) -> Vec<RequestResponseSlot> {
    vec![RequestResponseSlot::default(); table.len()]
}

/// Common interface of the CAN and text vehicle bus drivers
pub trait VehicleBus {
    /// Bring the transport up and allocate slots
    fn init(&mut self) -> Result<(), ObdError>;

    /// Shut the transport down
    fn deinit(&mut self) -> Result<(), ObdError>;

    /// Configured PID table, in acquisition order
    fn pid_table(&self) -> &[PidDescriptor];

    /// Transmit the request for `pid` from `slot`
    fn send(&mut self, slot: usize, pid: u8) -> Result<(), ObdError>;

    /// Wait for the response to `slot`
    fn receive(&mut self, slot: usize) -> Result<(), ObdError>;

    /// Buffers of one slot
    fn slot(&self, slot: usize) -> Option<&RequestResponseSlot>;

    /// Request buffer of `slot`
    fn request(&self, slot: usize) -> Option<&[u8; FRAME_LEN]> {
        self.slot(slot).map(|s| &s.request)
    }

    /// Response buffer of `slot`
    fn response(&self, slot: usize) -> Option<&[u8; FRAME_LEN]> {
        self.slot(slot).map(|s| &s.response)
    }

    /// Descriptor answered by the response in `slot`
    fn correlate(&self, slot: usize) -> Result<&PidDescriptor, ObdError> {
        let buffers = self.slot(slot).ok_or(ObdError::InvalidSlot(slot))?;
        buffers.correlate(slot, self.pid_table())
    }

    /// Correlate and decode the response in `slot`
    ///
    /// `Ok(None)` means the response was correlated but too short to decode.
    fn decode(&self, slot: usize) -> Result<Option<f64>, ObdError> {
        let descriptor = self.correlate(slot)?;
        let buffers = self.slot(slot).ok_or(ObdError::InvalidSlot(slot))?;
        Ok(descriptor.decode(&buffers.response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::{build_table, Pid};
    use crate::protocol::{build_request, PAD_BYTE};

    fn slot(response: [u8; FRAME_LEN]) -> RequestResponseSlot {
        RequestResponseSlot {
            request: build_request(0x0C, PAD_BYTE),
            response,
        }
    }

    #[test]
    fn test_correlation_accepts_matching_response() {
        let table = build_table(&Pid::DEFAULT_TABLE);
        let slot = slot([4, 0x41, 0x0C, 0x1A, 0xF8, 0, 0, 0]);
        let descriptor = slot.correlate(0, &table).unwrap();
        assert_eq!(descriptor.kind, Pid::EngineSpeed);
        assert_eq!(descriptor.decode(&slot.response), Some(1726.0));
    }

    #[test]
    fn test_correlation_rejects_wrong_service_or_pid() {
        let table = build_table(&Pid::DEFAULT_TABLE);

        let negative = slot([3, 0x7F, 0x01, 0x12, 0, 0, 0, 0]);
        assert!(matches!(
            negative.correlate(2, &table),
            Err(ObdError::UnknownResponse { slot: 2, service: 0x7F, .. })
        ));

        let other_pid = slot([3, 0x41, 0x0D, 0x20, 0, 0, 0, 0]);
        assert!(other_pid.correlate(0, &table).is_err());

        let cleared = slot([0; FRAME_LEN]);
        assert!(cleared.correlate(0, &table).is_err());
    }

    #[test]
    fn test_correlation_requires_table_entry() {
        let table = build_table(&[Pid::VehicleSpeed]);
        let slot = slot([4, 0x41, 0x0C, 0x1A, 0xF8, 0, 0, 0]);
        assert!(slot.correlate(0, &table).is_err());
    }
}
