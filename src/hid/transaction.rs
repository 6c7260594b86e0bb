//! Control Channel Request Tracking
//!
//! The HID control channel carries at most one outstanding request at a time.
//! [`ControlTracker`] owns that single slot: it hands out a sequence number per
//! request so that a late timeout for an already finished request can be told
//! apart from the timeout of the request currently in flight.

use super::HidStatus;

/// Kind of request occupying the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    /// GET_REPORT
    GetReport,
    /// SET_REPORT
    SetReport,
    /// GET_PROTOCOL
    GetProtocol,
    /// SET_PROTOCOL
    SetProtocol,
    /// GET_IDLE
    GetIdle,
    /// SET_IDLE
    SetIdle,
}

impl RequestKind {
    /// Returns `true` for requests answered with DATA rather than HANDSHAKE
    #[must_use]
    pub fn expects_data(self) -> bool {
        matches!(self, Self::GetReport | Self::GetProtocol | Self::GetIdle)
    }
}

/// A request waiting for the peer's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingRequest {
    /// What was asked
    pub kind: RequestKind,
    /// Sequence number matching the request's timer
    pub sequence: u16,
}

/// Single-slot tracker for host-side control requests
#[derive(Debug, Default)]
pub struct ControlTracker {
    pending: Option<PendingRequest>,
    next_sequence: u16,
}

impl ControlTracker {
    /// Create an empty tracker
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: None,
            next_sequence: 0,
        }
    }

    /// Claim the slot for a new request
    ///
    /// # Errors
    /// Returns `HidStatus::Busy` if a request is already pending; the pending
    /// request is left untouched
    pub fn begin(&mut self, kind: RequestKind) -> Result<PendingRequest, HidStatus> {
        if self.pending.is_some() {
            return Err(HidStatus::Busy);
        }

        let request = PendingRequest {
            kind,
            sequence: self.next_sequence,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.pending = Some(request);
        Ok(request)
    }

    /// The request currently in flight, if any
    #[must_use]
    pub fn pending(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// Release the slot because the peer answered
    pub fn complete(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    /// Release the slot because the request with `sequence` timed out
    ///
    /// Returns `None` if that request already finished, so a duplicate or stale
    /// timeout never clears a newer request.
    pub fn expire(&mut self, sequence: u16) -> Option<PendingRequest> {
        match self.pending {
            Some(request) if request.sequence == sequence => self.pending.take(),
            _ => None,
        }
    }
}
