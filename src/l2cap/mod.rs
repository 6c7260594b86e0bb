//! L2CAP (Logical Link Control and Adaptation Protocol) boundary types
//!
//! The L2CAP signalling itself is owned by the transport. The HID profile only
//! names channels, PSMs and the result codes carried in connect and disconnect
//! confirmations, all of which live here.

/// L2CAP Channel Identifier (CID)
///
/// HID channels always use dynamically allocated CIDs (0x0040 and up); 0x0000
/// never names a channel.
pub type ChannelId = u16;

/// L2CAP Protocol Service Multiplexer (PSM)
pub type ProtocolServiceMultiplexer = u16;

/// Identifier of a signalling request, echoed back in the response
pub type SignalingId = u8;

/// L2CAP reserved channel identifiers
pub mod cid {
    use super::ChannelId;

    /// Reserved - shall not be used
    pub const NULL: ChannelId = 0x0000;
}

/// Well-known Protocol Service Multiplexers
pub mod psm {
    use super::ProtocolServiceMultiplexer;

    /// HID Control channel
    pub const HID_CONTROL: ProtocolServiceMultiplexer = 0x0011;
    /// HID Interrupt channel
    pub const HID_INTERRUPT: ProtocolServiceMultiplexer = 0x0013;
}

/// Connection Request/Response Result Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ConnectionResult {
    /// Connection successful
    Success = 0x0000,
    /// Connection pending
    Pending = 0x0001,
    /// Connection refused - PSM not supported
    PsmNotSupported = 0x0002,
    /// Connection refused - security block
    SecurityBlock = 0x0003,
    /// Connection refused - no resources available
    NoResources = 0x0004,
    /// Connection refused - invalid source CID
    InvalidSourceCid = 0x0006,
    /// Connection refused - source CID already allocated
    SourceCidAlreadyAllocated = 0x0007,
    /// The transport gave up waiting for the peer
    Timeout = 0xEEEE,
    /// Local failure before the request reached the peer
    Failed = 0xFFFF,
}

impl ConnectionResult {
    /// Convert from raw u16 value
    ///
    /// Transport glue uses this to turn the result field of an L2CAP connection
    /// response into a confirmation for the profile. Codes it does not know are
    /// reported as `Failed`.
    ///
    /// ```rust
    /// use hidbird::{BluetoothAddress, HidMessage, l2cap::{ConnectionResult, psm}};
    ///
    /// let raw_result = 0x0003;
    /// let message = HidMessage::L2capConnectCfm {
    ///     addr: BluetoothAddress::new([1, 2, 3, 4, 5, 6]),
    ///     psm: psm::HID_CONTROL,
    ///     cid: 0x0040,
    ///     result: ConnectionResult::from_u16(raw_result).unwrap_or(ConnectionResult::Failed),
    ///     stream: None,
    /// };
    /// assert!(matches!(
    ///     message,
    ///     HidMessage::L2capConnectCfm { result: ConnectionResult::SecurityBlock, .. }
    /// ));
    /// ```
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Success),
            0x0001 => Some(Self::Pending),
            0x0002 => Some(Self::PsmNotSupported),
            0x0003 => Some(Self::SecurityBlock),
            0x0004 => Some(Self::NoResources),
            0x0006 => Some(Self::InvalidSourceCid),
            0x0007 => Some(Self::SourceCidAlreadyAllocated),
            0xEEEE => Some(Self::Timeout),
            0xFFFF => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns `true` if the peer (or its stack) refused the channel
    #[must_use]
    pub fn is_refusal(self) -> bool {
        matches!(
            self,
            Self::PsmNotSupported
                | Self::SecurityBlock
                | Self::NoResources
                | Self::InvalidSourceCid
                | Self::SourceCidAlreadyAllocated
        )
    }
}

/// Why an L2CAP channel went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// The peer closed the channel with a disconnect request
    Normal,
    /// The underlying ACL link was lost
    LinkLoss,
    /// The local stack tore the channel down on its own
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_result_from_u16() {
        assert_eq!(ConnectionResult::from_u16(0x0000), Some(ConnectionResult::Success));
        assert_eq!(
            ConnectionResult::from_u16(0x0002),
            Some(ConnectionResult::PsmNotSupported)
        );
        assert_eq!(ConnectionResult::from_u16(0x0005), None);
        assert_eq!(ConnectionResult::from_u16(0xFFFF), Some(ConnectionResult::Failed));
    }

    #[test]
    fn test_refusal_classification() {
        assert!(ConnectionResult::SecurityBlock.is_refusal());
        assert!(ConnectionResult::NoResources.is_refusal());
        assert!(!ConnectionResult::Success.is_refusal());
        assert!(!ConnectionResult::Pending.is_refusal());
        assert!(!ConnectionResult::Timeout.is_refusal());
        assert!(!ConnectionResult::Failed.is_refusal());
    }
}
