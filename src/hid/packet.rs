//! HIDP Transaction Encoding
//!
//! Every message on the HID control and interrupt channels starts with a
//! one-byte transaction header: the transaction type in the high nibble and a
//! type-specific parameter in the low nibble, followed by an optional payload.

use crate::constants::{MAX_PACKET_SIZE, MAX_REPORT_SIZE};
use heapless::Vec;

/// Report payload carried by DATA, SET_REPORT and GET_REPORT responses
pub type Report = Vec<u8, MAX_REPORT_SIZE>;

/// Encoded HIDP transaction ready to be written to a channel
pub type Packet = Vec<u8, MAX_PACKET_SIZE>;

/// HIDP parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidpError {
    /// Message is shorter than its header or required payload
    InsufficientData,
    /// Transaction type is reserved or not supported
    UnsupportedTransaction(u8),
    /// Header parameter or payload length is not valid for the transaction
    InvalidParameter,
    /// Payload exceeds buffer capacity
    PayloadTooLarge,
}

impl core::fmt::Display for HidpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "Insufficient data for HIDP transaction"),
            Self::UnsupportedTransaction(t) => write!(f, "Unsupported HIDP transaction 0x{t:X}"),
            Self::InvalidParameter => write!(f, "Invalid HIDP transaction parameter"),
            Self::PayloadTooLarge => write!(f, "HIDP payload exceeds buffer capacity"),
        }
    }
}

/// HIDP transaction types (high nibble of the header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransactionType {
    /// Acknowledgement or error for a request
    Handshake = 0x0,
    /// Control operation (suspend, unplug, ...)
    HidControl = 0x1,
    /// Request a report from the peer
    GetReport = 0x4,
    /// Write a report to the peer
    SetReport = 0x5,
    /// Query boot/report protocol
    GetProtocol = 0x6,
    /// Select boot/report protocol
    SetProtocol = 0x7,
    /// Query idle rate
    GetIdle = 0x8,
    /// Set idle rate
    SetIdle = 0x9,
    /// Report data
    Data = 0xA,
}

impl TransactionType {
    /// Convert from the high nibble of a header byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Handshake),
            0x1 => Some(Self::HidControl),
            0x4 => Some(Self::GetReport),
            0x5 => Some(Self::SetReport),
            0x6 => Some(Self::GetProtocol),
            0x7 => Some(Self::SetProtocol),
            0x8 => Some(Self::GetIdle),
            0x9 => Some(Self::SetIdle),
            0xA => Some(Self::Data),
            _ => None,
        }
    }
}

/// HANDSHAKE result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HandshakeResult {
    /// Request completed
    Successful = 0x0,
    /// Device is busy, try again later
    NotReady = 0x1,
    /// Report id does not exist
    InvalidReportId = 0x2,
    /// Request is not supported
    UnsupportedRequest = 0x3,
    /// Request parameter is out of range
    InvalidParameter = 0x4,
    /// Unknown error
    Unknown = 0xE,
    /// Device needs a reset
    Fatal = 0xF,
}

impl HandshakeResult {
    /// Convert from a header parameter
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Successful),
            0x1 => Some(Self::NotReady),
            0x2 => Some(Self::InvalidReportId),
            0x3 => Some(Self::UnsupportedRequest),
            0x4 => Some(Self::InvalidParameter),
            0xE => Some(Self::Unknown),
            0xF => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// HID report types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ReportType {
    /// Untyped payload (protocol and idle responses)
    Other = 0,
    /// Input report
    Input = 1,
    /// Output report
    Output = 2,
    /// Feature report
    Feature = 3,
}

impl ReportType {
    /// Convert from the low two bits of a header parameter
    #[must_use]
    pub fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            1 => Self::Input,
            2 => Self::Output,
            3 => Self::Feature,
            _ => Self::Other,
        }
    }
}

/// HID protocol modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Protocol {
    /// Boot protocol (fixed report formats)
    Boot = 0,
    /// Report protocol (descriptor defined)
    Report = 1,
}

impl Protocol {
    /// Convert from bit 0 of a header parameter or payload byte
    #[must_use]
    pub fn from_bit(value: u8) -> Self {
        if value & 0x01 == 0 {
            Self::Boot
        } else {
            Self::Report
        }
    }
}

/// HID_CONTROL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlOperation {
    /// No operation
    Nop = 0x0,
    /// Hard reset
    HardReset = 0x1,
    /// Soft reset
    SoftReset = 0x2,
    /// Enter suspend
    Suspend = 0x3,
    /// Leave suspend
    ExitSuspend = 0x4,
    /// Remove the virtual cable (drops the bond)
    VirtualCableUnplug = 0x5,
}

impl ControlOperation {
    /// Convert from a header parameter
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Nop),
            0x1 => Some(Self::HardReset),
            0x2 => Some(Self::SoftReset),
            0x3 => Some(Self::Suspend),
            0x4 => Some(Self::ExitSuspend),
            0x5 => Some(Self::VirtualCableUnplug),
            _ => None,
        }
    }
}

/// A decoded HIDP transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidpMessage {
    /// HANDSHAKE
    Handshake(HandshakeResult),
    /// HID_CONTROL
    Control(ControlOperation),
    /// GET_REPORT
    GetReport {
        /// Requested report type (never `Other`)
        report_type: ReportType,
        /// Report id, when the descriptor uses ids
        report_id: Option<u8>,
        /// Maximum bytes the requester will accept
        buffer_size: Option<u16>,
    },
    /// SET_REPORT
    SetReport {
        /// Report type being written (never `Other`)
        report_type: ReportType,
        /// Report bytes, including the report id if used
        data: Report,
    },
    /// GET_PROTOCOL
    GetProtocol,
    /// SET_PROTOCOL
    SetProtocol(Protocol),
    /// GET_IDLE
    GetIdle,
    /// SET_IDLE
    SetIdle(u8),
    /// DATA
    Data {
        /// Report type of the payload
        report_type: ReportType,
        /// Payload bytes
        data: Report,
    },
}

const GET_REPORT_SIZE_FLAG: u8 = 0x08;

impl HidpMessage {
    /// Transaction type of this message
    #[must_use]
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Handshake(_) => TransactionType::Handshake,
            Self::Control(_) => TransactionType::HidControl,
            Self::GetReport { .. } => TransactionType::GetReport,
            Self::SetReport { .. } => TransactionType::SetReport,
            Self::GetProtocol => TransactionType::GetProtocol,
            Self::SetProtocol(_) => TransactionType::SetProtocol,
            Self::GetIdle => TransactionType::GetIdle,
            Self::SetIdle(_) => TransactionType::SetIdle,
            Self::Data { .. } => TransactionType::Data,
        }
    }

    /// Parse a transaction from the bytes of one L2CAP SDU
    ///
    /// # Errors
    /// Returns `HidpError` if the header is missing or reserved, the parameter is
    /// invalid for the transaction, or the payload does not fit a `Report`
    pub fn parse(bytes: &[u8]) -> Result<Self, HidpError> {
        let (&header, rest) = bytes.split_first().ok_or(HidpError::InsufficientData)?;
        let kind = header >> 4;
        let param = header & 0x0F;

        let transaction =
            TransactionType::from_u8(kind).ok_or(HidpError::UnsupportedTransaction(kind))?;

        match transaction {
            TransactionType::Handshake => HandshakeResult::from_u8(param)
                .map(Self::Handshake)
                .ok_or(HidpError::InvalidParameter),
            TransactionType::HidControl => ControlOperation::from_u8(param)
                .map(Self::Control)
                .ok_or(HidpError::InvalidParameter),
            TransactionType::GetReport => {
                let report_type = Self::request_report_type(param)?;
                let (report_id, buffer_size) =
                    match (param & GET_REPORT_SIZE_FLAG != 0, rest) {
                        (false, []) => (None, None),
                        (false, [id]) => (Some(*id), None),
                        (true, [lo, hi]) => (None, Some(u16::from_le_bytes([*lo, *hi]))),
                        (true, [id, lo, hi]) => {
                            (Some(*id), Some(u16::from_le_bytes([*lo, *hi])))
                        }
                        _ => return Err(HidpError::InvalidParameter),
                    };
                Ok(Self::GetReport {
                    report_type,
                    report_id,
                    buffer_size,
                })
            }
            TransactionType::SetReport => Ok(Self::SetReport {
                report_type: Self::request_report_type(param)?,
                data: Self::report_from(rest)?,
            }),
            TransactionType::GetProtocol => Ok(Self::GetProtocol),
            TransactionType::SetProtocol => Ok(Self::SetProtocol(Protocol::from_bit(param))),
            TransactionType::GetIdle => Ok(Self::GetIdle),
            TransactionType::SetIdle => rest
                .first()
                .map(|&rate| Self::SetIdle(rate))
                .ok_or(HidpError::InsufficientData),
            TransactionType::Data => Ok(Self::Data {
                report_type: ReportType::from_bits(param),
                data: Self::report_from(rest)?,
            }),
        }
    }

    /// Encode the transaction into a packet
    ///
    /// # Errors
    /// Returns `HidpError::InvalidParameter` for a GET/SET_REPORT of type `Other`
    pub fn encode(&self) -> Result<Packet, HidpError> {
        let mut packet = Packet::new();
        let kind = (self.transaction_type() as u8) << 4;

        match self {
            Self::Handshake(result) => Self::put(&mut packet, &[kind | *result as u8])?,
            Self::Control(operation) => Self::put(&mut packet, &[kind | *operation as u8])?,
            Self::GetReport {
                report_type,
                report_id,
                buffer_size,
            } => {
                if *report_type == ReportType::Other {
                    return Err(HidpError::InvalidParameter);
                }
                let size_flag = if buffer_size.is_some() {
                    GET_REPORT_SIZE_FLAG
                } else {
                    0
                };
                Self::put(&mut packet, &[kind | size_flag | *report_type as u8])?;
                if let Some(id) = report_id {
                    Self::put(&mut packet, &[*id])?;
                }
                if let Some(size) = buffer_size {
                    Self::put(&mut packet, &size.to_le_bytes())?;
                }
            }
            Self::SetReport { report_type, data } => {
                if *report_type == ReportType::Other {
                    return Err(HidpError::InvalidParameter);
                }
                Self::put(&mut packet, &[kind | *report_type as u8])?;
                Self::put(&mut packet, data)?;
            }
            Self::GetProtocol | Self::GetIdle => Self::put(&mut packet, &[kind])?,
            Self::SetProtocol(protocol) => Self::put(&mut packet, &[kind | *protocol as u8])?,
            Self::SetIdle(rate) => Self::put(&mut packet, &[kind, *rate])?,
            Self::Data { report_type, data } => {
                Self::put(&mut packet, &[kind | *report_type as u8])?;
                Self::put(&mut packet, data)?;
            }
        }

        Ok(packet)
    }

    fn request_report_type(param: u8) -> Result<ReportType, HidpError> {
        match ReportType::from_bits(param) {
            ReportType::Other => Err(HidpError::InvalidParameter),
            report_type => Ok(report_type),
        }
    }

    fn report_from(bytes: &[u8]) -> Result<Report, HidpError> {
        Report::from_slice(bytes).map_err(|()| HidpError::PayloadTooLarge)
    }

    fn put(packet: &mut Packet, bytes: &[u8]) -> Result<(), HidpError> {
        packet
            .extend_from_slice(bytes)
            .map_err(|()| HidpError::PayloadTooLarge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(bytes: &[u8]) -> Report {
        Report::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_handshake_parsing() {
        assert_eq!(
            HidpMessage::parse(&[0x00]),
            Ok(HidpMessage::Handshake(HandshakeResult::Successful))
        );
        assert_eq!(
            HidpMessage::parse(&[0x03]),
            Ok(HidpMessage::Handshake(HandshakeResult::UnsupportedRequest))
        );
        assert_eq!(
            HidpMessage::parse(&[0x07]),
            Err(HidpError::InvalidParameter)
        );
    }

    #[test]
    fn test_empty_and_reserved() {
        assert_eq!(HidpMessage::parse(&[]), Err(HidpError::InsufficientData));
        assert_eq!(
            HidpMessage::parse(&[0x20]),
            Err(HidpError::UnsupportedTransaction(0x2))
        );
        // DATC is deprecated and treated as unsupported
        assert_eq!(
            HidpMessage::parse(&[0xB1, 0x00]),
            Err(HidpError::UnsupportedTransaction(0xB))
        );
    }

    #[test]
    fn test_get_report_variants() {
        assert_eq!(
            HidpMessage::parse(&[0x41]),
            Ok(HidpMessage::GetReport {
                report_type: ReportType::Input,
                report_id: None,
                buffer_size: None,
            })
        );
        assert_eq!(
            HidpMessage::parse(&[0x43, 0x05]),
            Ok(HidpMessage::GetReport {
                report_type: ReportType::Feature,
                report_id: Some(5),
                buffer_size: None,
            })
        );
        assert_eq!(
            HidpMessage::parse(&[0x49, 0x40, 0x00]),
            Ok(HidpMessage::GetReport {
                report_type: ReportType::Input,
                report_id: None,
                buffer_size: Some(64),
            })
        );
        assert_eq!(
            HidpMessage::parse(&[0x4A, 0x02, 0x10, 0x00]),
            Ok(HidpMessage::GetReport {
                report_type: ReportType::Output,
                report_id: Some(2),
                buffer_size: Some(16),
            })
        );

        // Size flag set but size missing
        assert_eq!(
            HidpMessage::parse(&[0x49, 0x01]),
            Err(HidpError::InvalidParameter)
        );
        // Report type 0 is reserved for GET_REPORT
        assert_eq!(HidpMessage::parse(&[0x40]), Err(HidpError::InvalidParameter));
    }

    #[test]
    fn test_get_report_encoding() {
        let message = HidpMessage::GetReport {
            report_type: ReportType::Feature,
            report_id: Some(7),
            buffer_size: Some(0x0102),
        };
        assert_eq!(message.encode().unwrap().as_slice(), &[0x4B, 0x07, 0x02, 0x01]);

        let message = HidpMessage::GetReport {
            report_type: ReportType::Other,
            report_id: None,
            buffer_size: None,
        };
        assert_eq!(message.encode(), Err(HidpError::InvalidParameter));
    }

    #[test]
    fn test_protocol_and_idle() {
        assert_eq!(HidpMessage::parse(&[0x60]), Ok(HidpMessage::GetProtocol));
        assert_eq!(
            HidpMessage::parse(&[0x70]),
            Ok(HidpMessage::SetProtocol(Protocol::Boot))
        );
        assert_eq!(
            HidpMessage::parse(&[0x71]),
            Ok(HidpMessage::SetProtocol(Protocol::Report))
        );
        assert_eq!(HidpMessage::parse(&[0x80]), Ok(HidpMessage::GetIdle));
        assert_eq!(HidpMessage::parse(&[0x90, 0x7D]), Ok(HidpMessage::SetIdle(0x7D)));
        assert_eq!(HidpMessage::parse(&[0x90]), Err(HidpError::InsufficientData));

        assert_eq!(
            HidpMessage::SetProtocol(Protocol::Report).encode().unwrap().as_slice(),
            &[0x71]
        );
        assert_eq!(HidpMessage::SetIdle(4).encode().unwrap().as_slice(), &[0x90, 0x04]);
        assert_eq!(HidpMessage::GetIdle.encode().unwrap().as_slice(), &[0x80]);
    }

    #[test]
    fn test_control_operations() {
        assert_eq!(
            HidpMessage::parse(&[0x15]),
            Ok(HidpMessage::Control(ControlOperation::VirtualCableUnplug))
        );
        assert_eq!(HidpMessage::parse(&[0x16]), Err(HidpError::InvalidParameter));
        assert_eq!(
            HidpMessage::Control(ControlOperation::Suspend)
                .encode()
                .unwrap()
                .as_slice(),
            &[0x13]
        );
    }

    #[test]
    fn test_data_and_set_report() {
        let keyboard = [0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut wire = [0u8; 10];
        wire[0] = 0xA1;
        wire[1..].copy_from_slice(&keyboard);

        let parsed = HidpMessage::parse(&wire).unwrap();
        assert_eq!(
            parsed,
            HidpMessage::Data {
                report_type: ReportType::Input,
                data: report(&keyboard),
            }
        );
        assert_eq!(parsed.encode().unwrap().as_slice(), &wire);

        let set = HidpMessage::SetReport {
            report_type: ReportType::Output,
            data: report(&[0x01, 0x02]),
        };
        assert_eq!(set.encode().unwrap().as_slice(), &[0x52, 0x01, 0x02]);
        assert_eq!(HidpMessage::parse(&[0x50, 0x01]), Err(HidpError::InvalidParameter));
    }

    #[test]
    fn test_oversized_payload() {
        let mut wire = [0u8; MAX_REPORT_SIZE + 2];
        wire[0] = 0xA1;
        assert_eq!(HidpMessage::parse(&wire), Err(HidpError::PayloadTooLarge));
    }
}
