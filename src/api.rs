//! `HidBird` API Functions
//!
//! Application code talks to the processor task through two static channels:
//! requests go into the inbox, and confirmations and indications come back as
//! [`HidEvent`]s. Every request is answered by exactly one event unless it was
//! rejected here before reaching the profile.
//!
//! The transport glue uses [`deliver`] and [`deliver_data`] to feed its own
//! confirmations and received data into the same inbox.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hidbird::{BluetoothAddress, api, hid::{HidEvent, HidStatus}};
//!
//! # async fn example() -> Result<(), hidbird::HidError> {
//! let keyboard = BluetoothAddress::from_hex("00:1A:7D:DA:71:13")?;
//! api::connect(keyboard).await?;
//!
//! loop {
//!     match api::next_event().await {
//!         HidEvent::ConnectCfm { status: HidStatus::Success, .. } => break,
//!         HidEvent::ConnectCfm { .. } => return Ok(()),
//!         _ => {}
//!     }
//! }
//! api::get_protocol(keyboard).await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    BluetoothAddress, EVENT_CHANNEL, HidError, INBOX_CHANNEL,
    hid::{
        ControlOperation, HandshakeResult, HidEvent, HidMessage, Protocol, Report, ReportType,
    },
    l2cap::ChannelId,
    stream::{Source, StreamError, read_packet},
};

fn report(data: &[u8]) -> Result<Report, HidError> {
    Report::from_slice(data).map_err(|()| HidError::PayloadTooLarge)
}

async fn submit(message: HidMessage) {
    INBOX_CHANNEL.sender().send(message).await;
}

/// Connect to a HID peer
///
/// Answered by `HidEvent::ConnectCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn connect(addr: BluetoothAddress) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::ConnectRequest { addr }).await;
    Ok(())
}

/// Accept or refuse a connection announced by `HidEvent::ConnectInd`
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn connect_response(addr: BluetoothAddress, accept: bool) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::ConnectResponse { addr, accept }).await;
    Ok(())
}

/// Disconnect from a HID peer
///
/// Answered by `HidEvent::DisconnectCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn disconnect(addr: BluetoothAddress) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::DisconnectRequest { addr }).await;
    Ok(())
}

/// Ask the peer for a report
///
/// Answered by `HidEvent::GetReportCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address, or
/// `HidError::InvalidParameter` for a zero `buffer_size`.
pub async fn get_report(
    addr: BluetoothAddress,
    report_type: ReportType,
    report_id: Option<u8>,
    buffer_size: Option<u16>,
) -> Result<(), HidError> {
    let addr = addr.validate()?;
    if buffer_size == Some(0) {
        return Err(HidError::InvalidParameter);
    }
    submit(HidMessage::GetReport {
        addr,
        report_type,
        report_id,
        buffer_size,
    })
    .await;
    Ok(())
}

/// Write a report to the peer over the control channel
///
/// Answered by `HidEvent::SetReportCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address, or
/// `HidError::PayloadTooLarge` if `data` exceeds the report buffer.
pub async fn set_report(
    addr: BluetoothAddress,
    report_type: ReportType,
    data: &[u8],
) -> Result<(), HidError> {
    let addr = addr.validate()?;
    let data = report(data)?;
    submit(HidMessage::SetReport {
        addr,
        report_type,
        data,
    })
    .await;
    Ok(())
}

/// Ask the peer for its protocol mode
///
/// Answered by `HidEvent::GetProtocolCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn get_protocol(addr: BluetoothAddress) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::GetProtocol { addr }).await;
    Ok(())
}

/// Select the peer's protocol mode
///
/// Answered by `HidEvent::SetProtocolCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn set_protocol(addr: BluetoothAddress, protocol: Protocol) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::SetProtocol { addr, protocol }).await;
    Ok(())
}

/// Ask the peer for its idle rate
///
/// Answered by `HidEvent::GetIdleCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn get_idle(addr: BluetoothAddress) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::GetIdle { addr }).await;
    Ok(())
}

/// Set the peer's idle rate in 4 ms units, 0 for infinite
///
/// Answered by `HidEvent::SetIdleCfm`.
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn set_idle(addr: BluetoothAddress, rate: u8) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::SetIdle { addr, rate }).await;
    Ok(())
}

/// Send a `HID_CONTROL` operation; no answer is expected
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn control(addr: BluetoothAddress, operation: ControlOperation) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::Control { addr, operation }).await;
    Ok(())
}

/// Send a report on the interrupt channel; no answer is expected
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address, or
/// `HidError::PayloadTooLarge` if `data` exceeds the report buffer.
pub async fn send_report(
    addr: BluetoothAddress,
    report_type: ReportType,
    data: &[u8],
) -> Result<(), HidError> {
    let addr = addr.validate()?;
    let data = report(data)?;
    submit(HidMessage::SendReport {
        addr,
        report_type,
        data,
    })
    .await;
    Ok(())
}

/// Answer a `HidEvent::GetReportInd`
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address, or
/// `HidError::PayloadTooLarge` if `data` exceeds the report buffer.
pub async fn get_report_response(
    addr: BluetoothAddress,
    result: HandshakeResult,
    report_type: ReportType,
    data: &[u8],
) -> Result<(), HidError> {
    let addr = addr.validate()?;
    let data = report(data)?;
    submit(HidMessage::GetReportResponse {
        addr,
        result,
        report_type,
        data,
    })
    .await;
    Ok(())
}

/// Answer a `HidEvent::GetProtocolInd`
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn get_protocol_response(
    addr: BluetoothAddress,
    result: HandshakeResult,
    protocol: Protocol,
) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::GetProtocolResponse {
        addr,
        result,
        protocol,
    })
    .await;
    Ok(())
}

/// Answer a `HidEvent::GetIdleInd`
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn get_idle_response(
    addr: BluetoothAddress,
    result: HandshakeResult,
    rate: u8,
) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::GetIdleResponse { addr, result, rate }).await;
    Ok(())
}

/// Answer a `SetReportInd`, `SetProtocolInd` or `SetIdleInd` with a HANDSHAKE
///
/// # Errors
///
/// Returns `HidError::InvalidAddress` for the zero address.
pub async fn set_response(addr: BluetoothAddress, result: HandshakeResult) -> Result<(), HidError> {
    let addr = addr.validate()?;
    submit(HidMessage::SetResponse { addr, result }).await;
    Ok(())
}

/// Wait for the next event from the profile
pub async fn next_event() -> HidEvent {
    EVENT_CHANNEL.receiver().receive().await
}

/// Take the next event if one is waiting
#[must_use]
pub fn try_next_event() -> Option<HidEvent> {
    EVENT_CHANNEL.try_receive().ok()
}

/// Feed a transport message into the profile
pub async fn deliver(message: HidMessage) {
    submit(message).await;
}

/// Feed a transport message into the profile without waiting
///
/// For use from contexts that cannot await, such as a stack callback.
///
/// # Errors
///
/// Returns `HidError::QueueFull` if the inbox has no room.
pub fn try_deliver(message: HidMessage) -> Result<(), HidError> {
    INBOX_CHANNEL
        .try_send(message)
        .map_err(|_| HidError::QueueFull)
}

/// Move every whole packet waiting in `source` into the profile as data on `cid`
///
/// Returns the number of packets delivered.
///
/// # Errors
///
/// Returns `StreamError::PacketTooLarge` if a packet does not fit a HIDP packet
/// buffer. The oversized packet is dropped; packets before it were delivered.
pub async fn deliver_data<S: Source + ?Sized>(
    cid: ChannelId,
    source: &mut S,
) -> Result<usize, StreamError> {
    let mut delivered = 0;
    while let Some(data) = read_packet(source)? {
        submit(HidMessage::L2capData { cid, data }).await;
        delivered += 1;
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::{CHANNEL_DEPTH, MAX_REPORT_SIZE},
        hid::Packet,
        stream::{BufferedStream, write_packet},
    };
    use embassy_futures::block_on;

    const PEER: BluetoothAddress = BluetoothAddress::new([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_zero_address_rejected() {
        assert_eq!(
            block_on(connect(BluetoothAddress::ZERO)),
            Err(HidError::InvalidAddress)
        );
        assert_eq!(
            block_on(set_idle(BluetoothAddress::ZERO, 0)),
            Err(HidError::InvalidAddress)
        );
    }

    #[test]
    fn test_oversized_report_rejected() {
        let data = [0u8; MAX_REPORT_SIZE + 1];
        assert_eq!(
            block_on(set_report(PEER, ReportType::Output, &data)),
            Err(HidError::PayloadTooLarge)
        );
        assert_eq!(
            block_on(send_report(PEER, ReportType::Input, &data)),
            Err(HidError::PayloadTooLarge)
        );
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        assert_eq!(
            block_on(get_report(PEER, ReportType::Input, None, Some(0))),
            Err(HidError::InvalidParameter)
        );
    }

    // The only test that touches the shared inbox
    #[test]
    fn test_inbox_delivery() {
        let mut stream = BufferedStream::<32>::new();
        write_packet(&mut stream, &[0xA1, 0x01]).unwrap();
        write_packet(&mut stream, &[0x15]).unwrap();

        assert_eq!(block_on(deliver_data(0x41, &mut stream)), Ok(2));
        assert_eq!(
            INBOX_CHANNEL.try_receive(),
            Ok(HidMessage::L2capData {
                cid: 0x41,
                data: Packet::from_slice(&[0xA1, 0x01]).unwrap(),
            })
        );
        assert_eq!(
            INBOX_CHANNEL.try_receive(),
            Ok(HidMessage::L2capData {
                cid: 0x41,
                data: Packet::from_slice(&[0x15]).unwrap(),
            })
        );

        for _ in 0..CHANNEL_DEPTH {
            try_deliver(HidMessage::L2capDisconnectCfm { cid: 0x40 }).unwrap();
        }
        assert_eq!(
            try_deliver(HidMessage::L2capDisconnectCfm { cid: 0x40 }),
            Err(HidError::QueueFull)
        );
        while INBOX_CHANNEL.try_receive().is_ok() {}
    }
}
