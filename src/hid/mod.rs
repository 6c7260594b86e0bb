//! Human Interface Device (HID) Profile
//!
//! This module implements the connection engine of the Bluetooth Classic HID
//! profile: bringing up and tearing down the control and interrupt L2CAP
//! channels for each peer, and carrying HIDP transactions over them.
//!
//! ## Message Flow
//!
//! The profile is a pure state machine. Every input, whether it comes from the
//! application, the L2CAP transport or an expired timer, is a [`HidMessage`].
//! [`HidProfile::handle`] runs it to completion and returns the [`HidAction`]s
//! it produced: requests for the transport, timer changes and [`HidEvent`]s for
//! the application. The [`processor`](crate::processor) task feeds messages in
//! and executes the actions.
//!
//! ## Channels
//!
//! - Control (PSM 0x0011): GET/SET REPORT, PROTOCOL, IDLE, HID_CONTROL
//! - Interrupt (PSM 0x0013): DATA reports

pub mod connection;
pub mod packet;
pub mod profile;
pub mod transaction;


pub use connection::{ChannelState, HidChannel, HidConnection, HidState};
pub use packet::{
    ControlOperation, HandshakeResult, HidpError, HidpMessage, Packet, Protocol, Report,
    ReportType,
};
pub use profile::HidProfile;
pub use transaction::{ControlTracker, PendingRequest, RequestKind};

use crate::{
    BluetoothAddress,
    constants::{
        DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DISCONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
        MAX_ACTIONS,
    },
    l2cap::{ChannelId, ConnectionResult, DisconnectReason, ProtocolServiceMultiplexer, SignalingId, psm},
    stream::StreamId,
};
use heapless::Vec;

/// Status carried by every confirmation and indication sent to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidStatus {
    /// Operation completed
    Success,
    /// Operation failed for an unspecified transport reason
    Failed,
    /// Another request of the same kind is still in flight
    Busy,
    /// The peer did not answer in time
    Timeout,
    /// No free connection slot
    Resource,
    /// The peer or its stack refused the channel
    Rejected,
    /// A parameter was invalid (zero address, oversized report, ...)
    InvalidParameter,
    /// No connection to that peer, or it is not in the connected state
    NotConnected,
    /// The peer sent a malformed or unexpected message
    ProtocolViolation,
    /// The baseband link was lost
    LinkLoss,
    /// The operation was cancelled by a local request
    Aborted,
    /// The peer answered with a HANDSHAKE error
    Handshake(HandshakeResult),
}

impl HidStatus {
    /// Returns `true` for `Success`
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<HandshakeResult> for HidStatus {
    fn from(result: HandshakeResult) -> Self {
        match result {
            HandshakeResult::Successful => Self::Success,
            other => Self::Handshake(other),
        }
    }
}

impl From<ConnectionResult> for HidStatus {
    fn from(result: ConnectionResult) -> Self {
        match result {
            ConnectionResult::Success => Self::Success,
            ConnectionResult::Timeout => Self::Timeout,
            r if r.is_refusal() => Self::Rejected,
            _ => Self::Failed,
        }
    }
}

/// Which of the two HID channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelKind {
    /// Control channel
    Control,
    /// Interrupt channel
    Interrupt,
}

impl ChannelKind {
    /// PSM the channel is opened on
    #[must_use]
    pub const fn psm(self) -> ProtocolServiceMultiplexer {
        match self {
            Self::Control => psm::HID_CONTROL,
            Self::Interrupt => psm::HID_INTERRUPT,
        }
    }

    /// Channel kind for a PSM, if it is one of the HID PSMs
    #[must_use]
    pub const fn from_psm(psm: ProtocolServiceMultiplexer) -> Option<Self> {
        match psm {
            psm::HID_CONTROL => Some(Self::Control),
            psm::HID_INTERRUPT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

/// What a timer guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// Both channels must be up before this fires
    Connect,
    /// Teardown must finish before this fires
    Disconnect,
    /// The control request with this sequence number must be answered
    Request(u16),
}

/// Timer identity: one connection, one purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId {
    /// Connection the timer belongs to
    pub addr: BluetoothAddress,
    /// What the timer guards
    pub kind: TimerKind,
}

/// Options for configuring a [`HidProfile`]
///
/// # Examples
///
/// ```rust
/// use hidbird::hid::HidConfig;
///
/// static SERVICE_RECORD: [u8; 4] = [0x35, 0x02, 0x09, 0x00];
///
/// let config = HidConfig {
///     request_timeout_ms: 2_000,
///     service_record: Some(&SERVICE_RECORD),
///     ..HidConfig::default()
/// };
/// assert_eq!(config.disconnect_timeout_ms, 5_000);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HidConfig {
    /// Time allowed for both channels to come up
    pub connect_timeout_ms: u32,
    /// Time allowed for teardown before channels are force-closed
    pub disconnect_timeout_ms: u32,
    /// Time allowed for the peer to answer a control request
    pub request_timeout_ms: u32,
    /// Pre-encoded SDP service record registered during initialisation
    pub service_record: Option<&'static [u8]>,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            disconnect_timeout_ms: DEFAULT_DISCONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            service_record: None,
        }
    }
}

/// Input to the profile state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidMessage {
    // ---- application requests ----
    /// Open a connection to a peer
    ConnectRequest {
        /// Peer address
        addr: BluetoothAddress,
    },
    /// Answer a `ConnectInd`
    ConnectResponse {
        /// Peer address
        addr: BluetoothAddress,
        /// Accept or refuse the connection
        accept: bool,
    },
    /// Close the connection to a peer
    DisconnectRequest {
        /// Peer address
        addr: BluetoothAddress,
    },
    /// Ask the peer for a report
    GetReport {
        /// Peer address
        addr: BluetoothAddress,
        /// Report type (Input, Output or Feature)
        report_type: ReportType,
        /// Report id, when the descriptor uses ids
        report_id: Option<u8>,
        /// Largest report we accept
        buffer_size: Option<u16>,
    },
    /// Write a report to the peer
    SetReport {
        /// Peer address
        addr: BluetoothAddress,
        /// Report type (Input, Output or Feature)
        report_type: ReportType,
        /// Report bytes
        data: Report,
    },
    /// Ask the peer for its protocol mode
    GetProtocol {
        /// Peer address
        addr: BluetoothAddress,
    },
    /// Select the peer's protocol mode
    SetProtocol {
        /// Peer address
        addr: BluetoothAddress,
        /// Protocol to select
        protocol: Protocol,
    },
    /// Ask the peer for its idle rate
    GetIdle {
        /// Peer address
        addr: BluetoothAddress,
    },
    /// Set the peer's idle rate
    SetIdle {
        /// Peer address
        addr: BluetoothAddress,
        /// Idle rate in 4 ms units
        rate: u8,
    },
    /// Send a HID_CONTROL operation
    Control {
        /// Peer address
        addr: BluetoothAddress,
        /// Operation to send
        operation: ControlOperation,
    },
    /// Send a report on the interrupt channel
    SendReport {
        /// Peer address
        addr: BluetoothAddress,
        /// Report type
        report_type: ReportType,
        /// Report bytes
        data: Report,
    },
    /// Answer a `GetReportInd`
    GetReportResponse {
        /// Peer address
        addr: BluetoothAddress,
        /// `Successful` to send `data`, anything else is sent as a HANDSHAKE
        result: HandshakeResult,
        /// Report type of `data`
        report_type: ReportType,
        /// Report bytes
        data: Report,
    },
    /// Answer a `GetProtocolInd`
    GetProtocolResponse {
        /// Peer address
        addr: BluetoothAddress,
        /// `Successful` to send `protocol`, anything else is sent as a HANDSHAKE
        result: HandshakeResult,
        /// Current protocol
        protocol: Protocol,
    },
    /// Answer a `GetIdleInd`
    GetIdleResponse {
        /// Peer address
        addr: BluetoothAddress,
        /// `Successful` to send `rate`, anything else is sent as a HANDSHAKE
        result: HandshakeResult,
        /// Current idle rate
        rate: u8,
    },
    /// Answer a `SetReportInd`, `SetProtocolInd` or `SetIdleInd`
    SetResponse {
        /// Peer address
        addr: BluetoothAddress,
        /// HANDSHAKE result to send
        result: HandshakeResult,
    },

    // ---- transport ----
    /// A PSM registration finished
    L2capRegisterCfm {
        /// PSM that was registered
        psm: ProtocolServiceMultiplexer,
        /// Whether the stack accepted it
        success: bool,
    },
    /// The SDP record registration finished
    SdpRegisterCfm {
        /// Whether the stack accepted it
        success: bool,
    },
    /// The peer wants to open a channel
    L2capConnectInd {
        /// Peer address
        addr: BluetoothAddress,
        /// PSM of the channel
        psm: ProtocolServiceMultiplexer,
        /// Local channel id assigned by the stack
        cid: ChannelId,
        /// Signalling identifier to echo in the response
        identifier: SignalingId,
    },
    /// A channel we requested or accepted has finished opening
    L2capConnectCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// PSM of the channel
        psm: ProtocolServiceMultiplexer,
        /// Local channel id
        cid: ChannelId,
        /// Outcome
        result: ConnectionResult,
        /// Stream handle for data, on success
        stream: Option<StreamId>,
    },
    /// The peer closed a channel or the link dropped
    L2capDisconnectInd {
        /// Local channel id
        cid: ChannelId,
        /// Why the channel went down
        reason: DisconnectReason,
    },
    /// A channel we asked to close is closed
    L2capDisconnectCfm {
        /// Local channel id
        cid: ChannelId,
    },
    /// One SDU arrived on a channel
    L2capData {
        /// Local channel id
        cid: ChannelId,
        /// SDU bytes
        data: Packet,
    },

    // ---- timers ----
    /// A timer armed by `HidAction::StartTimer` expired
    Timeout(TimerId),
}

/// Output of the profile state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidAction {
    /// Register a PSM with the transport
    RegisterPsm(ProtocolServiceMultiplexer),
    /// Register the service record with SDP
    RegisterServiceRecord(&'static [u8]),
    /// Open an outgoing channel
    L2capConnect {
        /// Peer address
        addr: BluetoothAddress,
        /// PSM to open
        psm: ProtocolServiceMultiplexer,
    },
    /// Answer an `L2capConnectInd`
    L2capConnectResponse {
        /// Peer address
        addr: BluetoothAddress,
        /// PSM of the channel
        psm: ProtocolServiceMultiplexer,
        /// Local channel id from the indication
        cid: ChannelId,
        /// Signalling identifier from the indication
        identifier: SignalingId,
        /// `Success` to accept, a refusal code to reject
        result: ConnectionResult,
    },
    /// Close a channel
    L2capDisconnect {
        /// Local channel id
        cid: ChannelId,
    },
    /// Write one SDU to a channel
    L2capSend {
        /// Local channel id
        cid: ChannelId,
        /// Stream the channel writes to
        stream: Option<StreamId>,
        /// SDU bytes
        data: Packet,
    },
    /// Arm (or re-arm) a timer
    StartTimer {
        /// Timer identity
        id: TimerId,
        /// Delay in milliseconds
        delay_ms: u32,
    },
    /// Disarm a timer
    CancelTimer(TimerId),
    /// Notify the application
    Event(HidEvent),
}

/// Notification for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidEvent {
    /// Profile initialisation finished
    InitCfm {
        /// Outcome
        status: HidStatus,
    },
    /// A peer wants to connect; answer with `ConnectResponse`
    ConnectInd {
        /// Peer address
        addr: BluetoothAddress,
    },
    /// A connection attempt finished
    ConnectCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
    },
    /// A connection went down without a local request
    DisconnectInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Why
        status: HidStatus,
    },
    /// A local disconnect request finished
    DisconnectCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
    },
    /// Answer to `GetReport`
    GetReportCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
        /// Report type returned by the peer
        report_type: ReportType,
        /// Report bytes (empty on failure)
        data: Report,
    },
    /// Answer to `SetReport`
    SetReportCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
    },
    /// Answer to `GetProtocol`
    GetProtocolCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
        /// Protocol reported by the peer (`Report` on failure)
        protocol: Protocol,
    },
    /// Answer to `SetProtocol`
    SetProtocolCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
    },
    /// Answer to `GetIdle`
    GetIdleCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
        /// Idle rate reported by the peer (0 on failure)
        rate: u8,
    },
    /// Answer to `SetIdle`
    SetIdleCfm {
        /// Peer address
        addr: BluetoothAddress,
        /// Outcome
        status: HidStatus,
    },
    /// The peer sent a HID_CONTROL operation
    ControlInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Operation
        operation: ControlOperation,
    },
    /// The peer asks for a report; answer with `GetReportResponse`
    GetReportInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Requested report type
        report_type: ReportType,
        /// Requested report id
        report_id: Option<u8>,
        /// Largest report the peer accepts
        buffer_size: Option<u16>,
    },
    /// The peer writes a report; answer with `SetResponse`
    SetReportInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Report type
        report_type: ReportType,
        /// Report bytes
        data: Report,
    },
    /// The peer asks for the protocol; answer with `GetProtocolResponse`
    GetProtocolInd {
        /// Peer address
        addr: BluetoothAddress,
    },
    /// The peer selects a protocol; answer with `SetResponse`
    SetProtocolInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Requested protocol
        protocol: Protocol,
    },
    /// The peer asks for the idle rate; answer with `GetIdleResponse`
    GetIdleInd {
        /// Peer address
        addr: BluetoothAddress,
    },
    /// The peer sets the idle rate; answer with `SetResponse`
    SetIdleInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Requested rate
        rate: u8,
    },
    /// A report arrived outside any request
    DataInd {
        /// Peer address
        addr: BluetoothAddress,
        /// Channel it arrived on
        channel: ChannelKind,
        /// Report type
        report_type: ReportType,
        /// Report bytes
        data: Report,
    },
}

/// Actions produced by handling one message
pub type Actions = Vec<HidAction, MAX_ACTIONS>;

/// Append an action, logging instead of failing when the list is full
pub(crate) fn emit(actions: &mut Actions, action: HidAction) {
    if actions.push(action).is_err() {
        warn!("[HID] Action list full, dropping action");
    }
}

/// Append an application event
pub(crate) fn notify(actions: &mut Actions, event: HidEvent) {
    emit(actions, HidAction::Event(event));
}
