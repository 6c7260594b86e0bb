//! HID Profile State Machine
//!
//! [`HidProfile`] owns every [`HidConnection`] and is the only place their state
//! changes. Each call to [`HidProfile::handle`] runs one message to completion
//! and returns the resulting actions; nothing here blocks or awaits.
//!
//! ## Connection Setup
//!
//! - Local: control is requested first, interrupt once control is open.
//! - Remote: the application accepts the control channel, the interrupt channel
//!   that follows is accepted automatically.
//!
//! The connection is `Connected` only once both channels are open.
//!
//! ## Teardown
//!
//! Local teardown closes interrupt before control. Remote teardown waits for the
//! peer, guarded by the disconnect timer; a second expiry gives up on the
//! transport and drops the instance.

use super::{
    Actions, ChannelKind, ChannelState, HidAction, HidChannel, HidConfig, HidConnection,
    HidEvent, HidMessage, HidState, HidStatus, HidpError, HidpMessage, Packet, TimerId, TimerKind,
    emit, notify,
    packet::{HandshakeResult, Protocol, Report, ReportType},
    transaction::RequestKind,
};
use crate::{
    BluetoothAddress,
    constants::{MAX_CONNECTIONS, MAX_OPEN_CHANNELS},
    l2cap::{ChannelId, ConnectionResult, DisconnectReason, ProtocolServiceMultiplexer, SignalingId, psm},
    stream::StreamId,
};
use heapless::FnvIndexMap;

/// Progress of profile registration with the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum InitState {
    Uninitialised,
    RegisteringPsms { control: bool, interrupt: bool },
    RegisteringRecord,
    Ready,
    Failed,
}

/// HID profile: every connection instance plus the lookup tables routing
/// transport messages to them
#[derive(Debug)]
pub struct HidProfile {
    config: HidConfig,
    init: InitState,
    connections: FnvIndexMap<BluetoothAddress, HidConnection, MAX_CONNECTIONS>,
    cids: FnvIndexMap<ChannelId, BluetoothAddress, MAX_OPEN_CHANNELS>,
}

impl HidProfile {
    /// Create a profile that has not registered with the transport yet
    #[must_use]
    pub fn new(config: HidConfig) -> Self {
        Self {
            config,
            init: InitState::Uninitialised,
            connections: FnvIndexMap::new(),
            cids: FnvIndexMap::new(),
        }
    }

    /// Start registration: both PSMs, then the service record if configured
    ///
    /// `InitCfm` follows once the transport has confirmed everything.
    pub fn init(&mut self) -> Actions {
        let mut actions = Actions::new();

        if self.init == InitState::Ready {
            notify(
                &mut actions,
                HidEvent::InitCfm {
                    status: HidStatus::Success,
                },
            );
            return actions;
        }

        info!("[HID] Registering HID PSMs");
        self.init = InitState::RegisteringPsms {
            control: false,
            interrupt: false,
        };
        emit(&mut actions, HidAction::RegisterPsm(psm::HID_CONTROL));
        emit(&mut actions, HidAction::RegisterPsm(psm::HID_INTERRUPT));
        actions
    }

    /// Returns `true` once initialisation has finished successfully
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.init == InitState::Ready
    }

    /// State of the connection to `addr`, `Idle` if there is none
    #[must_use]
    pub fn state(&self, addr: &BluetoothAddress) -> HidState {
        self.connections
            .get(addr)
            .map_or(HidState::Idle, |connection| connection.state)
    }

    /// Connection instance for `addr`
    #[must_use]
    pub fn connection(&self, addr: &BluetoothAddress) -> Option<&HidConnection> {
        self.connections.get(addr)
    }

    /// Number of live connection instances
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Peer owning channel `cid`
    #[must_use]
    pub fn peer_for(&self, cid: ChannelId) -> Option<BluetoothAddress> {
        self.cids.get(&cid).copied()
    }

    /// Handle one message and return the actions it produced
    pub fn handle(&mut self, message: HidMessage) -> Actions {
        let mut actions = Actions::new();

        match message {
            HidMessage::ConnectRequest { addr } => self.connect_request(addr, &mut actions),
            HidMessage::ConnectResponse { addr, accept } => {
                self.connect_response(addr, accept, &mut actions);
            }
            HidMessage::DisconnectRequest { addr } => self.disconnect_request(addr, &mut actions),
            HidMessage::GetReport {
                addr,
                report_type,
                report_id,
                buffer_size,
            } => self.host_request(
                addr,
                RequestKind::GetReport,
                &HidpMessage::GetReport {
                    report_type,
                    report_id,
                    buffer_size,
                },
                &mut actions,
            ),
            HidMessage::SetReport {
                addr,
                report_type,
                data,
            } => self.host_request(
                addr,
                RequestKind::SetReport,
                &HidpMessage::SetReport { report_type, data },
                &mut actions,
            ),
            HidMessage::GetProtocol { addr } => self.host_request(
                addr,
                RequestKind::GetProtocol,
                &HidpMessage::GetProtocol,
                &mut actions,
            ),
            HidMessage::SetProtocol { addr, protocol } => self.host_request(
                addr,
                RequestKind::SetProtocol,
                &HidpMessage::SetProtocol(protocol),
                &mut actions,
            ),
            HidMessage::GetIdle { addr } => self.host_request(
                addr,
                RequestKind::GetIdle,
                &HidpMessage::GetIdle,
                &mut actions,
            ),
            HidMessage::SetIdle { addr, rate } => self.host_request(
                addr,
                RequestKind::SetIdle,
                &HidpMessage::SetIdle(rate),
                &mut actions,
            ),
            HidMessage::Control { addr, operation } => {
                self.send_unacknowledged(
                    addr,
                    ChannelKind::Control,
                    &HidpMessage::Control(operation),
                    &mut actions,
                );
            }
            HidMessage::SendReport {
                addr,
                report_type,
                data,
            } => self.send_unacknowledged(
                addr,
                ChannelKind::Interrupt,
                &HidpMessage::Data { report_type, data },
                &mut actions,
            ),
            HidMessage::GetReportResponse {
                addr,
                result,
                report_type,
                data,
            } => {
                let answer = if result == HandshakeResult::Successful {
                    HidpMessage::Data { report_type, data }
                } else {
                    HidpMessage::Handshake(result)
                };
                self.answer_peer(addr, |kind| kind == RequestKind::GetReport, &answer, &mut actions);
            }
            HidMessage::GetProtocolResponse {
                addr,
                result,
                protocol,
            } => {
                let answer = single_byte_answer(result, protocol as u8);
                self.answer_peer(
                    addr,
                    |kind| kind == RequestKind::GetProtocol,
                    &answer,
                    &mut actions,
                );
            }
            HidMessage::GetIdleResponse { addr, result, rate } => {
                let answer = single_byte_answer(result, rate);
                self.answer_peer(addr, |kind| kind == RequestKind::GetIdle, &answer, &mut actions);
            }
            HidMessage::SetResponse { addr, result } => self.answer_peer(
                addr,
                |kind| !kind.expects_data(),
                &HidpMessage::Handshake(result),
                &mut actions,
            ),
            HidMessage::L2capRegisterCfm { psm, success } => {
                self.register_cfm(psm, success, &mut actions);
            }
            HidMessage::SdpRegisterCfm { success } => self.sdp_register_cfm(success, &mut actions),
            HidMessage::L2capConnectInd {
                addr,
                psm,
                cid,
                identifier,
            } => self.connect_ind(addr, psm, cid, identifier, &mut actions),
            HidMessage::L2capConnectCfm {
                addr,
                psm,
                cid,
                result,
                stream,
            } => self.connect_cfm(addr, psm, cid, result, stream, &mut actions),
            HidMessage::L2capDisconnectInd { cid, reason } => {
                self.channel_down(cid, Some(reason), &mut actions);
            }
            HidMessage::L2capDisconnectCfm { cid } => self.channel_down(cid, None, &mut actions),
            HidMessage::L2capData { cid, data } => self.data_received(cid, &data, &mut actions),
            HidMessage::Timeout(id) => self.timeout(id, &mut actions),
        }

        actions
    }

    // ---- initialisation ----

    fn register_cfm(
        &mut self,
        psm: ProtocolServiceMultiplexer,
        success: bool,
        actions: &mut Actions,
    ) {
        let InitState::RegisteringPsms {
            mut control,
            mut interrupt,
        } = self.init
        else {
            warn!("[HID] Unexpected PSM registration confirm for {}", psm);
            return;
        };

        if !success {
            error!("[HID] Failed to register PSM {}", psm);
            self.init_done(HidStatus::Failed, actions);
            return;
        }

        match ChannelKind::from_psm(psm) {
            Some(ChannelKind::Control) => control = true,
            Some(ChannelKind::Interrupt) => interrupt = true,
            None => {
                warn!("[HID] Registration confirm for foreign PSM {}", psm);
                return;
            }
        }

        if !(control && interrupt) {
            self.init = InitState::RegisteringPsms { control, interrupt };
            return;
        }

        match self.config.service_record {
            Some(record) => {
                debug!("[HID] Registering service record ({} bytes)", record.len());
                self.init = InitState::RegisteringRecord;
                emit(actions, HidAction::RegisterServiceRecord(record));
            }
            None => self.init_done(HidStatus::Success, actions),
        }
    }

    fn sdp_register_cfm(&mut self, success: bool, actions: &mut Actions) {
        if self.init != InitState::RegisteringRecord {
            warn!("[HID] Unexpected service record confirm");
            return;
        }

        let status = if success {
            HidStatus::Success
        } else {
            HidStatus::Failed
        };
        self.init_done(status, actions);
    }

    fn init_done(&mut self, status: HidStatus, actions: &mut Actions) {
        self.init = if status.is_success() {
            info!("[HID] Profile ready");
            InitState::Ready
        } else {
            InitState::Failed
        };
        notify(actions, HidEvent::InitCfm { status });
    }

    // ---- connection setup ----

    fn connect_request(&mut self, addr: BluetoothAddress, actions: &mut Actions) {
        let status = if !self.is_ready() {
            Some(HidStatus::Failed)
        } else if addr.is_zero() {
            Some(HidStatus::InvalidParameter)
        } else if self.connections.contains_key(&addr) {
            Some(HidStatus::Busy)
        } else {
            None
        };
        if let Some(status) = status {
            warn!("[HID] Connect to {} refused: {}", addr, status);
            notify(actions, HidEvent::ConnectCfm { addr, status });
            return;
        }

        let mut connection = HidConnection::new(addr, HidState::ConnectingLocal);
        connection.control.state = ChannelState::Connecting;
        if self.connections.insert(addr, connection).is_err() {
            warn!("[HID] No free connection slot for {}", addr);
            notify(
                actions,
                HidEvent::ConnectCfm {
                    addr,
                    status: HidStatus::Resource,
                },
            );
            return;
        }

        info!("[HID] Connecting to {}", addr);
        emit(
            actions,
            HidAction::L2capConnect {
                addr,
                psm: psm::HID_CONTROL,
            },
        );
        start_timer(actions, addr, TimerKind::Connect, self.config.connect_timeout_ms);
    }

    fn connect_ind(
        &mut self,
        addr: BluetoothAddress,
        psm: ProtocolServiceMultiplexer,
        cid: ChannelId,
        identifier: SignalingId,
        actions: &mut Actions,
    ) {
        let respond = |actions: &mut Actions, result: ConnectionResult| {
            emit(
                actions,
                HidAction::L2capConnectResponse {
                    addr,
                    psm,
                    cid,
                    identifier,
                    result,
                },
            );
        };

        if !self.is_ready() {
            warn!("[HID] Connect indication before profile is ready");
            respond(actions, ConnectionResult::NoResources);
            return;
        }

        match ChannelKind::from_psm(psm) {
            Some(ChannelKind::Control) => {
                if self.connections.contains_key(&addr) {
                    warn!("[HID] Control indication from {} while not idle", addr);
                    respond(actions, ConnectionResult::NoResources);
                    return;
                }

                let mut connection = HidConnection::new(addr, HidState::ConnectingRemote);
                connection.control.state = ChannelState::Connecting;
                connection.control.cid = Some(cid);
                connection.control.pending_identifier = Some(identifier);
                if self.connections.insert(addr, connection).is_err() {
                    warn!("[HID] No free connection slot for {}", addr);
                    respond(actions, ConnectionResult::NoResources);
                    notify(
                        actions,
                        HidEvent::ConnectCfm {
                            addr,
                            status: HidStatus::Resource,
                        },
                    );
                    return;
                }
                self.register_cid(cid, addr);

                info!("[HID] Incoming connection from {}", addr);
                notify(actions, HidEvent::ConnectInd { addr });
                start_timer(actions, addr, TimerKind::Connect, self.config.connect_timeout_ms);
            }
            Some(ChannelKind::Interrupt) => {
                let Some(connection) = self.connections.get_mut(&addr) else {
                    warn!("[HID] Interrupt indication from {} while idle", addr);
                    respond(actions, ConnectionResult::NoResources);
                    return;
                };

                let acceptable = connection.state == HidState::ConnectingRemote
                    && connection.control.state != ChannelState::Disconnected
                    && connection.control.pending_identifier.is_none()
                    && connection.interrupt.is_disconnected();
                if !acceptable {
                    warn!(
                        "[HID] Interrupt indication from {} in state {}",
                        addr,
                        connection.state
                    );
                    respond(actions, ConnectionResult::NoResources);
                    return;
                }

                connection.interrupt.state = ChannelState::Connecting;
                connection.interrupt.cid = Some(cid);
                self.register_cid(cid, addr);
                respond(actions, ConnectionResult::Success);
            }
            None => {
                warn!("[HID] Connect indication for unsupported PSM {}", psm);
                respond(actions, ConnectionResult::PsmNotSupported);
            }
        }
    }

    fn connect_response(&mut self, addr: BluetoothAddress, accept: bool, actions: &mut Actions) {
        let Some(connection) = self.connections.get_mut(&addr) else {
            warn!("[HID] Connect response for unknown peer {}", addr);
            return;
        };
        let (Some(identifier), Some(cid), HidState::ConnectingRemote) = (
            connection.control.pending_identifier,
            connection.control.cid,
            connection.state,
        ) else {
            warn!("[HID] Connect response from {} with nothing to answer", addr);
            return;
        };

        let result = if accept {
            connection.control.pending_identifier = None;
            ConnectionResult::Success
        } else {
            ConnectionResult::SecurityBlock
        };
        emit(
            actions,
            HidAction::L2capConnectResponse {
                addr,
                psm: psm::HID_CONTROL,
                cid,
                identifier,
                result,
            },
        );

        if !accept {
            info!("[HID] Connection from {} refused", addr);
            cancel_timer(actions, addr, TimerKind::Connect);
            self.destroy(addr);
            notify(
                actions,
                HidEvent::ConnectCfm {
                    addr,
                    status: HidStatus::Rejected,
                },
            );
        }
    }

    fn connect_cfm(
        &mut self,
        addr: BluetoothAddress,
        psm: ProtocolServiceMultiplexer,
        cid: ChannelId,
        result: ConnectionResult,
        stream: Option<StreamId>,
        actions: &mut Actions,
    ) {
        if result == ConnectionResult::Pending {
            return;
        }

        let connection = match ChannelKind::from_psm(psm) {
            Some(kind) => self
                .connections
                .get_mut(&addr)
                .filter(|connection| connection.channel(kind).state == ChannelState::Connecting)
                .map(|connection| (kind, connection)),
            None => None,
        };
        let Some((kind, connection)) = connection else {
            if result == ConnectionResult::Success {
                warn!("[HID] Closing unexpected channel {} from {}", cid, addr);
                emit(actions, HidAction::L2capDisconnect { cid });
            }
            return;
        };

        if result != ConnectionResult::Success {
            warn!("[HID] {} channel to {} failed: {}", kind, addr, result);
            if let Some(cid) = connection.channel_mut(kind).closed() {
                self.cids.remove(&cid);
            }
            if connection.state.is_connecting() {
                connection.connect_status = HidStatus::from(result);
                connection.state = HidState::DisconnectingLocal;
                cancel_timer(actions, addr, TimerKind::Connect);
                start_timer(
                    actions,
                    addr,
                    TimerKind::Disconnect,
                    self.config.disconnect_timeout_ms,
                );
            }
            self.settle(addr, actions);
            return;
        }

        let channel = connection.channel_mut(kind);
        let close = channel.close_on_connect;
        channel.opened(cid, stream);
        debug!("[HID] {} channel {} open to {}", kind, cid, addr);

        if close || connection.state.is_disconnecting() {
            close_channel(connection.channel_mut(kind), actions);
        } else {
            if kind == ChannelKind::Control && connection.state == HidState::ConnectingLocal {
                connection.interrupt.state = ChannelState::Connecting;
                emit(
                    actions,
                    HidAction::L2capConnect {
                        addr,
                        psm: psm::HID_INTERRUPT,
                    },
                );
            }

            if connection.try_complete_connect() {
                info!("[HID] Connected to {}", addr);
                cancel_timer(actions, addr, TimerKind::Connect);
                notify(
                    actions,
                    HidEvent::ConnectCfm {
                        addr,
                        status: HidStatus::Success,
                    },
                );
            }
        }

        self.register_cid(cid, addr);
    }

    // ---- teardown ----

    fn disconnect_request(&mut self, addr: BluetoothAddress, actions: &mut Actions) {
        let Some(connection) = self.connections.get_mut(&addr) else {
            notify(
                actions,
                HidEvent::DisconnectCfm {
                    addr,
                    status: HidStatus::NotConnected,
                },
            );
            return;
        };

        if connection.state.is_disconnecting() {
            // Already going down: the final event becomes the confirmation
            connection.disconnect_requested = true;
            return;
        }

        info!("[HID] Disconnecting from {}", addr);
        if connection.state.is_connecting() {
            connection.connect_status = HidStatus::Aborted;
            cancel_timer(actions, addr, TimerKind::Connect);
        }
        connection.state = HidState::DisconnectingLocal;
        connection.disconnect_requested = true;
        start_timer(
            actions,
            addr,
            TimerKind::Disconnect,
            self.config.disconnect_timeout_ms,
        );
        self.settle(addr, actions);
    }

    fn channel_down(
        &mut self,
        cid: ChannelId,
        reason: Option<DisconnectReason>,
        actions: &mut Actions,
    ) {
        let Some(addr) = self.cids.remove(&cid) else {
            debug!("[HID] Disconnect for unknown channel {}", cid);
            return;
        };
        let Some(connection) = self.connections.get_mut(&addr) else {
            return;
        };
        let Some(kind) = connection.kind_of(cid) else {
            return;
        };
        connection.channel_mut(kind).closed();
        debug!("[HID] {} channel {} to {} closed", kind, cid, addr);

        let link_loss = reason == Some(DisconnectReason::LinkLoss);
        match connection.state {
            HidState::Connected => {
                connection.state = if reason.is_some() {
                    HidState::DisconnectingRemote
                } else {
                    HidState::DisconnectingLocal
                };
                connection.disconnect_status = if link_loss {
                    HidStatus::LinkLoss
                } else {
                    HidStatus::Success
                };
                start_timer(
                    actions,
                    addr,
                    TimerKind::Disconnect,
                    self.config.disconnect_timeout_ms,
                );
            }
            HidState::ConnectingLocal | HidState::ConnectingRemote => {
                connection.connect_status = if link_loss {
                    HidStatus::LinkLoss
                } else {
                    HidStatus::Failed
                };
                connection.state = HidState::DisconnectingLocal;
                cancel_timer(actions, addr, TimerKind::Connect);
                start_timer(
                    actions,
                    addr,
                    TimerKind::Disconnect,
                    self.config.disconnect_timeout_ms,
                );
            }
            _ => {
                if link_loss && connection.disconnect_status == HidStatus::Success {
                    connection.disconnect_status = HidStatus::LinkLoss;
                }
            }
        }

        self.settle(addr, actions);
    }

    /// Push teardown forward and destroy the instance once both channels are down
    fn settle(&mut self, addr: BluetoothAddress, actions: &mut Actions) {
        let Some(connection) = self.connections.get_mut(&addr) else {
            return;
        };
        if !connection.state.is_disconnecting() {
            return;
        }

        for kind in [ChannelKind::Control, ChannelKind::Interrupt] {
            let channel = connection.channel_mut(kind);
            if let (Some(identifier), Some(cid)) = (channel.pending_identifier, channel.cid) {
                emit(
                    actions,
                    HidAction::L2capConnectResponse {
                        addr,
                        psm: kind.psm(),
                        cid,
                        identifier,
                        result: ConnectionResult::NoResources,
                    },
                );
                channel.closed();
                self.cids.remove(&cid);
            }
        }

        if connection.state == HidState::DisconnectingLocal {
            match connection.interrupt.state {
                ChannelState::Connected => close_channel(&mut connection.interrupt, actions),
                ChannelState::Connecting => connection.interrupt.close_on_connect = true,
                _ => {}
            }

            if matches!(
                connection.interrupt.state,
                ChannelState::Disconnected | ChannelState::Connecting
            ) {
                match connection.control.state {
                    ChannelState::Connected => close_channel(&mut connection.control, actions),
                    ChannelState::Connecting => connection.control.close_on_connect = true,
                    _ => {}
                }
            }
        }

        if connection.both_disconnected() {
            self.finish(addr, actions);
        }
    }

    /// Report the final events for `addr` and destroy its instance
    fn finish(&mut self, addr: BluetoothAddress, actions: &mut Actions) {
        let Some(connection) = self.destroy(addr) else {
            return;
        };

        if let Some(request) = connection.tracker.pending() {
            cancel_timer(actions, addr, TimerKind::Request(request.sequence));
            notify(
                actions,
                request_failed(addr, request.kind, HidStatus::NotConnected),
            );
        }
        cancel_timer(actions, addr, TimerKind::Connect);
        cancel_timer(actions, addr, TimerKind::Disconnect);

        if !connection.was_connected {
            info!("[HID] Connection to {} failed: {}", addr, connection.connect_status);
            notify(
                actions,
                HidEvent::ConnectCfm {
                    addr,
                    status: connection.connect_status,
                },
            );
        }

        if connection.disconnect_requested {
            notify(
                actions,
                HidEvent::DisconnectCfm {
                    addr,
                    status: connection.disconnect_status,
                },
            );
        } else if connection.was_connected {
            info!("[HID] Disconnected from {}: {}", addr, connection.disconnect_status);
            notify(
                actions,
                HidEvent::DisconnectInd {
                    addr,
                    status: connection.disconnect_status,
                },
            );
        }
    }

    fn timeout(&mut self, id: TimerId, actions: &mut Actions) {
        let addr = id.addr;
        let Some(connection) = self.connections.get_mut(&addr) else {
            return;
        };

        match id.kind {
            TimerKind::Connect => {
                if !connection.state.is_connecting() {
                    return;
                }
                warn!("[HID] Connect to {} timed out", addr);
                connection.connect_status = HidStatus::Timeout;
                connection.state = HidState::DisconnectingLocal;
                start_timer(
                    actions,
                    addr,
                    TimerKind::Disconnect,
                    self.config.disconnect_timeout_ms,
                );
                self.settle(addr, actions);
            }
            TimerKind::Disconnect => match connection.state {
                HidState::DisconnectingLocal | HidState::DisconnectingRemote => {
                    warn!("[HID] Disconnect from {} timed out, forcing close", addr);
                    connection.state = HidState::DisconnectingFailed;
                    connection.disconnect_status = HidStatus::Timeout;
                    for kind in [ChannelKind::Control, ChannelKind::Interrupt] {
                        let channel = connection.channel_mut(kind);
                        match (channel.state, channel.cid) {
                            (ChannelState::Disconnected, _) => {}
                            (_, Some(_)) => close_channel(channel, actions),
                            (_, None) => channel.close_on_connect = true,
                        }
                    }
                    start_timer(
                        actions,
                        addr,
                        TimerKind::Disconnect,
                        self.config.disconnect_timeout_ms,
                    );
                    self.settle(addr, actions);
                }
                HidState::DisconnectingFailed => {
                    error!("[HID] Transport did not close channels to {}, dropping", addr);
                    self.finish(addr, actions);
                }
                _ => {}
            },
            TimerKind::Request(sequence) => {
                if let Some(request) = connection.tracker.expire(sequence) {
                    warn!("[HID] {} to {} timed out", request.kind, addr);
                    notify(actions, request_failed(addr, request.kind, HidStatus::Timeout));
                }
            }
        }
    }

    // ---- control and interrupt traffic ----

    fn host_request(
        &mut self,
        addr: BluetoothAddress,
        kind: RequestKind,
        message: &HidpMessage,
        actions: &mut Actions,
    ) {
        let Some(connection) = self
            .connections
            .get_mut(&addr)
            .filter(|connection| connection.state == HidState::Connected)
        else {
            notify(actions, request_failed(addr, kind, HidStatus::NotConnected));
            return;
        };

        let data = match message.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!("[HID] Cannot encode {}: {}", kind, e);
                notify(actions, request_failed(addr, kind, HidStatus::InvalidParameter));
                return;
            }
        };

        let request = match connection.tracker.begin(kind) {
            Ok(request) => request,
            Err(status) => {
                debug!("[HID] {} to {} while another request is pending", kind, addr);
                notify(actions, request_failed(addr, kind, status));
                return;
            }
        };

        send_packet(&connection.control, data, actions);
        start_timer(
            actions,
            addr,
            TimerKind::Request(request.sequence),
            self.config.request_timeout_ms,
        );
    }

    fn send_unacknowledged(
        &self,
        addr: BluetoothAddress,
        kind: ChannelKind,
        message: &HidpMessage,
        actions: &mut Actions,
    ) {
        let Some(connection) = self
            .connections
            .get(&addr)
            .filter(|connection| connection.state == HidState::Connected)
        else {
            warn!("[HID] Dropping {} message to {}: not connected", kind, addr);
            return;
        };

        send_message(connection.channel(kind), message, actions);
    }

    fn answer_peer(
        &mut self,
        addr: BluetoothAddress,
        answers: impl Fn(RequestKind) -> bool,
        message: &HidpMessage,
        actions: &mut Actions,
    ) {
        let Some(connection) = self
            .connections
            .get_mut(&addr)
            .filter(|connection| connection.state == HidState::Connected)
        else {
            warn!("[HID] Response for {} dropped: not connected", addr);
            return;
        };

        match connection.incoming {
            Some(kind) if answers(kind) => {
                connection.incoming = None;
                send_message(&connection.control, message, actions);
            }
            _ => warn!("[HID] Response for {} does not match the peer request", addr),
        }
    }

    fn data_received(&mut self, cid: ChannelId, bytes: &[u8], actions: &mut Actions) {
        let Some(addr) = self.peer_for(cid) else {
            debug!("[HID] Data on unknown channel {}", cid);
            return;
        };
        let Some(connection) = self.connections.get_mut(&addr) else {
            return;
        };
        let Some(kind) = connection.kind_of(cid) else {
            return;
        };
        if !connection.channel(kind).is_connected() {
            return;
        }

        let message = HidpMessage::parse(bytes);
        match kind {
            ChannelKind::Interrupt => match message {
                Ok(HidpMessage::Data { report_type, data }) => notify(
                    actions,
                    HidEvent::DataInd {
                        addr,
                        channel: ChannelKind::Interrupt,
                        report_type,
                        data,
                    },
                ),
                Ok(other) => warn!(
                    "[HID] Ignoring {} on interrupt channel",
                    other.transaction_type()
                ),
                Err(e) => warn!("[HID] Bad interrupt packet from {}: {}", addr, e),
            },
            ChannelKind::Control => control_received(connection, message, actions),
        }
    }

    // ---- tables ----

    fn register_cid(&mut self, cid: ChannelId, addr: BluetoothAddress) {
        if self.cids.insert(cid, addr).is_err() {
            error!("[HID] Channel table full, {} not routed", cid);
        }
    }

    fn destroy(&mut self, addr: BluetoothAddress) -> Option<HidConnection> {
        let connection = self.connections.remove(&addr)?;
        for cid in connection.cids() {
            self.cids.remove(&cid);
        }

        debug!("[HID] Instance for {} destroyed", addr);
        Some(connection)
    }
}

fn control_received(
    connection: &mut HidConnection,
    message: Result<HidpMessage, HidpError>,
    actions: &mut Actions,
) {
    let addr = connection.addr;

    let message = match message {
        Ok(message) => message,
        Err(HidpError::UnsupportedTransaction(kind)) => {
            debug!("[HID] Unsupported transaction {} from {}", kind, addr);
            send_message(
                &connection.control,
                &HidpMessage::Handshake(HandshakeResult::UnsupportedRequest),
                actions,
            );
            return;
        }
        Err(e) => {
            warn!("[HID] Malformed control message from {}: {}", addr, e);
            if let Some(request) = connection.tracker.complete() {
                cancel_timer(actions, addr, TimerKind::Request(request.sequence));
                notify(
                    actions,
                    request_failed(addr, request.kind, HidStatus::ProtocolViolation),
                );
            } else {
                send_message(
                    &connection.control,
                    &HidpMessage::Handshake(HandshakeResult::InvalidParameter),
                    actions,
                );
            }
            return;
        }
    };

    let (kind, event) = match message {
        HidpMessage::Handshake(result) => {
            let Some(request) = connection.tracker.complete() else {
                debug!("[HID] Unsolicited handshake from {}", addr);
                return;
            };
            cancel_timer(actions, addr, TimerKind::Request(request.sequence));
            let status = match (request.kind.expects_data(), result) {
                (true, HandshakeResult::Successful) => HidStatus::ProtocolViolation,
                (_, result) => HidStatus::from(result),
            };
            notify(actions, request_failed(addr, request.kind, status));
            return;
        }
        HidpMessage::Data { report_type, data } => {
            let event = match connection.tracker.complete() {
                Some(request) => {
                    cancel_timer(actions, addr, TimerKind::Request(request.sequence));
                    data_answer(addr, request.kind, report_type, data)
                }
                None => HidEvent::DataInd {
                    addr,
                    channel: ChannelKind::Control,
                    report_type,
                    data,
                },
            };
            notify(actions, event);
            return;
        }
        HidpMessage::Control(operation) => {
            info!("[HID] Control operation {} from {}", operation, addr);
            notify(actions, HidEvent::ControlInd { addr, operation });
            return;
        }
        HidpMessage::GetReport {
            report_type,
            report_id,
            buffer_size,
        } => (
            RequestKind::GetReport,
            HidEvent::GetReportInd {
                addr,
                report_type,
                report_id,
                buffer_size,
            },
        ),
        HidpMessage::SetReport { report_type, data } => (
            RequestKind::SetReport,
            HidEvent::SetReportInd {
                addr,
                report_type,
                data,
            },
        ),
        HidpMessage::GetProtocol => (RequestKind::GetProtocol, HidEvent::GetProtocolInd { addr }),
        HidpMessage::SetProtocol(protocol) => (
            RequestKind::SetProtocol,
            HidEvent::SetProtocolInd { addr, protocol },
        ),
        HidpMessage::GetIdle => (RequestKind::GetIdle, HidEvent::GetIdleInd { addr }),
        HidpMessage::SetIdle(rate) => (RequestKind::SetIdle, HidEvent::SetIdleInd { addr, rate }),
    };

    if connection.incoming.is_some() {
        debug!("[HID] {} from {} while busy", kind, addr);
        send_message(
            &connection.control,
            &HidpMessage::Handshake(HandshakeResult::NotReady),
            actions,
        );
        return;
    }
    connection.incoming = Some(kind);
    notify(actions, event);
}

/// Confirmation for a host request answered with DATA
fn data_answer(
    addr: BluetoothAddress,
    kind: RequestKind,
    report_type: ReportType,
    data: Report,
) -> HidEvent {
    let first = data.first().copied();
    match (kind, first) {
        (RequestKind::GetReport, _) => HidEvent::GetReportCfm {
            addr,
            status: HidStatus::Success,
            report_type,
            data,
        },
        (RequestKind::GetProtocol, Some(byte)) => HidEvent::GetProtocolCfm {
            addr,
            status: HidStatus::Success,
            protocol: Protocol::from_bit(byte),
        },
        (RequestKind::GetIdle, Some(rate)) => HidEvent::GetIdleCfm {
            addr,
            status: HidStatus::Success,
            rate,
        },
        _ => request_failed(addr, kind, HidStatus::ProtocolViolation),
    }
}

/// Confirmation for a host request that finished without data
fn request_failed(addr: BluetoothAddress, kind: RequestKind, status: HidStatus) -> HidEvent {
    match kind {
        RequestKind::GetReport => HidEvent::GetReportCfm {
            addr,
            status,
            report_type: ReportType::Other,
            data: Report::new(),
        },
        RequestKind::SetReport => HidEvent::SetReportCfm { addr, status },
        RequestKind::GetProtocol => HidEvent::GetProtocolCfm {
            addr,
            status,
            protocol: Protocol::Report,
        },
        RequestKind::SetProtocol => HidEvent::SetProtocolCfm { addr, status },
        RequestKind::GetIdle => HidEvent::GetIdleCfm {
            addr,
            status,
            rate: 0,
        },
        RequestKind::SetIdle => HidEvent::SetIdleCfm { addr, status },
    }
}

fn single_byte_answer(result: HandshakeResult, value: u8) -> HidpMessage {
    if result != HandshakeResult::Successful {
        return HidpMessage::Handshake(result);
    }
    let mut data = Report::new();
    // One byte always fits
    let _ = data.push(value);
    HidpMessage::Data {
        report_type: ReportType::Other,
        data,
    }
}

fn close_channel(channel: &mut HidChannel, actions: &mut Actions) {
    if let Some(cid) = channel.cid {
        channel.state = ChannelState::Disconnecting;
        channel.close_on_connect = false;
        emit(actions, HidAction::L2capDisconnect { cid });
    }
}

fn send_message(channel: &HidChannel, message: &HidpMessage, actions: &mut Actions) {
    match message.encode() {
        Ok(data) => send_packet(channel, data, actions),
        Err(e) => warn!("[HID] Cannot encode {}: {}", message.transaction_type(), e),
    }
}

fn send_packet(channel: &HidChannel, data: Packet, actions: &mut Actions) {
    let Some(cid) = channel.cid.filter(|_| channel.is_connected()) else {
        warn!("[HID] Channel not open, dropping packet");
        return;
    };
    emit(
        actions,
        HidAction::L2capSend {
            cid,
            stream: channel.stream,
            data,
        },
    );
}

fn start_timer(actions: &mut Actions, addr: BluetoothAddress, kind: TimerKind, delay_ms: u32) {
    emit(
        actions,
        HidAction::StartTimer {
            id: TimerId { addr, kind },
            delay_ms,
        },
    );
}

fn cancel_timer(actions: &mut Actions, addr: BluetoothAddress, kind: TimerKind) {
    emit(actions, HidAction::CancelTimer(TimerId { addr, kind }));
}
