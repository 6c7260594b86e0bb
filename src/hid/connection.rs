//! HID Connection Instance
//!
//! One [`HidConnection`] exists per remote peer while any of its two channels is
//! being set up, is open, or is being torn down. The profile owns the instances
//! and drives their state; this module only holds the bookkeeping.

use super::{ChannelKind, HidStatus, RequestKind, transaction::ControlTracker};
use crate::{
    BluetoothAddress,
    l2cap::{ChannelId, SignalingId},
    stream::StreamId,
};

/// Overall state of a HID connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidState {
    /// No connection exists
    #[default]
    Idle,
    /// We asked the peer to connect
    ConnectingLocal,
    /// The peer asked us to connect
    ConnectingRemote,
    /// Both channels are open
    Connected,
    /// We are closing the channels
    DisconnectingLocal,
    /// The peer closed a channel; waiting for the rest to go down
    DisconnectingRemote,
    /// Teardown timed out; channels are being force-closed
    DisconnectingFailed,
}

impl HidState {
    /// Returns `true` for both connecting states
    #[must_use]
    pub fn is_connecting(self) -> bool {
        matches!(self, Self::ConnectingLocal | Self::ConnectingRemote)
    }

    /// Returns `true` for all three disconnecting states
    #[must_use]
    pub fn is_disconnecting(self) -> bool {
        matches!(
            self,
            Self::DisconnectingLocal | Self::DisconnectingRemote | Self::DisconnectingFailed
        )
    }
}

/// Sub-state of one L2CAP channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    /// Channel is closed or was never opened
    #[default]
    Disconnected,
    /// Connect requested or indication received, waiting for the confirmation
    Connecting,
    /// Channel is open
    Connected,
    /// Disconnect requested, waiting for the confirmation
    Disconnecting,
}

/// One of the two channels of a HID connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HidChannel {
    /// Current sub-state
    pub state: ChannelState,
    /// Local channel id, once the transport has assigned one
    pub cid: Option<ChannelId>,
    /// Stream used to write SDUs, once the channel is open
    pub stream: Option<StreamId>,
    /// Identifier of an indication we have not answered yet
    pub pending_identifier: Option<SignalingId>,
    /// Close the channel as soon as its connect confirmation arrives
    pub close_on_connect: bool,
}

impl HidChannel {
    /// Create a closed channel
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            cid: None,
            stream: None,
            pending_identifier: None,
            close_on_connect: false,
        }
    }

    /// Check if channel is ready for data transfer
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Check if channel is fully closed
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.state == ChannelState::Disconnected
    }

    /// Mark the channel open on `cid`
    pub fn opened(&mut self, cid: ChannelId, stream: Option<StreamId>) {
        self.state = ChannelState::Connected;
        self.cid = Some(cid);
        self.stream = stream;
        self.pending_identifier = None;
    }

    /// Mark the channel closed, returning the cid it used
    pub fn closed(&mut self) -> Option<ChannelId> {
        let cid = self.cid.take();
        *self = Self::new();
        cid
    }
}

/// State of one peer's control and interrupt channel pair
#[derive(Debug)]
pub struct HidConnection {
    /// Peer address
    pub addr: BluetoothAddress,
    /// Overall state
    pub state: HidState,
    /// Control channel
    pub control: HidChannel,
    /// Interrupt channel
    pub interrupt: HidChannel,
    /// Status reported if the connection never comes up
    pub connect_status: HidStatus,
    /// Status reported once teardown finishes
    pub disconnect_status: HidStatus,
    /// Host-side control request in flight
    pub tracker: ControlTracker,
    /// Peer-side control request the application has not answered
    pub incoming: Option<RequestKind>,
    /// The application asked for the disconnect
    pub disconnect_requested: bool,
    /// Both channels were open at some point
    pub was_connected: bool,
}

impl HidConnection {
    /// Create an instance in `state`
    #[must_use]
    pub fn new(addr: BluetoothAddress, state: HidState) -> Self {
        Self {
            addr,
            state,
            control: HidChannel::new(),
            interrupt: HidChannel::new(),
            connect_status: HidStatus::Failed,
            disconnect_status: HidStatus::Success,
            tracker: ControlTracker::new(),
            incoming: None,
            disconnect_requested: false,
            was_connected: false,
        }
    }

    /// Borrow one channel
    #[must_use]
    pub fn channel(&self, kind: ChannelKind) -> &HidChannel {
        match kind {
            ChannelKind::Control => &self.control,
            ChannelKind::Interrupt => &self.interrupt,
        }
    }

    /// Mutably borrow one channel
    pub fn channel_mut(&mut self, kind: ChannelKind) -> &mut HidChannel {
        match kind {
            ChannelKind::Control => &mut self.control,
            ChannelKind::Interrupt => &mut self.interrupt,
        }
    }

    /// Which channel uses `cid`
    #[must_use]
    pub fn kind_of(&self, cid: ChannelId) -> Option<ChannelKind> {
        if self.control.cid == Some(cid) {
            Some(ChannelKind::Control)
        } else if self.interrupt.cid == Some(cid) {
            Some(ChannelKind::Interrupt)
        } else {
            None
        }
    }

    /// Both channels are open
    #[must_use]
    pub fn both_connected(&self) -> bool {
        self.control.is_connected() && self.interrupt.is_connected()
    }

    /// Both channels are closed
    #[must_use]
    pub fn both_disconnected(&self) -> bool {
        self.control.is_disconnected() && self.interrupt.is_disconnected()
    }

    /// Move to `Connected` if this was the last channel to open
    ///
    /// Returns `true` on the transition.
    pub fn try_complete_connect(&mut self) -> bool {
        if self.state.is_connecting() && self.both_connected() {
            self.state = HidState::Connected;
            self.was_connected = true;
            true
        } else {
            false
        }
    }

    /// Channel ids still registered for this instance
    pub fn cids(&self) -> impl Iterator<Item = ChannelId> {
        self.control.cid.into_iter().chain(self.interrupt.cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: BluetoothAddress = BluetoothAddress::new([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_connected_needs_both_channels() {
        let mut connection = HidConnection::new(PEER, HidState::ConnectingLocal);

        connection.control.opened(0x40, Some(1));
        assert!(!connection.try_complete_connect());
        assert_eq!(connection.state, HidState::ConnectingLocal);

        connection.interrupt.opened(0x41, Some(2));
        assert!(connection.try_complete_connect());
        assert_eq!(connection.state, HidState::Connected);
        assert!(connection.was_connected);
    }

    #[test]
    fn test_disconnecting_never_returns_to_connected() {
        let mut connection = HidConnection::new(PEER, HidState::DisconnectingLocal);
        connection.control.opened(0x40, None);
        connection.interrupt.opened(0x41, None);

        assert!(!connection.try_complete_connect());
        assert_eq!(connection.state, HidState::DisconnectingLocal);
    }

    #[test]
    fn test_channel_lookup() {
        let mut connection = HidConnection::new(PEER, HidState::ConnectingRemote);
        connection.control.cid = Some(0x40);
        connection.interrupt.cid = Some(0x47);

        assert_eq!(connection.kind_of(0x40), Some(ChannelKind::Control));
        assert_eq!(connection.kind_of(0x47), Some(ChannelKind::Interrupt));
        assert_eq!(connection.kind_of(0x48), None);

        let mut cids = connection.cids();
        assert_eq!(cids.next(), Some(0x40));
        assert_eq!(cids.next(), Some(0x47));
        assert_eq!(cids.next(), None);
    }

    #[test]
    fn test_channel_closed_resets() {
        let mut channel = HidChannel::new();
        channel.pending_identifier = Some(3);
        channel.opened(0x40, Some(9));
        assert!(channel.is_connected());
        assert_eq!(channel.pending_identifier, None);

        channel.close_on_connect = true;
        assert_eq!(channel.closed(), Some(0x40));
        assert_eq!(channel, HidChannel::new());
        assert!(channel.is_disconnected());
    }

    #[test]
    fn test_state_classification() {
        assert!(HidState::ConnectingLocal.is_connecting());
        assert!(HidState::ConnectingRemote.is_connecting());
        assert!(!HidState::Connected.is_connecting());
        assert!(HidState::DisconnectingFailed.is_disconnecting());
        assert!(!HidState::Idle.is_disconnecting());
    }
}
