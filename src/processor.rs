//! Processor Task - drives the HID profile
//!
//! The processor owns the [`HidProfile`] and is the only code that touches it.
//! It waits for the next message from the inbox or the next timer deadline,
//! whichever comes first, hands the message to the profile and executes the
//! actions that come back:
//!
//! * Transport requests go to the [`HidTransport`]
//! * Timer requests update the [`TimerTable`]
//! * Events are sent to the application through the event channel
//!
//! A transport call that fails straight away is turned into the matching failure
//! confirmation and fed back into the profile before the next inbox message.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hidbird::{hid::HidConfig, processor::{self, HidTransport}};
//!
//! async fn hid_task<T: HidTransport>(transport: &mut T) -> ! {
//!     processor::run(HidConfig::default(), transport).await
//! }
//! ```

use crate::{
    BluetoothAddress, EVENT_CHANNEL, EventChannel, INBOX_CHANNEL,
    constants::{MAX_ACTIONS, MAX_TIMERS},
    hid::{HidAction, HidConfig, HidMessage, HidProfile, TimerId},
    l2cap::{ChannelId, ConnectionResult, DisconnectReason, ProtocolServiceMultiplexer, SignalingId, cid},
    stream::{Sink, StreamId, write_packet},
};
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use heapless::{Deque, Vec};

/// Connection-oriented transport the profile runs over
///
/// Calls only start an operation. The outcome comes back later as a
/// [`HidMessage`] delivered with [`crate::api::deliver`]. An `Err` means the
/// operation could not even be started.
#[allow(async_fn_in_trait)]
pub trait HidTransport {
    /// Error returned when an operation cannot be started
    type Error;
    /// Write side of a channel
    type Sink: Sink;

    /// Register a PSM for incoming connections
    ///
    /// # Errors
    /// Returns `Self::Error` if the request could not be issued
    async fn register_psm(&mut self, psm: ProtocolServiceMultiplexer) -> Result<(), Self::Error>;

    /// Register an SDP service record
    ///
    /// # Errors
    /// Returns `Self::Error` if the request could not be issued
    async fn register_service_record(&mut self, record: &'static [u8]) -> Result<(), Self::Error>;

    /// Open a channel to `addr` on `psm`
    ///
    /// # Errors
    /// Returns `Self::Error` if the request could not be issued
    async fn connect(
        &mut self,
        addr: BluetoothAddress,
        psm: ProtocolServiceMultiplexer,
    ) -> Result<(), Self::Error>;

    /// Answer a connect indication
    ///
    /// # Errors
    /// Returns `Self::Error` if the response could not be sent
    async fn connect_response(
        &mut self,
        addr: BluetoothAddress,
        cid: ChannelId,
        identifier: SignalingId,
        result: ConnectionResult,
    ) -> Result<(), Self::Error>;

    /// Close a channel
    ///
    /// # Errors
    /// Returns `Self::Error` if the request could not be issued
    async fn disconnect(&mut self, cid: ChannelId) -> Result<(), Self::Error>;

    /// Sink for a stream handed out in a connect confirmation
    fn sink(&mut self, stream: StreamId) -> Option<&mut Self::Sink>;
}

/// Armed timers and their deadlines
#[derive(Debug, Default)]
pub struct TimerTable {
    entries: Vec<(TimerId, Instant), MAX_TIMERS>,
}

impl TimerTable {
    /// Create an empty table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Arm `id` for `deadline`, replacing an earlier deadline for the same id
    ///
    /// Returns `false` if the table is full.
    pub fn schedule(&mut self, id: TimerId, deadline: Instant) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(armed, _)| *armed == id) {
            entry.1 = deadline;
            return true;
        }
        self.entries.push((id, deadline)).is_ok()
    }

    /// Disarm `id`; returns `true` if it was armed
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.entries.iter().position(|(armed, _)| *armed == id) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Earliest deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, deadline)| *deadline).min()
    }

    /// Remove and return the earliest timer due at `now`
    pub fn take_expired(&mut self, now: Instant) -> Option<TimerId> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .min_by_key(|(_, (_, deadline))| *deadline)
            .map(|(index, _)| index)?;
        Some(self.entries.swap_remove(index).0)
    }

    /// Number of armed timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no timer is armed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Profile, timers and transport driven together
///
/// `clock` is read whenever a timer is armed or expiries are checked, so a
/// deadline counts from the moment its `StartTimer` action runs.
pub struct Processor<'a, T: HidTransport, C: Fn() -> Instant> {
    profile: HidProfile,
    timers: TimerTable,
    transport: &'a mut T,
    events: &'a EventChannel,
    clock: C,
}

impl<'a, T: HidTransport, C: Fn() -> Instant> Processor<'a, T, C> {
    /// Create a processor delivering events to `events`
    pub fn new(
        config: HidConfig,
        transport: &'a mut T,
        events: &'a EventChannel,
        clock: C,
    ) -> Self {
        Self {
            profile: HidProfile::new(config),
            timers: TimerTable::new(),
            transport,
            events,
            clock,
        }
    }

    /// The profile being driven
    #[must_use]
    pub fn profile(&self) -> &HidProfile {
        &self.profile
    }

    /// Armed timers
    #[must_use]
    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    /// Start profile registration
    pub async fn start(&mut self) {
        let actions = self.profile.init();
        let mut feedback = Deque::new();
        for action in actions {
            self.execute(action, &mut feedback).await;
        }
        self.drain(feedback).await;
    }

    /// Handle one message and everything it triggers
    pub async fn dispatch(&mut self, message: HidMessage) {
        let mut backlog = Deque::new();
        // Fresh deque, cannot be full
        let _ = backlog.push_back(message);
        self.drain(backlog).await;
    }

    /// Deliver every due timer
    pub async fn expire_timers(&mut self) {
        while let Some(id) = self.timers.take_expired((self.clock)()) {
            trace!("[PROCESSOR] Timer {} expired", id);
            self.dispatch(HidMessage::Timeout(id)).await;
        }
    }

    async fn drain(&mut self, mut backlog: Deque<HidMessage, MAX_ACTIONS>) {
        while let Some(message) = backlog.pop_front() {
            for action in self.profile.handle(message) {
                self.execute(action, &mut backlog).await;
            }
        }
    }

    async fn execute(&mut self, action: HidAction, feedback: &mut Deque<HidMessage, MAX_ACTIONS>) {
        let failure = match action {
            HidAction::RegisterPsm(psm) => self
                .transport
                .register_psm(psm)
                .await
                .err()
                .map(|_| HidMessage::L2capRegisterCfm {
                    psm,
                    success: false,
                }),
            HidAction::RegisterServiceRecord(record) => self
                .transport
                .register_service_record(record)
                .await
                .err()
                .map(|_| HidMessage::SdpRegisterCfm { success: false }),
            HidAction::L2capConnect { addr, psm } => {
                self.transport
                    .connect(addr, psm)
                    .await
                    .err()
                    .map(|_| HidMessage::L2capConnectCfm {
                        addr,
                        psm,
                        cid: cid::NULL,
                        result: ConnectionResult::Failed,
                        stream: None,
                    })
            }
            HidAction::L2capConnectResponse {
                addr,
                psm: _,
                cid,
                identifier,
                result,
            } => self
                .transport
                .connect_response(addr, cid, identifier, result)
                .await
                .err()
                .filter(|_| result == ConnectionResult::Success)
                .map(|_| HidMessage::L2capDisconnectInd {
                    cid,
                    reason: DisconnectReason::Error,
                }),
            HidAction::L2capDisconnect { cid } => self
                .transport
                .disconnect(cid)
                .await
                .err()
                .map(|_| HidMessage::L2capDisconnectCfm { cid }),
            HidAction::L2capSend { cid, stream, data } => {
                let sink = match stream {
                    Some(stream) => self.transport.sink(stream),
                    None => None,
                };
                match sink {
                    Some(sink) => {
                        if let Err(e) = write_packet(sink, &data) {
                            warn!("[PROCESSOR] Dropping packet on channel {}: {}", cid, e);
                        }
                    }
                    None => warn!("[PROCESSOR] No sink for channel {}", cid),
                }
                None
            }
            HidAction::StartTimer { id, delay_ms } => {
                let deadline = (self.clock)() + Duration::from_millis(u64::from(delay_ms));
                if !self.timers.schedule(id, deadline) {
                    error!("[PROCESSOR] Timer table full, {} not armed", id);
                }
                None
            }
            HidAction::CancelTimer(id) => {
                self.timers.cancel(id);
                None
            }
            HidAction::Event(event) => {
                self.events.send(event).await;
                None
            }
        };

        if let Some(message) = failure {
            warn!("[PROCESSOR] Transport refused a request");
            if feedback.push_back(message).is_err() {
                error!("[PROCESSOR] Feedback queue full, failure dropped");
            }
        }
    }
}

/// Run the HID profile over `transport`
///
/// Registers the profile, then handles inbox messages and timer expiries
/// forever. Events are published on the crate's event channel.
pub async fn run<T: HidTransport>(config: HidConfig, transport: &mut T) -> ! {
    let mut processor = Processor::new(config, transport, &EVENT_CHANNEL, Instant::now);
    processor.start().await;

    let inbox = INBOX_CHANNEL.receiver();
    loop {
        let deadline = processor.timers().next_deadline();
        let timer = async {
            match deadline {
                Some(deadline) => Timer::at(deadline).await,
                None => core::future::pending().await,
            }
        };

        match select(inbox.receive(), timer).await {
            Either::First(message) => processor.dispatch(message).await,
            Either::Second(()) => processor.expire_timers().await,
        }
    }
}
