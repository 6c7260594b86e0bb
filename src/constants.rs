//! `HidBird` Constants
//!
//! This module contains all the constants used throughout the `HidBird` library.
//! These constants define capacity limits, default timeouts, and HID-specific
//! protocol parameters used in the implementation.

/// Maximum number of simultaneous HID connections (power of two, used as map capacity)
pub const MAX_CONNECTIONS: usize = 4;

/// Maximum number of open L2CAP channels tracked by the profile (two per connection)
pub const MAX_OPEN_CHANNELS: usize = MAX_CONNECTIONS * 2;

/// Depth of the inbox and event channels between tasks
pub const CHANNEL_DEPTH: usize = 8;

/// Maximum number of actions a single message may produce
pub const MAX_ACTIONS: usize = 16;

/// Maximum number of concurrently armed timers (connect, disconnect and request per connection)
pub const MAX_TIMERS: usize = MAX_CONNECTIONS * 3;

/// Maximum HID report payload carried in one transaction
pub const MAX_REPORT_SIZE: usize = 64;

/// Maximum encoded HIDP packet (header, report id, size field and report payload)
pub const MAX_PACKET_SIZE: usize = MAX_REPORT_SIZE + 4;

/// Default time allowed for both channels of a connection to come up
pub const DEFAULT_CONNECT_TIMEOUT_MS: u32 = 30_000;

/// Default time the peer is given to close its remaining channel
pub const DEFAULT_DISCONNECT_TIMEOUT_MS: u32 = 5_000;

/// Default time allowed for the peer to answer a control-channel request
pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 5_000;

/// Default serial transmit queue depth in bytes
pub const SERIAL_TX_DEPTH: usize = 128;

/// Default serial receive queue depth in bytes
pub const SERIAL_RX_DEPTH: usize = 128;

/// Default blocking wait for serial get/put calls
pub const SERIAL_WAIT_MS: u64 = 10;

/// `BD_ADDR` length in bytes
pub const BD_ADDR_LENGTH: usize = 6;
