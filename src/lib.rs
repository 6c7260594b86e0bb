#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

// Must come first so the logging macros are visible in every module
mod fmt;

mod address;
pub mod api;
pub mod constants;
pub mod hid;
pub mod l2cap;
pub mod processor;
pub mod serial;
pub mod stream;

#[cfg(test)]
use critical_section as _;

use crate::constants::CHANNEL_DEPTH;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};

pub use address::BluetoothAddress;
pub use hid::{HidConfig, HidEvent, HidMessage, HidStatus};
pub use processor::HidTransport;

/// Channel carrying requests and transport messages to the processor
pub type InboxChannel = Channel<CriticalSectionRawMutex, HidMessage, CHANNEL_DEPTH>;

/// Channel carrying events from the processor to the application
pub type EventChannel = Channel<CriticalSectionRawMutex, HidEvent, CHANNEL_DEPTH>;

pub(crate) static INBOX_CHANNEL: InboxChannel = Channel::new();

pub(crate) static EVENT_CHANNEL: EventChannel = Channel::new();

/// Errors returned by the API before a request reaches the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidError {
    /// Invalid parameter provided (e.g., malformed address)
    InvalidParameter,
    /// The all-zero address was given for a peer
    InvalidAddress,
    /// Report does not fit the report buffer
    PayloadTooLarge,
    /// The inbox is full
    QueueFull,
}

impl core::fmt::Display for HidError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "Invalid parameter"),
            Self::InvalidAddress => write!(f, "Invalid peer address"),
            Self::PayloadTooLarge => write!(f, "Report too large"),
            Self::QueueFull => write!(f, "Inbox full"),
        }
    }
}
