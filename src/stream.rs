//! Byte Streams
//!
//! Channels exchange data with the transport through two small traits. A
//! [`Sink`] is written by reserving space with [`Sink::claim`] and publishing it
//! with [`Sink::commit`]; a [`Source`] is read by looking at [`Source::map`] and
//! dropping what was consumed with [`Source::release`]. Both keep packet
//! boundaries so one commit comes out as one packet on the other side.

use crate::hid::Packet;
use heapless::Deque;

/// Handle naming a stream owned by the transport
pub type StreamId = u16;

/// Most packets a [`BufferedStream`] keeps boundaries for
pub const MAX_STREAM_PACKETS: usize = 8;

/// Stream errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamError {
    /// Not enough slack for the claim
    InsufficientSpace,
    /// Commit is larger than the outstanding claim
    InvalidCommit,
    /// Too many packets queued
    TooManyPackets,
    /// Next packet does not fit a HIDP packet buffer
    PacketTooLarge,
}

impl core::fmt::Display for StreamError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InsufficientSpace => write!(f, "Insufficient space in stream"),
            Self::InvalidCommit => write!(f, "Commit exceeds claimed space"),
            Self::TooManyPackets => write!(f, "Too many packets queued in stream"),
            Self::PacketTooLarge => write!(f, "Packet exceeds buffer capacity"),
        }
    }
}

/// Write side of a stream
pub trait Sink {
    /// Bytes that can still be claimed
    fn slack(&self) -> usize;

    /// Reserve `len` bytes at the end of the stream
    ///
    /// A second claim before [`Sink::commit`] replaces the first.
    ///
    /// # Errors
    /// Returns `StreamError` if the space (or a packet slot) is not available
    fn claim(&mut self, len: usize) -> Result<&mut [u8], StreamError>;

    /// Publish the first `len` claimed bytes as one packet
    ///
    /// # Errors
    /// Returns `StreamError::InvalidCommit` if `len` exceeds the claim
    fn commit(&mut self, len: usize) -> Result<(), StreamError>;
}

/// Read side of a stream
pub trait Source {
    /// Bytes available
    fn size(&self) -> usize;

    /// Length of the next packet, 0 if none
    fn boundary(&self) -> usize;

    /// All available bytes
    fn map(&self) -> &[u8];

    /// Drop `len` bytes from the front
    fn release(&mut self, len: usize);
}

/// In-memory stream implementing both [`Sink`] and [`Source`]
#[derive(Debug)]
pub struct BufferedStream<const N: usize> {
    buffer: [u8; N],
    len: usize,
    claimed: usize,
    packets: Deque<usize, MAX_STREAM_PACKETS>,
}

impl<const N: usize> BufferedStream<N> {
    /// Create an empty stream
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            len: 0,
            claimed: 0,
            packets: Deque::new(),
        }
    }
}

impl<const N: usize> Default for BufferedStream<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Sink for BufferedStream<N> {
    fn slack(&self) -> usize {
        N - self.len
    }

    fn claim(&mut self, len: usize) -> Result<&mut [u8], StreamError> {
        if len > self.slack() {
            return Err(StreamError::InsufficientSpace);
        }
        if self.packets.is_full() {
            return Err(StreamError::TooManyPackets);
        }

        self.claimed = len;
        Ok(&mut self.buffer[self.len..self.len + len])
    }

    fn commit(&mut self, len: usize) -> Result<(), StreamError> {
        if len > self.claimed {
            return Err(StreamError::InvalidCommit);
        }
        self.claimed = 0;
        if len == 0 {
            return Ok(());
        }

        self.packets
            .push_back(len)
            .map_err(|_| StreamError::TooManyPackets)?;
        self.len += len;
        Ok(())
    }
}

impl<const N: usize> Source for BufferedStream<N> {
    fn size(&self) -> usize {
        self.len
    }

    fn boundary(&self) -> usize {
        self.packets.front().copied().unwrap_or(0)
    }

    fn map(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    fn release(&mut self, len: usize) {
        let len = len.min(self.len);
        self.buffer.copy_within(len..self.len, 0);
        self.len -= len;

        let mut remaining = len;
        while remaining > 0 {
            let Some(front) = self.packets.front_mut() else {
                break;
            };
            if *front <= remaining {
                remaining -= *front;
                self.packets.pop_front();
            } else {
                *front -= remaining;
                remaining = 0;
            }
        }
    }
}

/// Write `bytes` to `sink` as one packet
///
/// # Errors
/// Returns `StreamError` if the sink cannot take the whole packet
pub fn write_packet<S: Sink + ?Sized>(sink: &mut S, bytes: &[u8]) -> Result<(), StreamError> {
    let space = sink.claim(bytes.len())?;
    space.copy_from_slice(bytes);
    sink.commit(bytes.len())
}

/// Take the next packet out of `source`
///
/// Returns `Ok(None)` when no packet is waiting.
///
/// # Errors
/// Returns `StreamError::PacketTooLarge` if the packet does not fit a
/// [`Packet`]; the packet is dropped from the source
pub fn read_packet<S: Source + ?Sized>(source: &mut S) -> Result<Option<Packet>, StreamError> {
    let len = source.boundary();
    if len == 0 {
        return Ok(None);
    }

    let packet = Packet::from_slice(&source.map()[..len]);
    source.release(len);
    packet.map(Some).map_err(|()| StreamError::PacketTooLarge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_commit() {
        let mut stream = BufferedStream::<16>::new();
        assert_eq!(stream.slack(), 16);

        let space = stream.claim(4).unwrap();
        space.copy_from_slice(&[1, 2, 3, 4]);
        // Uncommitted bytes are not visible
        assert_eq!(stream.size(), 0);

        stream.commit(3).unwrap();
        assert_eq!(stream.size(), 3);
        assert_eq!(stream.slack(), 13);
        assert_eq!(stream.map(), &[1, 2, 3]);
        assert_eq!(stream.boundary(), 3);
    }

    #[test]
    fn test_claim_limits() {
        let mut stream = BufferedStream::<4>::new();
        assert_eq!(stream.claim(5), Err(StreamError::InsufficientSpace));

        stream.claim(2).unwrap();
        assert_eq!(stream.commit(3), Err(StreamError::InvalidCommit));
    }

    #[test]
    fn test_packet_boundaries() {
        let mut stream = BufferedStream::<32>::new();
        write_packet(&mut stream, &[0xA1, 0x01]).unwrap();
        write_packet(&mut stream, &[0x00]).unwrap();
        assert_eq!(stream.size(), 3);
        assert_eq!(stream.boundary(), 2);

        let first = read_packet(&mut stream).unwrap().unwrap();
        assert_eq!(first.as_slice(), &[0xA1, 0x01]);
        assert_eq!(stream.boundary(), 1);

        let second = read_packet(&mut stream).unwrap().unwrap();
        assert_eq!(second.as_slice(), &[0x00]);
        assert_eq!(read_packet(&mut stream), Ok(None));
        assert_eq!(stream.slack(), 32);
    }

    #[test]
    fn test_partial_release() {
        let mut stream = BufferedStream::<16>::new();
        write_packet(&mut stream, &[1, 2, 3, 4]).unwrap();
        write_packet(&mut stream, &[5, 6]).unwrap();

        stream.release(3);
        assert_eq!(stream.map(), &[4, 5, 6]);
        assert_eq!(stream.boundary(), 1);

        stream.release(10);
        assert_eq!(stream.size(), 0);
        assert_eq!(stream.boundary(), 0);
    }

    #[test]
    fn test_packet_slots_exhausted() {
        let mut stream = BufferedStream::<64>::new();
        for i in 0..MAX_STREAM_PACKETS {
            write_packet(&mut stream, &[i as u8]).unwrap();
        }
        assert_eq!(
            write_packet(&mut stream, &[0xFF]),
            Err(StreamError::TooManyPackets)
        );
    }

    #[test]
    fn test_oversized_packet_is_dropped() {
        let mut stream = BufferedStream::<128>::new();
        write_packet(&mut stream, &[0u8; 100]).unwrap();
        write_packet(&mut stream, &[0x13]).unwrap();

        assert_eq!(read_packet(&mut stream), Err(StreamError::PacketTooLarge));
        let next = read_packet(&mut stream).unwrap().unwrap();
        assert_eq!(next.as_slice(), &[0x13]);
    }
}
