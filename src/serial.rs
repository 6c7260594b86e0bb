//! Serial Character Queue
//!
//! Byte queues between a UART interrupt handler and a task. The interrupt side
//! never blocks: [`SerialQueue::on_rx`] drops a byte when the receive queue is
//! full and [`SerialQueue::next_tx`] returns `None` when there is nothing to
//! send. The task side waits up to the configured timeout.

use crate::constants::{SERIAL_RX_DEPTH, SERIAL_TX_DEPTH, SERIAL_WAIT_MS};
use embassy_sync::{
    blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex},
    channel::Channel,
};
use embassy_time::{Duration, with_timeout};

/// Serial queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialError {
    /// Nothing arrived (or no room appeared) within the wait time
    Timeout,
    /// Queue is full
    Overflow,
}

impl core::fmt::Display for SerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Serial wait timed out"),
            Self::Overflow => write!(f, "Serial queue overflow"),
        }
    }
}

/// Fixed-depth transmit and receive byte queues
pub struct SerialQueue<M: RawMutex, const TX: usize, const RX: usize> {
    tx: Channel<M, u8, TX>,
    rx: Channel<M, u8, RX>,
    timeout: Duration,
}

/// Queue with the default depths, shareable with interrupt handlers
pub type DefaultSerialQueue = SerialQueue<CriticalSectionRawMutex, SERIAL_TX_DEPTH, SERIAL_RX_DEPTH>;

impl<M: RawMutex, const TX: usize, const RX: usize> SerialQueue<M, TX, RX> {
    /// Create empty queues; task-side calls wait at most `timeout`
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            tx: Channel::new(),
            rx: Channel::new(),
            timeout,
        }
    }

    /// Create empty queues with the default wait
    #[must_use]
    pub const fn with_default_timeout() -> Self {
        Self::new(Duration::from_millis(SERIAL_WAIT_MS))
    }

    /// Wait for a received byte
    ///
    /// # Errors
    /// Returns `SerialError::Timeout` if nothing arrives in time
    pub async fn get(&self) -> Result<u8, SerialError> {
        with_timeout(self.timeout, self.rx.receive())
            .await
            .map_err(|_| SerialError::Timeout)
    }

    /// Queue a byte for transmission, waiting for room
    ///
    /// # Errors
    /// Returns `SerialError::Timeout` if the transmit queue stays full
    pub async fn put(&self, byte: u8) -> Result<(), SerialError> {
        with_timeout(self.timeout, self.tx.send(byte))
            .await
            .map_err(|_| SerialError::Timeout)
    }

    /// Queue all of `bytes` for transmission
    ///
    /// # Errors
    /// Returns `SerialError::Timeout` if room does not appear for one of the
    /// bytes; earlier bytes stay queued
    pub async fn write(&self, bytes: &[u8]) -> Result<(), SerialError> {
        for &byte in bytes {
            self.put(byte).await?;
        }
        Ok(())
    }

    /// Wait for at least one byte, then take what is available into `buf`
    ///
    /// Returns the number of bytes read.
    ///
    /// # Errors
    /// Returns `SerialError::Timeout` if nothing arrives in time
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let Some((first, rest)) = buf.split_first_mut() else {
            return Ok(0);
        };
        *first = self.get().await?;

        let mut count = 1;
        for slot in rest {
            match self.try_get() {
                Some(byte) => {
                    *slot = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Take a received byte if one is waiting
    pub fn try_get(&self) -> Option<u8> {
        self.rx.try_receive().ok()
    }

    /// Queue a byte for transmission without waiting
    ///
    /// # Errors
    /// Returns `SerialError::Overflow` if the transmit queue is full
    pub fn try_put(&self, byte: u8) -> Result<(), SerialError> {
        self.tx.try_send(byte).map_err(|_| SerialError::Overflow)
    }

    /// Store a byte received by the UART, called from the interrupt handler
    ///
    /// # Errors
    /// Returns `SerialError::Overflow` if the receive queue is full; the byte
    /// is dropped
    pub fn on_rx(&self, byte: u8) -> Result<(), SerialError> {
        self.rx.try_send(byte).map_err(|_| {
            warn!("[SERIAL] Receive queue full, dropping byte");
            SerialError::Overflow
        })
    }

    /// Next byte for the UART to send, called from the interrupt handler
    pub fn next_tx(&self) -> Option<u8> {
        self.tx.try_receive().ok()
    }

    /// Bytes waiting to be read by the task
    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// Bytes waiting to be sent by the UART
    pub fn tx_len(&self) -> usize {
        self.tx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    type TestQueue = SerialQueue<NoopRawMutex, 4, 4>;

    #[test]
    fn test_rx_fifo_order() {
        let queue = TestQueue::with_default_timeout();
        queue.on_rx(b'h').unwrap();
        queue.on_rx(b'i').unwrap();
        assert_eq!(queue.rx_len(), 2);

        assert_eq!(queue.try_get(), Some(b'h'));
        assert_eq!(queue.try_get(), Some(b'i'));
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn test_rx_overflow_drops_byte() {
        let queue = TestQueue::with_default_timeout();
        for byte in 0..4 {
            queue.on_rx(byte).unwrap();
        }
        assert_eq!(queue.on_rx(4), Err(SerialError::Overflow));

        let mut received = [0u8; 8];
        let mut count = 0;
        while let Some(byte) = queue.try_get() {
            received[count] = byte;
            count += 1;
        }
        assert_eq!(&received[..count], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_tx_drained_by_interrupt() {
        let queue = TestQueue::with_default_timeout();
        queue.try_put(0x55).unwrap();
        queue.try_put(0xAA).unwrap();
        assert_eq!(queue.tx_len(), 2);

        assert_eq!(queue.next_tx(), Some(0x55));
        assert_eq!(queue.next_tx(), Some(0xAA));
        assert_eq!(queue.next_tx(), None);
    }

    #[test]
    fn test_tx_overflow() {
        let queue = TestQueue::with_default_timeout();
        for byte in 0..4 {
            queue.try_put(byte).unwrap();
        }
        assert_eq!(queue.try_put(4), Err(SerialError::Overflow));
        assert_eq!(queue.next_tx(), Some(0));
        assert!(queue.try_put(4).is_ok());
    }

    fn short_wait() -> TestQueue {
        TestQueue::new(Duration::from_millis(20))
    }

    #[test]
    fn test_get_waits_then_times_out() {
        let queue = short_wait();
        assert_eq!(block_on(queue.get()), Err(SerialError::Timeout));

        queue.on_rx(0x42).unwrap();
        assert_eq!(block_on(queue.get()), Ok(0x42));
    }

    #[test]
    fn test_put_times_out_on_full_queue() {
        let queue = short_wait();
        for byte in 0..4 {
            block_on(queue.put(byte)).unwrap();
        }
        assert_eq!(block_on(queue.put(4)), Err(SerialError::Timeout));
        assert_eq!(queue.tx_len(), 4);
    }

    #[test]
    fn test_write_keeps_bytes_queued_before_timeout() {
        let queue = short_wait();
        queue.try_put(b'a').unwrap();
        queue.try_put(b'b').unwrap();

        assert_eq!(block_on(queue.write(b"cdef")), Err(SerialError::Timeout));
        assert_eq!(queue.tx_len(), 4);
        assert_eq!(queue.next_tx(), Some(b'a'));
        assert_eq!(queue.next_tx(), Some(b'b'));
        assert_eq!(queue.next_tx(), Some(b'c'));
        assert_eq!(queue.next_tx(), Some(b'd'));

        assert_eq!(block_on(queue.write(b"xy")), Ok(()));
        assert_eq!(queue.tx_len(), 2);
    }

    #[test]
    fn test_read_drains_available_bytes() {
        let queue = short_wait();
        let mut buf = [0u8; 8];
        assert_eq!(block_on(queue.read(&mut buf)), Err(SerialError::Timeout));

        queue.on_rx(1).unwrap();
        queue.on_rx(2).unwrap();
        queue.on_rx(3).unwrap();
        assert_eq!(block_on(queue.read(&mut buf)), Ok(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(queue.rx_len(), 0);

        queue.on_rx(4).unwrap();
        queue.on_rx(5).unwrap();
        let mut small = [0u8; 1];
        assert_eq!(block_on(queue.read(&mut small)), Ok(1));
        assert_eq!(small, [4]);
        assert_eq!(queue.try_get(), Some(5));
        assert_eq!(block_on(queue.read(&mut [])), Ok(0));
    }
}
