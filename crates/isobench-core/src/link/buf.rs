//! Bounded payload buffer pool
//!
//! Buffers circulate through a lock-free crossbeam channel: acquiring pops a
//! buffer, dropping a [`PayloadBuf`] pushes it back. The transport may hold a
//! buffer for as long as the send is in flight, so exhaustion is an expected,
//! recoverable condition.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// Size of the sequence counter at the start of every payload
pub const SEQUENCE_LEN: usize = std::mem::size_of::<u32>();

/// Returned when every buffer is in flight
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Payload buffer pool exhausted ({capacity} in flight)")]
pub struct PoolExhausted {
    pub capacity: usize,
}

/// Fixed set of reusable payload buffers
#[derive(Clone)]
pub struct PayloadPool {
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    capacity: usize,
}

impl PayloadPool {
    /// Create a pool of `capacity` buffers, each pre-sized for `buf_size` bytes
    pub fn new(capacity: usize, buf_size: usize) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = bounded(capacity);
        for _ in 0..capacity {
            let _ = free_tx.try_send(Vec::with_capacity(buf_size));
        }
        Self {
            free_tx,
            free_rx,
            capacity,
        }
    }

    /// Take a buffer without blocking
    pub fn try_acquire(&self) -> Result<PayloadBuf, PoolExhausted> {
        match self.free_rx.try_recv() {
            Ok(mut data) => {
                data.clear();
                Ok(PayloadBuf {
                    data,
                    home: self.free_tx.clone(),
                })
            }
            Err(_) => Err(PoolExhausted {
                capacity: self.capacity,
            }),
        }
    }

    /// Buffers currently free
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Total buffers owned by the pool
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for PayloadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadPool")
            .field("available", &self.available())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A buffer on loan from a [`PayloadPool`]; returns itself on drop
pub struct PayloadBuf {
    data: Vec<u8>,
    home: Sender<Vec<u8>>,
}

impl PayloadBuf {
    /// Fill with the transmit pattern
    ///
    /// Layout: little-endian `seq` in the first four bytes, then byte `i`
    /// holds `i as u8`. Lengths below four carry a truncated counter.
    pub fn fill_pattern(&mut self, seq: u32, len: usize) {
        self.data.clear();
        self.data.extend_from_slice(&seq.to_le_bytes());
        self.data.extend((SEQUENCE_LEN..len).map(|i| i as u8));
        self.data.truncate(len);
    }

    /// Sequence counter embedded at the start of the payload
    pub fn sequence(&self) -> Option<u32> {
        let head: [u8; SEQUENCE_LEN] = self.data.get(..SEQUENCE_LEN)?.try_into().ok()?;
        Some(u32::from_le_bytes(head))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Deref for PayloadBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for PayloadBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadBuf")
            .field("len", &self.data.len())
            .field("sequence", &self.sequence())
            .finish()
    }
}

impl Drop for PayloadBuf {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        let _ = self.home.try_send(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let pool = PayloadPool::new(2, 16);
        assert_eq!(pool.available(), 2);

        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.try_acquire().unwrap_err(), PoolExhausted { capacity: 2 });

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pool = PayloadPool::new(0, 8);
        assert_eq!(pool.capacity(), 1);
        assert!(pool.try_acquire().is_ok());
    }

    #[test]
    fn test_fill_pattern_layout() {
        let pool = PayloadPool::new(1, 8);
        let mut buf = pool.try_acquire().unwrap();
        buf.fill_pattern(0x0403_0201, 8);

        assert_eq!(buf.as_slice(), &[0x01, 0x02, 0x03, 0x04, 4, 5, 6, 7]);
        assert_eq!(buf.sequence(), Some(0x0403_0201));
    }

    #[test]
    fn test_fill_pattern_minimum_size() {
        let pool = PayloadPool::new(1, 4);
        let mut buf = pool.try_acquire().unwrap();
        buf.fill_pattern(7, SEQUENCE_LEN);
        assert_eq!(buf.len(), SEQUENCE_LEN);
        assert_eq!(buf.sequence(), Some(7));
    }

    #[test]
    fn test_reused_buffer_is_cleared() {
        let pool = PayloadPool::new(1, 32);
        {
            let mut buf = pool.try_acquire().unwrap();
            buf.fill_pattern(1, 32);
        }
        let buf = pool.try_acquire().unwrap();
        assert!(buf.is_empty());
    }
}
