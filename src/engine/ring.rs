//! Fixed-capacity byte ring.
//!
//! Capacity is a power of two so positions wrap with a mask. Head and tail
//! are free-running counters; `tail - head` is the fill level.

use crate::error::{RealportError, Result};

/// Circular byte buffer owned by one channel direction.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    mask: usize,
    /// Total bytes ever popped.
    head: usize,
    /// Total bytes ever pushed.
    tail: usize,
}

impl RingBuffer {
    /// Allocate a ring of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `capacity` is not a power of two, `Alloc` if the
    /// allocation fails.
    pub fn new(capacity: usize) -> Result<Self> {
        if !capacity.is_power_of_two() {
            return Err(RealportError::InvalidConfig(format!(
                "ring capacity {capacity} is not a power of two"
            )));
        }
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| RealportError::Alloc(capacity))?;
        storage.resize(capacity, 0);

        Ok(Self {
            buf: storage.into_boxed_slice(),
            mask: capacity - 1,
            head: 0,
            tail: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn available_for_read(&self) -> usize {
        self.tail.wrapping_sub(self.head)
    }

    #[inline]
    pub fn available_for_write(&self) -> usize {
        self.capacity() - self.available_for_read()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Copy as much of `data` as fits. Returns bytes accepted.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.available_for_write());
        let start = self.tail & self.mask;
        let first = n.min(self.capacity() - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.tail = self.tail.wrapping_add(n);
        n
    }

    /// Copy up to `out.len()` bytes without consuming them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available_for_read());
        let start = self.head & self.mask;
        let first = n.min(self.capacity() - start);
        out[..first].copy_from_slice(&self.buf[start..start + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        n
    }

    /// Discard up to `n` unread bytes. Returns bytes discarded.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.available_for_read());
        self.head = self.head.wrapping_add(n);
        n
    }

    /// Copy out and consume up to `out.len()` bytes.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek(out);
        self.head = self.head.wrapping_add(n);
        n
    }

    /// Drop everything unread.
    pub fn clear(&mut self) -> usize {
        let n = self.available_for_read();
        self.head = self.tail;
        n
    }
}
