//! Window accounting and sync points.
//!
//! Positions are running 16-bit byte counts. Differences are taken modulo
//! 2^16, so a window can never exceed half that space.
//!
//! ```text
//!   transmit:  received_pos ──── in flight ────► transmitted_pos
//!              └──────────── server_window ─────────────┘
//!   credit = received_pos + server_window − transmitted_pos
//!
//!   receive:   consumed_pos ── buffered ──► rx_pos ── free ──► rwin
//!   rwin = consumed_pos + capacity
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use crate::error::{RealportError, Result};

/// Our transmit side of one channel.
#[derive(Debug, Clone, Default)]
pub struct TxWindow {
    /// Bytes we have put on the wire.
    transmitted_pos: u16,
    /// Bytes the PortServer reports having taken.
    received_pos: u16,
    /// Space the PortServer has beyond `received_pos`.
    server_window: u16,
}

impl TxWindow {
    pub fn new(server_window: u16) -> Self {
        Self {
            transmitted_pos: 0,
            received_pos: 0,
            server_window,
        }
    }

    /// Bytes sent but not yet taken by the PortServer.
    #[inline]
    pub fn in_flight(&self) -> u16 {
        self.transmitted_pos.wrapping_sub(self.received_pos)
    }

    /// Bytes we may still send.
    #[inline]
    pub fn credit(&self) -> usize {
        let in_flight = self.in_flight();
        self.server_window.saturating_sub(in_flight) as usize
    }

    pub fn transmitted_pos(&self) -> u16 {
        self.transmitted_pos
    }

    pub fn received_pos(&self) -> u16 {
        self.received_pos
    }

    pub fn server_window(&self) -> u16 {
        self.server_window
    }

    /// Account for `n` bytes sent. Callers never exceed [`credit`](Self::credit).
    pub fn record_sent(&mut self, n: usize) {
        debug_assert!(n <= self.credit());
        self.transmitted_pos = self.transmitted_pos.wrapping_add(n as u16);
    }

    /// Apply a window report from the PortServer.
    ///
    /// # Errors
    ///
    /// A report acknowledging bytes never sent means the two sides disagree.
    pub fn update(&mut self, channel: u16, rpos: u16, window: u16) -> Result<()> {
        let advance = rpos.wrapping_sub(self.received_pos);
        if advance > self.in_flight() {
            return Err(RealportError::Protocol(format!(
                "channel {channel} acknowledged {advance} bytes with {} in flight",
                self.in_flight()
            )));
        }
        if window > u16::MAX / 2 {
            return Err(RealportError::Protocol(format!(
                "channel {channel} window {window} exceeds half the sequence space"
            )));
        }
        self.received_pos = rpos;
        self.server_window = window;
        Ok(())
    }
}

/// Our receive side of one channel.
#[derive(Debug, Clone)]
pub struct RxWindow {
    /// Bytes received from the PortServer.
    rx_pos: u16,
    /// Bytes handed on to the tty glue (or flushed).
    consumed_pos: u16,
    /// Last `rwin` sent.
    advertised: u16,
    capacity: u16,
    /// Minimum advance that triggers a fresh advertisement.
    update_step: u16,
}

impl RxWindow {
    /// `capacity` is the local receive ring size.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize / 2) as u16;
        Self {
            rx_pos: 0,
            consumed_pos: 0,
            advertised: 0,
            capacity,
            update_step: (capacity / 4).max(1),
        }
    }

    /// Bytes the PortServer may still send.
    #[inline]
    pub fn available(&self) -> u16 {
        self.advertised.wrapping_sub(self.rx_pos)
    }

    pub fn rx_pos(&self) -> u16 {
        self.rx_pos
    }

    pub fn advertised(&self) -> u16 {
        self.advertised
    }

    pub fn update_step(&self) -> u16 {
        self.update_step
    }

    /// Check and account for an inbound data frame.
    ///
    /// # Errors
    ///
    /// `WindowOverrun` if the frame exceeds the advertised window.
    pub fn accept(&mut self, channel: u16, len: usize) -> Result<()> {
        let window = self.available();
        if len > window as usize {
            return Err(RealportError::WindowOverrun {
                channel,
                len,
                window,
            });
        }
        self.rx_pos = self.rx_pos.wrapping_add(len as u16);
        Ok(())
    }

    /// Record `n` bytes leaving the receive buffer.
    pub fn consume(&mut self, n: usize) {
        self.consumed_pos = self.consumed_pos.wrapping_add(n as u16);
    }

    /// Window value to advertise, if it moved far enough since the last one.
    pub fn pending_update(&self) -> Option<u16> {
        let target = self.consumed_pos.wrapping_add(self.capacity);
        let advance = target.wrapping_sub(self.advertised);
        (advance >= self.update_step && advance <= self.capacity).then_some(target)
    }

    /// Window value for the first advertisement after open.
    pub fn initial(&self) -> u16 {
        self.consumed_pos.wrapping_add(self.capacity)
    }

    pub fn mark_advertised(&mut self, rwin: u16) {
        self.advertised = rwin;
    }
}

/// Why a sync point was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPurpose {
    /// Delay sample for the rate pacer.
    Pacing,
    /// Part of the open-time query set for a channel.
    Query(u16),
    /// A caller waiting for everything up to `ticket` to reach the PortServer.
    RoundTrip { channel: u16, ticket: u64 },
}

/// An outstanding sequence request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPoint {
    pub seq: u8,
    pub sent_at: Instant,
    /// Bytes in the encode batch that carried the request.
    pub size: usize,
    pub purpose: SyncPurpose,
}

/// Bounded FIFO of outstanding sync points.
#[derive(Debug, Clone)]
pub struct SyncRing {
    entries: VecDeque<SyncPoint>,
    capacity: usize,
    next_seq: u8,
}

impl SyncRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<&SyncPoint> {
        self.entries.front()
    }

    /// Allocate the next sequence number, or `None` when the ring is full.
    pub fn push(&mut self, now: Instant, size: usize, purpose: SyncPurpose) -> Option<u8> {
        if self.is_full() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.push_back(SyncPoint {
            seq,
            sent_at: now,
            size,
            purpose,
        });
        Some(seq)
    }

    /// Next sequence number [`push`](Self::push) would hand out.
    pub fn peek_next(&self) -> Option<u8> {
        (!self.is_full()).then_some(self.next_seq)
    }

    /// Record the size of the batch that carried `seq` once it is complete.
    pub fn set_size(&mut self, seq: u8, size: usize) {
        if let Some(point) = self.entries.iter_mut().rev().find(|p| p.seq == seq) {
            point.size = size;
        }
    }

    /// Retire every entry up to and including `seq`.
    ///
    /// Returns `None` if `seq` is not outstanding.
    pub fn acknowledge(&mut self, seq: u8) -> Option<Vec<SyncPoint>> {
        let pos = self.entries.iter().position(|p| p.seq == seq)?;
        Some(self.entries.drain(..=pos).collect())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
