//! Diagnostics tee.
//!
//! A [`Monitor`] attached to a Connection receives a copy of every frame
//! sent and received plus short event lines. Records are appended to an
//! in-memory sink that a monitoring tool drains with [`Monitor::take`].
//!
//! Record layout (big-endian):
//! ```text
//! ┌──────┬────────────┬────────────┬──────────┬─────────────┐
//! │ kind │ millis u32 │ channel u16│ len u16  │ payload ... │
//! └──────┴────────────┴────────────┴──────────┴─────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use realport::monitor::{Monitor, RecordKind};
//!
//! let start = Instant::now();
//! let mut monitor = Monitor::new(start, 4096);
//! monitor.event(start, 3, "opened");
//! let records = Monitor::parse(&monitor.take()).unwrap();
//! assert_eq!(records[0].kind, RecordKind::Event);
//! assert_eq!(&records[0].payload[..], b"opened");
//! ```

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{RealportError, Result};
use crate::protocol::{get_u16, get_u32};

/// Record header size.
pub const RECORD_HEADER_LEN: usize = 9;

/// Channel field for frames not addressed to a channel.
pub const NO_CHANNEL: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Bytes sent to the PortServer.
    Tx = 1,
    /// Bytes received from the PortServer.
    Rx = 2,
    /// Human-readable text.
    Event = 3,
}

impl RecordKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(RecordKind::Tx),
            2 => Some(RecordKind::Rx),
            3 => Some(RecordKind::Event),
            _ => None,
        }
    }
}

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRecord {
    pub kind: RecordKind,
    /// Milliseconds since the monitor started.
    pub millis: u32,
    pub channel: u16,
    pub payload: Bytes,
}

/// Append-only record sink with a size limit.
#[derive(Debug)]
pub struct Monitor {
    start: Instant,
    buf: BytesMut,
    limit: usize,
    dropped: u64,
}

impl Monitor {
    /// `limit` bounds the bytes held between [`take`](Self::take) calls.
    pub fn new(start: Instant, limit: usize) -> Self {
        Self {
            start,
            buf: BytesMut::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn record(&mut self, kind: RecordKind, now: Instant, channel: u16, payload: &[u8]) {
        let payload = &payload[..payload.len().min(u16::MAX as usize)];
        if self.buf.len() + RECORD_HEADER_LEN + payload.len() > self.limit {
            if self.dropped == 0 {
                warn!(limit = self.limit, "monitor full, dropping records");
            }
            self.dropped += 1;
            return;
        }
        let millis = now.saturating_duration_since(self.start).as_millis();
        self.buf.put_u8(kind as u8);
        self.buf.put_u32(millis.min(u32::MAX as u128) as u32);
        self.buf.put_u16(channel);
        self.buf.put_u16(payload.len() as u16);
        self.buf.put_slice(payload);
    }

    pub fn event(&mut self, now: Instant, channel: u16, text: &str) {
        self.record(RecordKind::Event, now, channel, text.as_bytes());
    }

    /// Hand over everything recorded so far.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Records discarded because the sink was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Split a drained buffer back into records.
    pub fn parse(bytes: &[u8]) -> Result<Vec<MonitorRecord>> {
        let mut records = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let rest = &bytes[offset..];
            if rest.len() < RECORD_HEADER_LEN {
                return Err(RealportError::Protocol("truncated monitor record".to_string()));
            }
            let kind = RecordKind::from_u8(rest[0]).ok_or_else(|| {
                RealportError::Protocol(format!("unknown monitor record kind {}", rest[0]))
            })?;
            let len = get_u16(rest, 7) as usize;
            if rest.len() < RECORD_HEADER_LEN + len {
                return Err(RealportError::Protocol("truncated monitor record".to_string()));
            }
            records.push(MonitorRecord {
                kind,
                millis: get_u32(rest, 1),
                channel: get_u16(rest, 5),
                payload: Bytes::copy_from_slice(&rest[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len]),
            });
            offset += RECORD_HEADER_LEN + len;
        }
        Ok(records)
    }
}
