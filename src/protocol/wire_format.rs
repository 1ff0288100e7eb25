//! Wire format primitives.
//!
//! Every RealPort frame starts with a single header byte:
//! ```text
//! ┌────────────┬────────────┐
//! │  opcode    │  port      │
//! │  bits 7-4  │  bits 3-0  │
//! └────────────┴────────────┘
//! ```
//!
//! The port nibble addresses one of 16 channels inside the module chosen by
//! the most recent module select (`0xF0 + module`). Opcodes `0x0`-`0x7` are
//! short data frames carrying `opcode + 1` bytes. Opcode `0xE` is connection
//! scoped and uses the low nibble as a sub-op instead of a port.
//!
//! All multi-byte integers are Big Endian.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{RealportError, Result};

/// Longest data header (opcode byte plus 16-bit length).
pub const MAX_HEADER_LEN: usize = 3;

/// Largest data length that fits a 1-byte header.
pub const SHORT_DATA_MAX: usize = 8;

/// Largest data length that fits a 2-byte header.
pub const MEDIUM_DATA_MAX: usize = 255;

/// Channels addressed by one module select.
pub const CHANNELS_PER_MODULE: u16 = 16;

/// Hard upper bound on channels per Connection.
pub const MAX_CHANNELS: u16 = 256;

/// Default maximum data bytes in a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// High-nibble opcodes.
pub mod op {
    /// Data, 1-byte length prefix.
    pub const DATA_MEDIUM: u8 = 0x8;
    /// Data, 2-byte length prefix.
    pub const DATA_LONG: u8 = 0x9;
    /// Receive window (host) / transmit window (server).
    pub const WINDOW: u8 = 0xA;
    /// Open, close and cancel negotiation.
    pub const OPEN: u8 = 0xB;
    /// Per-port command or reply with a sub-op byte.
    pub const PORT: u8 = 0xC;
    /// Parameter set.
    pub const PARAM: u8 = 0xD;
    /// Connection scoped; low nibble is a sub-op.
    pub const CONNECTION: u8 = 0xE;
    /// Module select; low nibble is the module.
    pub const MODULE: u8 = 0xF;
}

/// Low-nibble sub-ops for [`op::CONNECTION`].
pub mod conn_op {
    pub const CAPABILITY_QUERY: u8 = 0x0;
    pub const CHANNEL_COUNT: u8 = 0x1;
    pub const DIAGNOSTIC: u8 = 0xF;
}

/// Sub-op byte following an [`op::PORT`] header.
pub mod port_op {
    pub const SEQUENCE: u8 = 0x01;
    pub const EVENT_MASK: u8 = 0x02;
    pub const STATUS: u8 = 0x03;
    pub const BUFFERS: u8 = 0x04;
    pub const CAPABILITY: u8 = 0x05;
    pub const FLUSH_INPUT: u8 = 0x06;
    pub const FLUSH_OUTPUT: u8 = 0x07;
    pub const PAUSE_INPUT: u8 = 0x08;
    pub const PAUSE_OUTPUT: u8 = 0x09;
    pub const RESUME_INPUT: u8 = 0x0A;
    pub const RESUME_OUTPUT: u8 = 0x0B;
    pub const SEND_BREAK: u8 = 0x0C;
    pub const SEND_IMMEDIATE: u8 = 0x0D;
    pub const EVENT: u8 = 0x10;
}

/// Code byte following an [`op::OPEN`] header.
///
/// Open type occupies the low two bits of open, cancel and response codes.
pub mod open_code {
    pub const OPEN: u8 = 0x00;
    pub const CLOSE_IMMEDIATE: u8 = 0x0A;
    pub const CLOSE_GRACEFUL: u8 = 0x0B;
    pub const CANCEL: u8 = 0x10;

    pub const ACCEPT: u8 = 0x00;
    pub const BUSY: u8 = 0x10;
    pub const FAIL: u8 = 0x20;
    pub const CLOSE_ACK: u8 = 0x30;
    pub const CANCEL_ACK: u8 = 0x40;

    pub const KIND_MASK: u8 = 0xF0;
    pub const TYPE_MASK: u8 = 0x03;
}

/// Modem signal bits shared by status, event and modem-out frames.
pub mod modem {
    pub const DTR: u8 = 0x01;
    pub const RTS: u8 = 0x02;
    pub const CTS: u8 = 0x10;
    pub const DSR: u8 = 0x20;
    pub const RI: u8 = 0x40;
    pub const DCD: u8 = 0x80;
}

/// Event bits reported by [`port_op::EVENT`] and selected by the event mask.
pub mod event {
    pub const MODEM_CHANGE: u8 = 0x01;
    pub const BREAK: u8 = 0x02;
    pub const TX_EMPTY: u8 = 0x04;
    pub const RX_OVERRUN: u8 = 0x08;
    pub const ALL: u8 = MODEM_CHANGE | BREAK | TX_EMPTY | RX_OVERRUN;
}

/// Capability flags reported per port.
pub mod capability {
    pub const DOS_ESCAPES: u8 = 0x01;
    pub const BREAK_DURATION: u8 = 0x02;
}

/// The three ways a channel can be opened on the PortServer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenType {
    /// Open now, fail if the port is in use.
    Immediate,
    /// Queue on the server until the port is free.
    Persistent,
    /// Wait for incoming carrier.
    Incoming,
}

impl OpenType {
    pub const ALL: [OpenType; 3] = [OpenType::Immediate, OpenType::Persistent, OpenType::Incoming];

    /// Wire code in the low bits of open frames.
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            OpenType::Immediate => 0,
            OpenType::Persistent => 1,
            OpenType::Incoming => 2,
        }
    }

    /// Parse from the low bits of an open frame.
    pub fn from_code(code: u8) -> Option<Self> {
        match code & open_code::TYPE_MASK {
            0 => Some(OpenType::Immediate),
            1 => Some(OpenType::Persistent),
            2 => Some(OpenType::Incoming),
            _ => None,
        }
    }

    /// Slot index for per-type arrays.
    #[inline]
    pub fn index(self) -> usize {
        self.code() as usize
    }
}

/// Split a header byte into `(opcode, low nibble)`.
#[inline]
pub fn split_header(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0x0F)
}

/// Build a header byte from opcode and low nibble.
#[inline]
pub fn header_byte(opcode: u8, low: u8) -> u8 {
    (opcode << 4) | (low & 0x0F)
}

/// Module that owns a channel index.
#[inline]
pub fn module_of(channel: u16) -> u8 {
    (channel / CHANNELS_PER_MODULE) as u8
}

/// Port nibble of a channel index.
#[inline]
pub fn port_of(channel: u16) -> u8 {
    (channel % CHANNELS_PER_MODULE) as u8
}

/// Channel index from module and port.
#[inline]
pub fn channel_index(module: u8, port: u8) -> u16 {
    u16::from(module) * CHANNELS_PER_MODULE + u16::from(port & 0x0F)
}

/// Write a big-endian u16 at `offset`.
///
/// # Panics
///
/// Panics if `buf` is shorter than `offset + 2`.
#[inline]
pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

/// Write a big-endian u32 at `offset`.
///
/// # Panics
///
/// Panics if `buf` is shorter than `offset + 4`.
#[inline]
pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Read a big-endian u16 at `offset`. Length is the caller's concern.
#[inline]
pub fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Read a big-endian u32 at `offset`. Length is the caller's concern.
#[inline]
pub fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Header bytes needed for a data frame of `len` bytes.
#[inline]
pub fn data_header_len(len: usize) -> usize {
    if len <= SHORT_DATA_MAX {
        1
    } else if len <= MEDIUM_DATA_MAX {
        2
    } else {
        3
    }
}

/// Append the smallest data header for `len` bytes on `port`.
///
/// `len` must be in `1..=u16::MAX`.
pub fn put_data_header(out: &mut BytesMut, port: u8, len: usize) {
    debug_assert!(len > 0 && len <= u16::MAX as usize);
    match data_header_len(len) {
        1 => out.put_u8(header_byte((len - 1) as u8, port)),
        2 => {
            out.put_u8(header_byte(op::DATA_MEDIUM, port));
            out.put_u8(len as u8);
        }
        _ => {
            out.put_u8(header_byte(op::DATA_LONG, port));
            out.put_u16(len as u16);
        }
    }
}

/// Locate a data frame at the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise
/// `(port, payload_offset, payload_len)`. The opcode must already be known to
/// be a data opcode.
pub fn peek_data_frame(buf: &[u8], max_frame: usize) -> Result<Option<(u8, usize, usize)>> {
    let (opcode, port) = split_header(buf[0]);
    let (offset, len) = match opcode {
        0x0..=0x7 => (1, opcode as usize + 1),
        op::DATA_MEDIUM => {
            if buf.len() < 2 {
                return Ok(None);
            }
            (2, buf[1] as usize)
        }
        op::DATA_LONG => {
            if buf.len() < 3 {
                return Ok(None);
            }
            (3, get_u16(buf, 1) as usize)
        }
        other => {
            return Err(RealportError::Protocol(format!(
                "opcode {other:#x} is not a data frame"
            )))
        }
    };
    if len == 0 {
        return Err(RealportError::Protocol("zero-length data frame".to_string()));
    }
    if len > max_frame {
        return Err(RealportError::FrameTooLarge { len, max: max_frame });
    }
    if buf.len() < offset + len {
        return Ok(None);
    }
    Ok(Some((port, offset, len)))
}

/// Whether an opcode introduces a data frame.
#[inline]
pub fn is_data_opcode(opcode: u8) -> bool {
    opcode <= op::DATA_LONG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_big_endian() {
        let mut buf = [0u8; 4];
        put_u16(&mut buf, 1, 0x0102);
        assert_eq!(buf, [0x00, 0x01, 0x02, 0x00]);
        assert_eq!(get_u16(&buf, 1), 0x0102);
    }

    #[test]
    fn test_u32_big_endian() {
        let mut buf = [0u8; 6];
        put_u32(&mut buf, 2, 0x0405_0607);
        assert_eq!(buf, [0, 0, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(get_u32(&buf, 2), 0x0405_0607);
    }

    #[test]
    fn test_data_header_len_boundaries() {
        assert_eq!(data_header_len(1), 1);
        assert_eq!(data_header_len(8), 1);
        assert_eq!(data_header_len(9), 2);
        assert_eq!(data_header_len(255), 2);
        assert_eq!(data_header_len(256), 3);
    }

    #[test]
    fn test_put_data_header_forms() {
        let mut out = BytesMut::new();
        put_data_header(&mut out, 0x3, 8);
        assert_eq!(&out[..], &[0x73]);

        out.clear();
        put_data_header(&mut out, 0x3, 200);
        assert_eq!(&out[..], &[0x83, 200]);

        out.clear();
        put_data_header(&mut out, 0xF, 1000);
        assert_eq!(&out[..], &[0x9F, 0x03, 0xE8]);
    }

    #[test]
    fn test_peek_data_frame_needs_more() {
        assert!(peek_data_frame(&[0x83], 4096).unwrap().is_none());
        assert!(peek_data_frame(&[0x83, 4, b'a'], 4096).unwrap().is_none());
        assert!(peek_data_frame(&[0x9F, 0x01], 4096).unwrap().is_none());
    }

    #[test]
    fn test_peek_data_frame_complete() {
        let frame = [0x12, b'h', b'i'];
        assert_eq!(peek_data_frame(&frame, 4096).unwrap(), Some((2, 1, 2)));
    }

    #[test]
    fn test_peek_data_frame_too_large() {
        let frame = [0x90, 0x10, 0x00];
        let err = peek_data_frame(&frame, 1024).unwrap_err();
        assert!(matches!(err, RealportError::FrameTooLarge { len: 4096, max: 1024 }));
    }

    #[test]
    fn test_channel_addressing() {
        assert_eq!(module_of(37), 2);
        assert_eq!(port_of(37), 5);
        assert_eq!(channel_index(2, 5), 37);
        assert_eq!(channel_index(15, 15), 255);
    }

    #[test]
    fn test_open_type_codes() {
        for otype in OpenType::ALL {
            assert_eq!(OpenType::from_code(otype.code()), Some(otype));
        }
        assert_eq!(OpenType::from_code(open_code::BUSY | 1), Some(OpenType::Persistent));
        assert_eq!(OpenType::from_code(3), None);
    }
}
