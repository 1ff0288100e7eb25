//! In-band 0xFF escape decoding for cooked receive data.
//!
//! The PortServer marks line errors inline with data:
//! - `FF FF` is one literal `0xFF`
//! - `FF <marker> <code>` is a break, framing, parity or overrun marker
//!
//! Two marker encodings exist. POSIX style follows `PARMRK`: marker `0x00`
//! with code `0x00` is a break, with any other code it is a parity error on
//! that byte. DOS style sends a UART line-status byte as the marker.
//!
//! The scanner turns the stream into parallel data and flag vectors so that
//! nothing past this point sees the escape convention. Its state carries
//! across calls, so an escape split between two reads still decodes.
//!
//! # Example
//!
//! ```
//! use realport::protocol::{EscapeScanner, EscapeStyle, RxFlag};
//!
//! let mut scanner = EscapeScanner::new(EscapeStyle::Dos);
//! let out = scanner.scan(&[b'A', 0xFF, 0x18, 0x00]);
//! assert_eq!(out.data, vec![b'A', 0x00]);
//! assert_eq!(out.flags, vec![RxFlag::Normal, RxFlag::Break]);
//! ```

use serde::{Deserialize, Serialize};

/// Escape introducer.
pub const ESCAPE: u8 = 0xFF;

/// DOS line-status bits.
pub mod lsr {
    pub const OVERRUN: u8 = 0x02;
    pub const PARITY: u8 = 0x04;
    pub const FRAMING: u8 = 0x08;
    pub const BREAK: u8 = 0x10;
}

/// Which marker encoding a channel's PortServer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscapeStyle {
    #[default]
    Posix,
    Dos,
}

/// Per-byte receive status handed to the line discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxFlag {
    Normal,
    Break,
    Framing,
    Parity,
    Overrun,
}

/// Decoded bytes with a same-length flag stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scanned {
    pub data: Vec<u8>,
    pub flags: Vec<RxFlag>,
}

impl Scanned {
    fn push(&mut self, byte: u8, flag: RxFlag) {
        self.data.push(byte);
        self.flags.push(flag);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Plain,
    /// Saw `FF`.
    Escape,
    /// Saw `FF marker`.
    Marker(u8),
}

/// Stateful escape decoder for one channel.
#[derive(Debug, Clone)]
pub struct EscapeScanner {
    style: EscapeStyle,
    state: State,
}

impl EscapeScanner {
    pub fn new(style: EscapeStyle) -> Self {
        Self {
            style,
            state: State::Plain,
        }
    }

    pub fn style(&self) -> EscapeStyle {
        self.style
    }

    /// Whether an escape sequence is half-consumed.
    pub fn is_pending(&self) -> bool {
        self.state != State::Plain
    }

    /// Forget a half-consumed escape, e.g. after an input flush.
    pub fn reset(&mut self) {
        self.state = State::Plain;
    }

    /// Decode `input`, appending to a fresh [`Scanned`].
    pub fn scan(&mut self, input: &[u8]) -> Scanned {
        let mut out = Scanned {
            data: Vec::with_capacity(input.len()),
            flags: Vec::with_capacity(input.len()),
        };
        self.scan_into(input, &mut out);
        out
    }

    /// Decode `input`, appending to `out`.
    pub fn scan_into(&mut self, input: &[u8], out: &mut Scanned) {
        for &byte in input {
            self.state = match self.state {
                State::Plain if byte == ESCAPE => State::Escape,
                State::Plain => {
                    out.push(byte, RxFlag::Normal);
                    State::Plain
                }
                State::Escape if byte == ESCAPE => {
                    out.push(ESCAPE, RxFlag::Normal);
                    State::Plain
                }
                State::Escape => State::Marker(byte),
                State::Marker(marker) => {
                    let (data, flag) = self.classify(marker, byte);
                    out.push(data, flag);
                    State::Plain
                }
            };
        }
    }

    /// Decode one `FF marker code` escape.
    ///
    /// POSIX: a zero marker carries a break (zero code) or a parity error on
    /// the code byte. Any non-zero marker is the framing marker, so its code
    /// is a framing error whatever its value. The "non-zero code is a parity
    /// error" fallback only applies to DOS line-status markers with no error
    /// bit set.
    fn classify(&self, marker: u8, code: u8) -> (u8, RxFlag) {
        match self.style {
            EscapeStyle::Posix => match (marker, code) {
                (0, 0) => (0, RxFlag::Break),
                (0, c) => (c, RxFlag::Parity),
                (_, c) => (c, RxFlag::Framing),
            },
            EscapeStyle::Dos => {
                if marker & lsr::BREAK != 0 {
                    (0, RxFlag::Break)
                } else if marker & lsr::FRAMING != 0 {
                    (code, RxFlag::Framing)
                } else if marker & lsr::PARITY != 0 {
                    (code, RxFlag::Parity)
                } else if marker & lsr::OVERRUN != 0 {
                    (code, RxFlag::Overrun)
                } else if code != 0 {
                    (code, RxFlag::Parity)
                } else {
                    (code, RxFlag::Normal)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_ff() {
        let mut scanner = EscapeScanner::new(EscapeStyle::Posix);
        let out = scanner.scan(&[0xFF, 0xFF, 0x41]);
        assert_eq!(out.data, vec![0xFF, 0x41]);
        assert_eq!(out.flags, vec![RxFlag::Normal, RxFlag::Normal]);
    }

    #[test]
    fn test_dos_break() {
        let mut scanner = EscapeScanner::new(EscapeStyle::Dos);
        let out = scanner.scan(&[0xFF, 0x18, 0x00]);
        assert_eq!(out.data, vec![0x00]);
        assert_eq!(out.flags, vec![RxFlag::Break]);
    }

    #[test]
    fn test_posix_nonzero_marker_is_framing() {
        let mut scanner = EscapeScanner::new(EscapeStyle::Posix);
        let out = scanner.scan(&[0xFF, 0x08, 0x00, 0xFF, 0x7F, 0x41]);
        assert_eq!(out.data, vec![0x00, 0x41]);
        assert_eq!(out.flags, vec![RxFlag::Framing, RxFlag::Framing]);
    }

    #[test]
    fn test_posix_markers() {
        let mut scanner = EscapeScanner::new(EscapeStyle::Posix);
        let out = scanner.scan(&[0xFF, 0x00, 0x00, 0xFF, 0x00, b'x', 0xFF, 0x01, b'y']);
        assert_eq!(out.data, vec![0x00, b'x', b'y']);
        assert_eq!(out.flags, vec![RxFlag::Break, RxFlag::Parity, RxFlag::Framing]);
    }

    #[test]
    fn test_dos_status_bits() {
        let mut scanner = EscapeScanner::new(EscapeStyle::Dos);
        let out = scanner.scan(&[
            0xFF, lsr::FRAMING, b'a',
            0xFF, lsr::PARITY, b'b',
            0xFF, lsr::OVERRUN, b'c',
            0xFF, 0x00, b'd',
        ]);
        assert_eq!(out.data, b"abcd".to_vec());
        assert_eq!(
            out.flags,
            vec![RxFlag::Framing, RxFlag::Parity, RxFlag::Overrun, RxFlag::Parity]
        );
    }

    #[test]
    fn test_escape_split_across_calls() {
        let mut scanner = EscapeScanner::new(EscapeStyle::Posix);
        let first = scanner.scan(&[b'a', 0xFF]);
        assert_eq!(first.data, vec![b'a']);
        assert!(scanner.is_pending());

        let second = scanner.scan(&[0x00]);
        assert!(second.is_empty());

        let third = scanner.scan(&[b'q', b'z']);
        assert_eq!(third.data, vec![b'q', b'z']);
        assert_eq!(third.flags, vec![RxFlag::Parity, RxFlag::Normal]);
        assert!(!scanner.is_pending());
    }

    #[test]
    fn test_reset_drops_partial_escape() {
        let mut scanner = EscapeScanner::new(EscapeStyle::Dos);
        scanner.scan(&[0xFF]);
        scanner.reset();
        let out = scanner.scan(&[0x41]);
        assert_eq!(out.data, vec![0x41]);
        assert_eq!(out.flags, vec![RxFlag::Normal]);
    }
}
