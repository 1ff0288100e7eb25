//! Frame trait shared by both wire directions.
//!
//! [`Command`](super::Command) travels host to PortServer and
//! [`Reply`](super::Reply) travels PortServer to host. Both sides can encode
//! and decode either type, which lets tests play the PortServer and lets the
//! monitor annotate traffic in both directions.
//!
//! # Example
//!
//! ```
//! use realport::protocol::{encode_frames, Command, Frame};
//!
//! let bytes = encode_frames(&[Command::ModuleSelect(2), Command::CapabilityQuery]);
//! assert_eq!(&bytes[..], &[0xF2, 0xE0]);
//!
//! let (cmd, used) = Command::decode(&bytes, 4096).unwrap().unwrap();
//! assert_eq!(cmd, Command::ModuleSelect(2));
//! assert_eq!(used, 1);
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// A message that can be framed onto and parsed off the wire.
pub trait Frame: Sized {
    /// Decode one frame from the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds only part of a frame, or
    /// `Ok(Some((frame, consumed)))` when a whole frame was read.
    ///
    /// # Errors
    ///
    /// Unknown opcodes and lengths over `max_frame` are protocol errors.
    fn decode(buf: &[u8], max_frame: usize) -> Result<Option<(Self, usize)>>;

    /// Append the wire form to `out`.
    fn encode(&self, out: &mut BytesMut);

    /// Number of bytes `encode` will append.
    fn encoded_len(&self) -> usize;
}

/// Encode a sequence of frames into one contiguous buffer.
pub fn encode_frames<F: Frame>(frames: &[F]) -> Bytes {
    let len = frames.iter().map(Frame::encoded_len).sum();
    let mut out = BytesMut::with_capacity(len);
    for frame in frames {
        frame.encode(&mut out);
    }
    out.freeze()
}

/// Diagnostic text is carried with a 1-byte length.
pub(crate) fn clamp_text(text: &str) -> &str {
    if text.len() <= u8::MAX as usize {
        return text;
    }
    let mut end = u8::MAX as usize;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
