//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for the remainder. A stream read may end in the
//! middle of a frame. Those trailing bytes stay here until the next push
//! completes the frame.
//!
//! The remainder never grows past one maximal frame: a complete frame is
//! always extracted before more than `max_frame + MAX_HEADER_LEN` bytes can
//! pile up. Anything larger is already a protocol error from the decoder.
//!
//! # Example
//!
//! ```
//! use realport::protocol::{FrameBuffer, Reply};
//!
//! let mut buffer: FrameBuffer<Reply> = FrameBuffer::new(4096);
//!
//! // Channel-count reply split across two reads
//! assert!(buffer.push(&[0xE1, 0x00]).unwrap().is_empty());
//! let frames = buffer.push(&[0x10]).unwrap();
//! assert_eq!(frames, vec![Reply::ChannelCount(16)]);
//! ```

use std::marker::PhantomData;

use bytes::{Buf, BytesMut};

use super::frame::Frame;
use super::wire_format::MAX_HEADER_LEN;
use crate::error::{RealportError, Result};

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer<F: Frame> {
    /// Bytes of a frame not yet complete.
    buffer: BytesMut,
    /// Maximum data bytes in a single frame.
    max_frame: usize,
    _frame: PhantomData<fn() -> F>,
}

impl<F: Frame> FrameBuffer<F> {
    /// Create a frame buffer accepting frames up to `max_frame` data bytes.
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame + MAX_HEADER_LEN),
            max_frame,
            _frame: PhantomData,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial trailing bytes are kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns the decoder's error on an unknown opcode or oversized frame.
    /// The buffer is cleared in that case; the stream cannot be resynced.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<F>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match F::decode(&self.buffer, self.max_frame) {
                Ok(Some((frame, used))) => {
                    self.buffer.advance(used);
                    frames.push(frame);
                }
                Ok(None) => break,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }

        if self.buffer.len() > self.max_frame + MAX_HEADER_LEN {
            let len = self.buffer.len();
            self.buffer.clear();
            return Err(RealportError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }

        Ok(frames)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
