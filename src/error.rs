//! Error types for the RealPort engine.
//!
//! Errors fall into four classes:
//! - local resource errors (`Alloc`, `InvalidConfig`): returned to the caller
//!   that triggered them, the Connection keeps running
//! - protocol errors (`Protocol`, `ChannelOutOfRange`, `UnexpectedReply`,
//!   `WindowOverrun`, `FrameTooLarge`, `RoundTripTimeout`): fatal to the whole
//!   Connection, see [`RealportError::is_fatal`]
//! - open negotiation failures (`OpenFailed`, `OpenCancelled`): delivered only
//!   to the waiters of the open type that failed
//! - transport errors (`Io`, `ConnectionClosed`)

use thiserror::Error;

use crate::engine::OpenType;

/// Main error type for all RealPort operations.
#[derive(Debug, Error)]
pub enum RealportError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration values are inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A buffer could not be allocated.
    #[error("failed to allocate {0} bytes")]
    Alloc(usize),

    /// Malformed or unrecognized frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Frame addressed a channel beyond the negotiated channel count.
    #[error("channel {channel} out of range (count {count})")]
    ChannelOutOfRange { channel: u16, count: u16 },

    /// Reply received for a request that was never sent.
    #[error("unexpected {reply} on channel {channel} in state {state}")]
    UnexpectedReply {
        channel: u16,
        reply: &'static str,
        state: &'static str,
    },

    /// Peer sent more data than the advertised window allows.
    #[error("window overrun on channel {channel}: {len} bytes, {window} available")]
    WindowOverrun { channel: u16, len: usize, window: u16 },

    /// Declared frame length exceeds the configured maximum.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Oldest sync point has not been acknowledged within the stale threshold.
    #[error("round trip stale for {0} ms")]
    RoundTripTimeout(u64),

    /// The PortServer refused an open.
    #[error("{0:?} open failed on channel {1}")]
    OpenFailed(OpenType, u16),

    /// The open request was withdrawn before it completed.
    #[error("open cancelled on channel {0}")]
    OpenCancelled(u16),

    /// Local port was hung up by the PortServer.
    #[error("channel {0} hung up")]
    Hangup(u16),

    /// Operation needs an open port.
    #[error("channel {0} is not open")]
    NotOpen(u16),

    /// Connection is in the error state or has been torn down.
    #[error("connection closed")]
    ConnectionClosed,
}

impl RealportError {
    /// Whether this error invalidates the whole Connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RealportError::Protocol(_)
                | RealportError::ChannelOutOfRange { .. }
                | RealportError::UnexpectedReply { .. }
                | RealportError::WindowOverrun { .. }
                | RealportError::FrameTooLarge { .. }
                | RealportError::RoundTripTimeout(_)
        )
    }
}

/// Result type alias using RealportError.
pub type Result<T> = std::result::Result<T, RealportError>;
