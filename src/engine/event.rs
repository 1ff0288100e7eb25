//! Engine notifications for the session layer.

use crate::protocol::OpenType;

/// Something a waiter may care about. Drained with
/// [`Connection::drain_events`](super::Connection::drain_events).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Channel reached Ready; every open waiter on it succeeded.
    Opened { channel: u16 },
    /// The PortServer refused an open of this type.
    OpenFailed { channel: u16, otype: OpenType },
    /// Local port forcibly hung up.
    Hangup { channel: u16 },
    /// Close acknowledged, channel is Idle again.
    Closed { channel: u16 },
    /// Requested parameters now match what was sent.
    ParamsSynced { channel: u16 },
    /// Every round-trip ticket up to `ticket` completed.
    RoundTrip { channel: u16, ticket: u64 },
    /// Receive data is buffered.
    RxReady { channel: u16 },
    /// Transmit buffer space was freed.
    TxSpace { channel: u16 },
    /// Transmit buffer empty and everything sent was taken by the PortServer.
    Drained { channel: u16 },
    /// Modem input or event bits changed.
    Modem { channel: u16, modem_in: u8, events: u8 },
    /// Capability reply set the channel count.
    ChannelCount(u16),
    /// Channel destroyed by a smaller channel count.
    ChannelRemoved { channel: u16 },
    /// Connection entered the error state.
    Failed(String),
}

/// Handle for a pending open, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenToken {
    pub channel: u16,
    pub otype: OpenType,
    pub id: u64,
}

/// Result of [`Connection::request_open`](super::Connection::request_open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// Port was already open; the local open count went up.
    Opened,
    /// Wait for [`EngineEvent::Opened`] or [`EngineEvent::OpenFailed`].
    Pending(OpenToken),
}
