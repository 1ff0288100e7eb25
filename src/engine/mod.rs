//! Engine module - the sans-io RealPort state machine.
//!
//! - [`Connection`]: one PortServer, driven by encode/decode/tick
//! - [`channel`]: per-port buffers and the open/close state machine
//! - [`window`]: receive window, transmit credit, sync ring
//! - [`pacer`]: delay-based rate control
//! - [`schedule`]: water-filling allocation of the data budget

pub mod channel;
mod connection;
mod event;
pub mod pacer;
mod params;
mod ring;
pub mod schedule;
pub mod window;

pub use channel::{ChannelCommand, ChannelSnapshot, ChannelState, DerivedParams};
pub use connection::{Connection, ConnectionState};
pub use event::{EngineEvent, OpenStatus, OpenToken};
pub use params::ChannelParams;
pub use ring::RingBuffer;
pub use crate::protocol::OpenType;
