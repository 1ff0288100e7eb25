//! # realport
//!
//! Host side of the RealPort protocol: many serial channels of a remote
//! PortServer multiplexed over one reliable byte stream.
//!
//! ## Architecture
//!
//! - **Engine** ([`engine::Connection`]): sans-io state machine. The transport
//!   feeds it bytes with `decode`, pulls frames with `encode`, and calls
//!   `tick` on every pacer tick
//! - **Session** ([`Session`]): drives a Connection over a tokio stream and
//!   hands out async [`PortHandle`]s
//! - **Monitor** ([`monitor::Monitor`]): optional copy of all traffic for
//!   diagnostics
//!
//! ## Example
//!
//! ```
//! use std::time::Instant;
//! use realport::{Connection, EngineConfig};
//!
//! let mut conn = Connection::new(EngineConfig::default()).unwrap();
//! let now = Instant::now();
//!
//! // First encode asks the PortServer for its capabilities.
//! let out = conn.encode(1024, now);
//! assert_eq!(&out[..], &[0xE0]);
//!
//! // Channel count reply: 16 channels.
//! conn.decode(&[0xE1, 0x00, 0x10], now).unwrap();
//! assert_eq!(conn.channel_count(), 16);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod session;

pub use config::EngineConfig;
pub use engine::{Connection, OpenType};
pub use error::{RealportError, Result};
pub use session::{PortHandle, Session, SessionBuilder};
