//! Engine configuration.
//!
//! All tunables of a Connection live in [`EngineConfig`]. It deserializes
//! from JSON with every field optional:
//!
//! ```
//! use realport::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{ "fast_rate": 10000, "tick_ms": 10 }"#).unwrap();
//! assert_eq!(config.fast_rate, 10000);
//! assert_eq!(config.sync_ring_capacity, 8);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RealportError, Result};
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, MAX_CHANNELS};

/// Default pacer tick.
pub const DEFAULT_TICK_MS: u64 = 20;

/// Default uncongested link rate in bytes per second.
pub const DEFAULT_FAST_RATE: u32 = 1_000_000;

/// Default fully congested link rate in bytes per second.
pub const DEFAULT_SLOW_RATE: u32 = 10_000;

/// Round-trip delay at or below which the fast rate applies.
pub const DEFAULT_FAST_DELAY_MS: u64 = 60;

/// Round-trip delay at or above which the slow rate applies.
pub const DEFAULT_SLOW_DELAY_MS: u64 = 2_000;

/// Unacknowledged sync age that fails the Connection.
pub const DEFAULT_STALE_MS: u64 = 30_000;

/// Silence after which a keep-alive is sent.
pub const DEFAULT_KEEPALIVE_MS: u64 = 5_000;

/// Default in-flight sync capacity.
pub const DEFAULT_SYNC_RING_CAPACITY: usize = 8;

/// Default per-channel buffer size (power of two).
pub const DEFAULT_CHANNEL_BUFFER: usize = 8192;

/// Default bytes handed to the transport per encode call.
pub const DEFAULT_TRANSPORT_BUFFER: usize = 16 * 1024;

/// Tunables for one Connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pacer tick in milliseconds.
    pub tick_ms: u64,
    /// Bytes per second with no congestion.
    pub fast_rate: u32,
    /// Bytes per second under full congestion.
    pub slow_rate: u32,
    pub fast_delay_ms: u64,
    pub slow_delay_ms: u64,
    /// Oldest sync older than this fails the Connection.
    pub stale_ms: u64,
    /// Send a keep-alive after this much transmit silence.
    pub keepalive_ms: u64,
    /// Maximum outstanding sync points.
    pub sync_ring_capacity: usize,
    /// Upper bound on channels accepted from the capability reply.
    pub max_channels: u16,
    /// Per-channel transmit buffer, power of two.
    pub tx_buffer_size: usize,
    /// Per-channel receive buffer, power of two.
    pub rx_buffer_size: usize,
    /// Largest data frame accepted or produced.
    pub max_frame_size: usize,
    /// Default `max_bytes` for one encode call.
    pub transport_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            fast_rate: DEFAULT_FAST_RATE,
            slow_rate: DEFAULT_SLOW_RATE,
            fast_delay_ms: DEFAULT_FAST_DELAY_MS,
            slow_delay_ms: DEFAULT_SLOW_DELAY_MS,
            stale_ms: DEFAULT_STALE_MS,
            keepalive_ms: DEFAULT_KEEPALIVE_MS,
            sync_ring_capacity: DEFAULT_SYNC_RING_CAPACITY,
            max_channels: MAX_CHANNELS,
            tx_buffer_size: DEFAULT_CHANNEL_BUFFER,
            rx_buffer_size: DEFAULT_CHANNEL_BUFFER,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            transport_buffer_size: DEFAULT_TRANSPORT_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Parse from a JSON document and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stale(&self) -> Duration {
        Duration::from_millis(self.stale_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(RealportError::InvalidConfig(msg));

        if self.tick_ms == 0 {
            return fail("tick_ms must be positive".to_string());
        }
        if self.slow_rate == 0 || self.slow_rate > self.fast_rate {
            return fail(format!(
                "rates must satisfy 0 < slow_rate ({}) <= fast_rate ({})",
                self.slow_rate, self.fast_rate
            ));
        }
        if self.fast_delay_ms >= self.slow_delay_ms {
            return fail(format!(
                "fast_delay_ms ({}) must be below slow_delay_ms ({})",
                self.fast_delay_ms, self.slow_delay_ms
            ));
        }
        // Sequence numbers are a u8; half the space keeps "up to and including" unambiguous.
        if self.sync_ring_capacity == 0 || self.sync_ring_capacity > 127 {
            return fail(format!(
                "sync_ring_capacity {} not in 1..=127",
                self.sync_ring_capacity
            ));
        }
        if self.max_channels == 0 || self.max_channels > MAX_CHANNELS {
            return fail(format!("max_channels {} not in 1..=256", self.max_channels));
        }
        for (name, size) in [
            ("tx_buffer_size", self.tx_buffer_size),
            ("rx_buffer_size", self.rx_buffer_size),
        ] {
            if !size.is_power_of_two() || size < 64 || size > 1 << 15 {
                return fail(format!("{name} {size} must be a power of two in 64..=32768"));
            }
        }
        if self.max_frame_size == 0 || self.max_frame_size > u16::MAX as usize {
            return fail(format!("max_frame_size {} not in 1..=65535", self.max_frame_size));
        }
        if self.transport_buffer_size < 16 {
            return fail("transport_buffer_size must be at least 16".to_string());
        }
        Ok(())
    }
}
