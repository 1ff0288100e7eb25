//! Delay-based transmit pacing.
//!
//! The pacer estimates queueing delay from the oldest outstanding sync point
//! and picks a byte rate between `fast_rate` and `slow_rate`. Every tick
//! deposits `rate × tick` bytes of credit; sending spends it.

use std::time::{Duration, Instant};

use super::window::SyncRing;
use crate::config::EngineConfig;
use crate::error::{RealportError, Result};
use crate::protocol::MAX_HEADER_LEN;

/// Credit needed, in header lengths, before a channel gets a turn.
pub const PACER_HEADER_MULTIPLE: usize = 2;

/// Credit cap in ticks at the fast rate.
const CREDIT_TICKS: i64 = 3;

#[derive(Debug, Clone)]
pub struct RatePacer {
    fast_rate: u32,
    slow_rate: u32,
    fast_delay: Duration,
    slow_delay: Duration,
    stale: Duration,
    tick: Duration,
    /// Bytes we may still send. Control frames may push it negative.
    credit: i64,
    rate: u32,
}

impl RatePacer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fast_rate: config.fast_rate,
            slow_rate: config.slow_rate,
            fast_delay: Duration::from_millis(config.fast_delay_ms),
            slow_delay: Duration::from_millis(config.slow_delay_ms),
            stale: config.stale(),
            tick: config.tick(),
            credit: 0,
            rate: config.fast_rate,
        }
    }

    /// Rate chosen at the last tick.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn credit(&self) -> i64 {
        self.credit
    }

    /// Credit usable for data right now.
    pub fn budget(&self) -> usize {
        self.credit.max(0) as usize
    }

    /// Whether a channel may take a turn.
    pub fn may_send(&self) -> bool {
        self.credit > (PACER_HEADER_MULTIPLE * MAX_HEADER_LEN) as i64
    }

    pub fn spend(&mut self, n: usize) {
        self.credit -= n as i64;
    }

    /// Map a measured delay onto the configured rate range.
    pub fn rate_for_delay(&self, delay: Option<Duration>) -> u32 {
        let Some(delay) = delay else {
            return self.fast_rate;
        };
        if delay <= self.fast_delay {
            return self.fast_rate;
        }
        if delay >= self.slow_delay {
            return self.slow_rate;
        }
        let span = (self.slow_delay - self.fast_delay).as_micros();
        let into = (delay - self.fast_delay).as_micros();
        let drop = u128::from(self.fast_rate - self.slow_rate) * into / span;
        self.fast_rate - drop as u32
    }

    /// Delay of the oldest sync, minus the time its batch needed on the wire.
    pub fn measured_delay(&self, ring: &SyncRing, now: Instant) -> Option<Duration> {
        let oldest = ring.oldest()?;
        let elapsed = now.saturating_duration_since(oldest.sent_at);
        let wire_ms = oldest.size as u64 * 1000 / u64::from(self.fast_rate.max(1));
        Some(elapsed.saturating_sub(Duration::from_millis(wire_ms)))
    }

    fn per_tick(&self, rate: u32) -> i64 {
        (u128::from(rate) * self.tick.as_millis() / 1000) as i64
    }

    /// One scheduling tick.
    ///
    /// # Errors
    ///
    /// `RoundTripTimeout` when the oldest sync is older than the stale threshold.
    pub fn tick(&mut self, ring: &SyncRing, now: Instant) -> Result<()> {
        if let Some(oldest) = ring.oldest() {
            let age = now.saturating_duration_since(oldest.sent_at);
            if age > self.stale {
                return Err(RealportError::RoundTripTimeout(age.as_millis() as u64));
            }
        }
        self.rate = self.rate_for_delay(self.measured_delay(ring, now));
        let cap = CREDIT_TICKS * self.per_tick(self.fast_rate);
        self.credit = (self.credit + self.per_tick(self.rate)).min(cap);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::window::SyncPurpose;

    fn pacer(fast: u32, slow: u32) -> RatePacer {
        RatePacer::new(&EngineConfig {
            fast_rate: fast,
            slow_rate: slow,
            fast_delay_ms: 60,
            slow_delay_ms: 2000,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn test_interpolated_rate() {
        let p = pacer(10_000, 2_000);
        assert_eq!(p.rate_for_delay(None), 10_000);
        assert_eq!(p.rate_for_delay(Some(Duration::from_millis(30))), 10_000);
        assert_eq!(p.rate_for_delay(Some(Duration::from_millis(1030))), 6_000);
        assert_eq!(p.rate_for_delay(Some(Duration::from_millis(5000))), 2_000);
    }

    #[test]
    fn test_credit_clamped_to_three_ticks() {
        let mut p = pacer(10_000, 2_000);
        let ring = SyncRing::new(8);
        let now = Instant::now();
        for _ in 0..10 {
            p.tick(&ring, now).unwrap();
        }
        // 10000 B/s at 20 ms is 200 bytes per tick.
        assert_eq!(p.credit(), 600);
    }

    #[test]
    fn test_turn_withheld_below_header_threshold() {
        let mut p = pacer(10_000, 2_000);
        let ring = SyncRing::new(8);
        p.tick(&ring, Instant::now()).unwrap();
        p.spend(194);
        assert!(!p.may_send());
        p.spend(10);
        assert_eq!(p.budget(), 0);
    }

    #[test]
    fn test_delay_subtracts_wire_time() {
        let p = pacer(10_000, 2_000);
        let mut ring = SyncRing::new(8);
        let start = Instant::now();
        ring.push(start, 1_000, SyncPurpose::Pacing);
        // 1000 bytes at 10000 B/s took 100 ms on the wire.
        let delay = p.measured_delay(&ring, start + Duration::from_millis(1130));
        assert_eq!(delay, Some(Duration::from_millis(1030)));
    }

    #[test]
    fn test_stale_sync_fails() {
        let mut p = pacer(10_000, 2_000);
        let mut ring = SyncRing::new(8);
        let start = Instant::now();
        ring.push(start, 1, SyncPurpose::Pacing);
        assert!(p.tick(&ring, start + Duration::from_secs(29)).is_ok());
        let err = p.tick(&ring, start + Duration::from_secs(31)).unwrap_err();
        assert!(matches!(err, RealportError::RoundTripTimeout(_)));
    }
}
