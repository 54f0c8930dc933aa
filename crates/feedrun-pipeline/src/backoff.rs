//! Exponential backoff with jitter for transport retries.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff between retry attempts.
///
/// The base delay doubles per attempt starting at `min` and is capped at
/// `max`. The returned delay is drawn uniformly from `[min, base]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub min: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Whether to randomize delays.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(20 * 60),
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            jitter: true,
        }
    }

    /// Disable jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Un-jittered delay after the given failed attempt (1-indexed).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(min_ms.saturating_mul(multiplier).min(max_ms))
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base <= self.min {
            return base;
        }
        let ms = rand::thread_rng()
            .gen_range(self.min.as_millis() as u64..=base.as_millis() as u64);
        Duration::from_millis(ms)
    }
}
