//! Per-item retry budget and backoff

use std::time::Duration;

use rand::Rng;

/// Bounds on how often a queue item is re-submitted after transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which an item stays queued but is no longer submitted
    pub max_retries: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for the exponential delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Policy without backoff, retrying on every cycle until the cap
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Ceiling of the backoff after `retry_count` failures: `base * 2^(n-1)`, capped
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry_count - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff with jitter, uniformly drawn from `[delay / 2, delay]`
    pub fn jittered_delay(&self, retry_count: u32, rng: &mut impl Rng) -> Duration {
        let ceiling = u64::try_from(self.delay_for(retry_count).as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(ceiling / 2..=ceiling))
    }

    /// Timestamp (Unix ms) before which the item should not be re-submitted
    pub fn next_attempt_at(&self, retry_count: u32, now_ms: i64) -> i64 {
        let delay = self.jittered_delay(retry_count, &mut rand::thread_rng());
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(delay_ms)
    }
}
