use crate::config::ProducerConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential restart delay with random jitter.
///
/// The delay for attempt `n` is `min(max, min * 2^n)` scaled by a random
/// factor in `[1 - random_factor, 1 + random_factor]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartBackoff {
    pub min: Duration,
    pub max: Duration,
    pub random_factor: f64,
}

impl RestartBackoff {
    pub fn new(min: Duration, max: Duration, random_factor: f64) -> Self {
        Self {
            min,
            max: max.max(min),
            random_factor: random_factor.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ProducerConfig) -> Self {
        Self::new(config.min_backoff, config.max_backoff, config.random_factor)
    }

    /// Delay before restart number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.random_factor == 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(-self.random_factor..=self.random_factor);
        base.mul_f64(1.0 + jitter)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.min(31)).unwrap_or(u32::MAX);
        self.min
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
