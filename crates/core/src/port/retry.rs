//! Retry policy port.
//!
//! The sweeper treats the retry engine as a black box: a policy says how many
//! attempts a broker send gets and how long to wait before each retry. The
//! stock implementation is exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

pub trait RetryPolicy: Send + Sync {
    /// Total number of send attempts, including the first.
    fn max_attempts(&self) -> u32;

    /// Delay before retry number `attempt` (0-indexed: the delay between the
    /// first failure and the second attempt is `delay_for(0)`).
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// Exponential backoff: `base * multiplier^attempt`, capped at `max`, with a
/// symmetric jitter factor applied to spread concurrent retriers.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Jitter as a fraction of the computed delay (0.1 = ±10%).
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 3,
        }
    }
}

impl ExponentialBackoff {
    /// A single attempt, no retries. Useful in tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn raw_delay(&self, attempt: u32) -> Duration {
        let scaled = self.base.mul_f64(self.multiplier.powi(attempt as i32));
        scaled.min(self.max)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.raw_delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        delay.mul_f64(factor)
    }
}
