//! Retry budget and exponential backoff for transfers.

use std::time::Duration;

/// `max_attempts` counts every attempt, including the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Wait before the `n`th retry (1-based): `base * 2^(n-1)`.
    pub fn delay_before_retry(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(30);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }

    /// Whether another attempt is allowed after `attempts` have failed.
    pub fn allows_retry_after(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

/// Blocking delay seam so retry loops can be driven without real waits.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
