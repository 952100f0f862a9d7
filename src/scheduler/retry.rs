use std::time::Duration;

/// How failed requests are put back on the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay after the first failure, doubled on each further failure.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// Retry forever on the next tick.
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Whether a request that has now failed `attempts` times may run again.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Backoff applied after the `attempts`-th failure (1-based).
    pub fn backoff(&self, attempts: u32) -> Duration {
        if self.base_backoff.is_zero() || attempts == 0 {
            return Duration::ZERO;
        }
        let shift = (attempts - 1).min(16);
        self.base_backoff
            .checked_mul(1 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
