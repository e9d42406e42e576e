use std::time::Duration;

/// Bounded retry with exponential backoff: after failed attempt `k`
/// (0-based) the caller waits `backoff_unit · 2^k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}
