//! Retry policy for destination batch writes.
//!
//! The default policy never retries: the first failed batch stalls the upload.

use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fail_stop()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_backoff: MAX_BACKOFF.max(base_backoff),
        }
    }

    /// Stop at the first failure
    pub fn fail_stop() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Exponential backoff before retry number `retry` (1-based), capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Decide what to do after `failures` consecutive failures of one batch.
    pub fn decide(&self, failures: u32, retryable: bool) -> RetryDecision {
        if !retryable || failures > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff_for(failures))
    }
}
