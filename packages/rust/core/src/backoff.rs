//! Retry policy for source fetches.
//!
//! One policy object, owned by the coordinator, governs every source.
//! Exponential backoff with a cap; a `Retry-After` hint from a source
//! overrides the computed delay when it is longer.

use std::time::Duration;

use buildlens_shared::config::FetchConfig;

const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff schedule with an attempt ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            // At least one attempt always happens.
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    /// Total attempts allowed per (entity, source) pair.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given retry. `attempt` is the attempt that just
    /// failed, starting at 1; the delay doubles with each failure.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(BACKOFF_CAP);
        match retry_after {
            Some(hint) => hint.max(computed).min(BACKOFF_CAP),
            None => computed,
        }
    }
}
