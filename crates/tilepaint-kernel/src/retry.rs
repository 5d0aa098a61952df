//! Submission retry policy

use std::time::Duration;
use tilepaint_core::PaintConfig;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    #[inline]
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    #[must_use]
    pub fn from_config(config: &PaintConfig) -> Self {
        Self::new(config.max_attempts, config.retry_base_delay())
    }

    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before 1-based `attempt`: zero for the first, then `base * 2^(attempt-2)`
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether another attempt follows `attempt`
    #[inline]
    #[must_use]
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PaintConfig::default())
    }
}
