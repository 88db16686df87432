//! Backoff schedule for retryable failures.

use std::time::Duration;

use ra_domain::config::{BackoffKind, RetryConfig};

/// Delay before retry number `attempt` (0-based: the delay after the
/// first failure is `backoff_delay(cfg, 0)`).
pub(crate) fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    match config.backoff {
        BackoffKind::Fixed => Duration::from_millis(config.base_ms),
        BackoffKind::Exponential => {
            let factor = 1u64 << attempt.min(16);
            Duration::from_millis(config.base_ms.saturating_mul(factor).min(config.cap_ms))
        }
    }
}
