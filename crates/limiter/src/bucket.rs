//! The token bucket itself.
//!
//! Refill is lazy: every query first advances the bucket by
//! `elapsed * rate`, clamped to the burst capacity. The bucket is pure
//! mechanism; admission counters live on the struct but are mutated by
//! the limiter so wait-loop probes do not skew denial counts.

use std::time::{Duration, Instant};

pub(crate) struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
    /// Last admission attempt of any kind; the reaper uses this.
    pub(crate) last_access: Instant,

    pub(crate) allowed: u64,
    pub(crate) denied: u64,
    pub(crate) waited: u64,
    pub(crate) total_wait_ms: u64,
}

impl TokenBucket {
    pub(crate) fn new(rate: f64, burst: u32) -> Self {
        let now = Instant::now();
        Self {
            rate,
            burst: burst as f64,
            tokens: burst as f64,
            last_refill: now,
            last_access: now,
            allowed: 0,
            denied: 0,
            waited: 0,
            total_wait_ms: 0,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// Consume one token, or report how long until one matures.
    pub(crate) fn take_or_delay(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        self.last_access = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }

    /// Debit one token unconditionally, returning how long until the debit
    /// is covered. Zero means the token was available now. The bucket may
    /// go negative until refilled; this backs reservations.
    pub(crate) fn reserve_one(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.last_access = now;
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }

    /// Return a previously debited token.
    pub(crate) fn refund_one(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.burst);
    }

    pub(crate) fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_and_drains() {
        let mut bucket = TokenBucket::new(1.0, 2);
        let now = Instant::now();
        assert!(bucket.take_or_delay(now).is_none());
        assert!(bucket.take_or_delay(now).is_none());
        assert!(bucket.take_or_delay(now).is_some());
    }

    #[test]
    fn lazy_refill_restores_tokens() {
        let mut bucket = TokenBucket::new(10.0, 1);
        let start = Instant::now();
        assert!(bucket.take_or_delay(start).is_none());
        assert!(bucket.take_or_delay(start).is_some());
        // 100 ms at 10 tokens/sec refills exactly one token.
        assert!(bucket
            .take_or_delay(start + Duration::from_millis(100))
            .is_none());
    }

    #[test]
    fn refill_clamps_to_burst() {
        let mut bucket = TokenBucket::new(100.0, 3);
        let start = Instant::now();
        // A long idle period must not exceed burst.
        let later = start + Duration::from_secs(60);
        assert!((bucket.available(later) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn delay_reflects_refill_rate() {
        let mut bucket = TokenBucket::new(2.0, 1);
        let start = Instant::now();
        assert!(bucket.take_or_delay(start).is_none());
        let wait = bucket.take_or_delay(start).unwrap();
        // One token at 2/sec takes 500 ms.
        assert!(wait > Duration::from_millis(450) && wait <= Duration::from_millis(500));
    }

    #[test]
    fn reserve_goes_negative_and_refund_restores() {
        let mut bucket = TokenBucket::new(1.0, 1);
        let start = Instant::now();
        assert_eq!(bucket.reserve_one(start), Duration::ZERO);
        let delay = bucket.reserve_one(start);
        assert!(delay > Duration::from_millis(900));
        bucket.refund_one();
        // The refund covers the outstanding debit.
        let wait = bucket.take_or_delay(start);
        assert!(wait.is_some() && wait.unwrap() <= Duration::from_secs(1));
    }
}
