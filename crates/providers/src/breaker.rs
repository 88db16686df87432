//! Per-endpoint circuit breaker.
//!
//! The standard Closed → Open → Half-Open state machine: consecutive
//! failures reaching the threshold open the breaker; after the cool-down
//! one probe request is admitted; its success closes the breaker, its
//! failure re-opens and restarts the cool-down.

use std::time::{Duration, Instant};

use ra_domain::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation. Requests flow through.
    Closed,
    /// Failures reached the threshold. Requests are skipped until the
    /// cool-down elapses.
    Open,
    /// Cool-down elapsed; the next request is the probe.
    HalfOpen,
}

#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub(crate) fn new(config: &BreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_millis(config.cooldown_ms),
            state: BreakerState::Closed,
            failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    /// Non-mutating admission check, used to filter candidates without
    /// consuming the half-open probe slot.
    pub(crate) fn would_admit(&self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => self
                .opened_at
                .map(|at| now.saturating_duration_since(at) >= self.cooldown)
                .unwrap_or(true),
            BreakerState::HalfOpen => !self.probe_in_flight,
        }
    }

    /// Whether a request may go through right now. Transitions Open →
    /// HalfOpen once the cool-down has elapsed; the half-open state admits
    /// exactly one probe.
    pub(crate) fn admit(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.cooldown {
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful request. Closes the breaker and resets the
    /// failure counter.
    pub(crate) fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.failures = 0;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    /// Record a failed request. Returns `true` when this failure opened
    /// (or re-opened) the breaker.
    pub(crate) fn record_failure(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => {
                self.failures += 1;
                if self.failures >= self.threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(now);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                // Probe failed; back to open with a fresh cool-down.
                self.failures += 1;
                self.state = BreakerState::Open;
                self.opened_at = Some(now);
                self.probe_in_flight = false;
                true
            }
            BreakerState::Open => {
                self.failures += 1;
                false
            }
        }
    }

    pub(crate) fn state(&self) -> BreakerState {
        self.state
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
            cooldown_ms,
        })
    }

    #[test]
    fn starts_closed_and_admits() {
        let mut cb = breaker(3, 30_000);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.admit(Instant::now()));
    }

    #[test]
    fn opens_at_threshold() {
        let mut cb = breaker(3, 30_000);
        let now = Instant::now();
        assert!(!cb.record_failure(now));
        assert!(!cb.record_failure(now));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.record_failure(now));
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.admit(now));
    }

    #[test]
    fn cooldown_expiry_admits_one_probe() {
        let mut cb = breaker(1, 50);
        let opened = Instant::now();
        cb.record_failure(opened);
        assert!(!cb.admit(opened));

        let after = opened + Duration::from_millis(60);
        assert!(cb.admit(after));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        // Only one probe until it resolves.
        assert!(!cb.admit(after));
    }

    #[test]
    fn probe_success_closes_and_resets() {
        let mut cb = breaker(1, 10);
        let opened = Instant::now();
        cb.record_failure(opened);
        assert!(cb.admit(opened + Duration::from_millis(20)));
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failures(), 0);
        assert!(cb.admit(Instant::now()));
    }

    #[test]
    fn probe_failure_reopens_with_fresh_cooldown() {
        let mut cb = breaker(1, 50);
        let opened = Instant::now();
        cb.record_failure(opened);

        let probe_at = opened + Duration::from_millis(60);
        assert!(cb.admit(probe_at));
        assert!(cb.record_failure(probe_at));
        assert_eq!(cb.state(), BreakerState::Open);

        // The old cool-down does not carry over.
        assert!(!cb.admit(probe_at + Duration::from_millis(40)));
        assert!(cb.admit(probe_at + Duration::from_millis(60)));
    }

    #[test]
    fn success_resets_partial_failure_count() {
        let mut cb = breaker(3, 30_000);
        let now = Instant::now();
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_success();
        assert_eq!(cb.failures(), 0);
        cb.record_failure(now);
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
