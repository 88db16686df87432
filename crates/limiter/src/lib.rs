//! Token-bucket admission control for the Reagent runtime.
//!
//! [`RateLimiter`] gates model calls either globally (one bucket) or per
//! caller-supplied key (API key, user id). Buckets refill lazily; keyed
//! buckets are created on first use and garbage-collected by a background
//! reaper once idle. The reaper is the only writer that deletes keys.
//!
//! Three admission styles:
//! - [`RateLimiter::allow`] — non-blocking, consumes a token on success
//! - [`RateLimiter::wait`] — suspends until a token, a deadline, or
//!   cancellation
//! - [`RateLimiter::reserve`] — debits a future slot the caller may cancel

mod bucket;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

use ra_domain::config::RateLimiterConfig;
use ra_domain::error::{Error, Result};
use ra_domain::CancelToken;

use bucket::TokenBucket;

/// Key used for keyed-mode callers that do not supply one.
const DEFAULT_KEY: &str = "default";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot of limiter counters, per key or aggregated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LimiterStats {
    pub allowed: u64,
    pub denied: u64,
    pub waited: u64,
    pub total_wait_ms: u64,
    pub available_tokens: f64,
    pub active_keys: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RateLimiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token-bucket admission controller, global or keyed.
///
/// Construct with [`RateLimiter::new`] inside a Tokio runtime; keyed mode
/// spawns the idle-key reaper on construction.
pub struct RateLimiter {
    config: RateLimiterConfig,
    global: Mutex<TokenBucket>,
    keys: RwLock<HashMap<String, TokenBucket>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Validate the config and build the limiter. Invalid configuration
    /// fails construction.
    pub fn new(config: RateLimiterConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let limiter = Arc::new(Self {
            global: Mutex::new(TokenBucket::new(config.rate_per_sec, config.burst)),
            keys: RwLock::new(HashMap::new()),
            reaper: Mutex::new(None),
            config,
        });

        if limiter.config.keyed {
            let handle = Self::spawn_reaper(&limiter);
            *limiter.reaper.lock() = Some(handle);
        }
        Ok(limiter)
    }

    /// Non-blocking admission: consumes one token on success, never waits.
    pub fn allow(&self, key: Option<&str>) -> bool {
        let now = Instant::now();
        let granted = self.with_bucket(key, |bucket| match bucket.take_or_delay(now) {
            None => {
                bucket.allowed += 1;
                true
            }
            Some(_) => {
                bucket.denied += 1;
                false
            }
        });
        if !granted {
            ra_domain::TraceEvent::RateLimitDenied {
                key: key.map(str::to_owned),
            }
            .emit();
        }
        granted
    }

    /// Suspend until a token is available, the deadline passes, or the
    /// cancellation signal fires.
    ///
    /// A configured per-call `wait_timeout_ms` bounds the wait even when
    /// the caller's deadline is farther out; the tighter bound wins.
    pub async fn wait(
        &self,
        key: Option<&str>,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = match self.config.wait_timeout_ms {
            Some(ms) => {
                let cap = started + Duration::from_millis(ms);
                Some(deadline.map_or(cap, |d| d.min(cap)))
            }
            None => deadline,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("rate limiter wait cancelled".into()));
            }

            let now = Instant::now();
            let delay = self.with_bucket(key, |bucket| bucket.take_or_delay(now));
            let Some(delay) = delay else {
                let waited_ms = started.elapsed().as_millis() as u64;
                self.with_bucket(key, |bucket| {
                    bucket.waited += 1;
                    bucket.total_wait_ms += waited_ms;
                });
                if waited_ms > 0 {
                    ra_domain::TraceEvent::RateLimitWaited {
                        key: key.map(str::to_owned),
                        waited_ms,
                    }
                    .emit();
                }
                return Ok(());
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = deadline_sleep(deadline) => {
                    return Err(Error::Timeout(format!(
                        "rate limiter wait exceeded deadline after {} ms",
                        started.elapsed().as_millis()
                    )));
                }
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled("rate limiter wait cancelled".into()));
                }
            }
        }
    }

    /// Debit a future admission slot. The reservation reports the delay
    /// until the slot matures; cancelling returns the token.
    pub fn reserve(self: &Arc<Self>, key: Option<&str>) -> Reservation {
        let now = Instant::now();
        let delay = self.with_bucket(key, |bucket| {
            bucket.allowed += 1;
            bucket.reserve_one(now)
        });
        Reservation {
            delay,
            limiter: Arc::downgrade(self),
            key: key.map(str::to_owned),
            active: true,
        }
    }

    /// Counter snapshot. With a key, that bucket's counters; without one,
    /// the global bucket (or the aggregate over all keys in keyed mode).
    pub fn stats(&self, key: Option<&str>) -> LimiterStats {
        let now = Instant::now();
        if !self.config.keyed {
            let mut bucket = self.global.lock();
            return LimiterStats {
                allowed: bucket.allowed,
                denied: bucket.denied,
                waited: bucket.waited,
                total_wait_ms: bucket.total_wait_ms,
                available_tokens: bucket.available(now),
                active_keys: 0,
            };
        }

        let mut keys = self.keys.write();
        match key {
            Some(k) => {
                let rate = self.config.rate_per_sec;
                let burst = self.config.burst;
                let bucket = keys
                    .entry(k.to_owned())
                    .or_insert_with(|| TokenBucket::new(rate, burst));
                let stats = LimiterStats {
                    allowed: bucket.allowed,
                    denied: bucket.denied,
                    waited: bucket.waited,
                    total_wait_ms: bucket.total_wait_ms,
                    available_tokens: bucket.available(now),
                    active_keys: 0,
                };
                LimiterStats {
                    active_keys: keys.len(),
                    ..stats
                }
            }
            None => {
                let active_keys = keys.len();
                let mut agg = LimiterStats {
                    active_keys,
                    ..Default::default()
                };
                for bucket in keys.values_mut() {
                    agg.allowed += bucket.allowed;
                    agg.denied += bucket.denied;
                    agg.waited += bucket.waited;
                    agg.total_wait_ms += bucket.total_wait_ms;
                    agg.available_tokens += bucket.available(now);
                }
                agg
            }
        }
    }

    /// Stop the background reaper.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    fn with_bucket<T>(&self, key: Option<&str>, f: impl FnOnce(&mut TokenBucket) -> T) -> T {
        if !self.config.keyed {
            return f(&mut self.global.lock());
        }
        let key = key.unwrap_or(DEFAULT_KEY);
        let mut keys = self.keys.write();
        let bucket = keys
            .entry(key.to_owned())
            .or_insert_with(|| TokenBucket::new(self.config.rate_per_sec, self.config.burst));
        f(bucket)
    }

    fn refund(&self, key: Option<&str>) {
        self.with_bucket(key, |bucket| {
            bucket.allowed = bucket.allowed.saturating_sub(1);
            bucket.refund_one();
        });
    }

    fn spawn_reaper(limiter: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(limiter);
        let idle = Duration::from_millis(limiter.config.idle_timeout_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(idle);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else { break };
                let cutoff = Instant::now() - idle;
                let mut keys = limiter.keys.write();
                let before = keys.len();
                keys.retain(|_, bucket| bucket.last_access > cutoff);
                let reaped = before - keys.len();
                if reaped > 0 {
                    tracing::debug!(reaped, remaining = keys.len(), "reaped idle limiter keys");
                }
            }
        })
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending::<()>().await,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reservation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A debited future admission slot.
#[must_use = "a reservation holds a token until used or cancelled"]
pub struct Reservation {
    delay: Duration,
    limiter: std::sync::Weak<RateLimiter>,
    key: Option<String>,
    active: bool,
}

impl Reservation {
    /// How long until the reserved token matures. Zero means immediately
    /// usable.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Suspend until the reserved slot matures.
    pub async fn ready(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Cancel the reservation, returning the token to the bucket.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            if let Some(limiter) = self.limiter.upgrade() {
                limiter.refund(self.key.as_deref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: f64, burst: u32, keyed: bool) -> RateLimiterConfig {
        RateLimiterConfig {
            rate_per_sec: rate,
            burst,
            keyed,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn invalid_config_fails_construction() {
        assert!(RateLimiter::new(config(0.0, 1, false)).is_err());
        assert!(RateLimiter::new(config(1.0, 0, false)).is_err());
    }

    #[tokio::test]
    async fn global_bucket_enforces_burst() {
        let limiter = RateLimiter::new(config(1.0, 2, false)).unwrap();
        assert!(limiter.allow(None));
        assert!(limiter.allow(None));
        assert!(!limiter.allow(None));

        let stats = limiter.stats(None);
        assert_eq!(stats.allowed, 2);
        assert_eq!(stats.denied, 1);
    }

    #[tokio::test]
    async fn keyed_buckets_are_independent() {
        let limiter = RateLimiter::new(config(2.0, 2, true)).unwrap();
        assert!(limiter.allow(Some("k1")));
        assert!(limiter.allow(Some("k1")));
        assert!(limiter.allow(Some("k2")));
        assert!(limiter.allow(Some("k2")));
        assert!(!limiter.allow(Some("k1")));

        let stats = limiter.stats(Some("k1"));
        assert_eq!(stats.allowed, 2);
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.active_keys, 2);
    }

    #[tokio::test]
    async fn wait_succeeds_once_a_token_refills() {
        let limiter = RateLimiter::new(config(20.0, 1, false)).unwrap();
        let cancel = CancelToken::new();
        assert!(limiter.allow(None));

        // 20/sec refills within 50 ms; wait should come back ok.
        limiter
            .wait(None, Some(Instant::now() + Duration::from_secs(2)), &cancel)
            .await
            .unwrap();

        let stats = limiter.stats(None);
        assert_eq!(stats.waited, 1);
    }

    #[tokio::test]
    async fn wait_times_out_at_deadline() {
        let limiter = RateLimiter::new(config(0.1, 1, false)).unwrap();
        let cancel = CancelToken::new();
        assert!(limiter.allow(None));

        // Next token is 10 s away; a 50 ms deadline must time out.
        let err = limiter
            .wait(None, Some(Instant::now() + Duration::from_millis(50)), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ra_domain::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn wait_timeout_config_bounds_caller_deadline() {
        let mut cfg = config(0.1, 1, false);
        cfg.wait_timeout_ms = Some(50);
        let limiter = RateLimiter::new(cfg).unwrap();
        let cancel = CancelToken::new();
        assert!(limiter.allow(None));

        let started = Instant::now();
        let err = limiter
            .wait(None, Some(Instant::now() + Duration::from_secs(30)), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ra_domain::ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wait_observes_cancellation() {
        let limiter = RateLimiter::new(config(0.1, 1, false)).unwrap();
        let cancel = CancelToken::new();
        assert!(limiter.allow(None));

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.wait(None, None, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn reserve_and_cancel_returns_token() {
        let limiter = RateLimiter::new(config(1.0, 1, false)).unwrap();

        let first = limiter.reserve(None);
        assert_eq!(first.delay(), Duration::ZERO);

        // Bucket is now empty; a second reservation matures later.
        let second = limiter.reserve(None);
        assert!(second.delay() > Duration::from_millis(500));

        // Cancelling the second returns its token: an allow still fails
        // (first reservation holds the only token) but the deficit is gone.
        second.cancel();
        assert!(!limiter.allow(None));
        first.cancel();
        assert!(limiter.allow(None));
    }

    #[tokio::test]
    async fn reaper_evicts_idle_keys() {
        let mut cfg = config(10.0, 2, true);
        cfg.idle_timeout_ms = 30;
        let limiter = RateLimiter::new(cfg).unwrap();

        assert!(limiter.allow(Some("ephemeral")));
        assert_eq!(limiter.stats(None).active_keys, 1);

        // Two reaper intervals with no access.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(limiter.stats(None).active_keys, 0);
    }
}
