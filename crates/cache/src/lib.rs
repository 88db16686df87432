//! Content-addressed completion cache with LRU eviction and TTL expiry.
//!
//! Keys are request fingerprints (see [`fingerprint`]); values are the
//! final completion strings. Eviction is LRU by *access* time, not insert
//! time, and exactly one entry is evicted per overflowing insert. Expired
//! entries read as misses and are swept by a periodic scrubber; the read
//! path never deletes.

mod fingerprint;

pub use fingerprint::fingerprint;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

use ra_domain::config::CacheConfig;
use ra_domain::error::Result;
use ra_domain::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry & stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CacheEntry {
    value: String,
    expires_at: Instant,
    last_access: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at < now
    }
}

/// Point-in-time counter snapshot. Counters may lag the entries map
/// slightly; they are never torn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writes: u64,
    pub size: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ResponseCache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory completion cache shared across agent runs.
///
/// Construct with [`ResponseCache::new`] inside a Tokio runtime; the
/// expired-entry scrubber is spawned on construction and stops when the
/// cache is dropped or [`ResponseCache::shutdown`] is called.
pub struct ResponseCache {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
    scrubber: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let cache = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            scrubber: Mutex::new(None),
            config,
        });

        let handle = Self::spawn_scrubber(&cache);
        *cache.scrubber.lock() = Some(handle);
        Ok(cache)
    }

    /// Look up a completion. Expired entries report a miss; the entry is
    /// left in place for the scrubber.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        // The write lock is needed to touch last_access: LRU ordering is
        // by access, not insertion.
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = now;
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                TraceEvent::CacheHit { key: key.to_owned() }.emit();
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                TraceEvent::CacheMiss { key: key.to_owned() }.emit();
                None
            }
        }
    }

    /// Insert a completion. When the cache is full and the key is new, the
    /// least-recently-accessed entry is evicted first — exactly one per
    /// overflowing insert.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) {
        let key = key.into();
        let now = Instant::now();
        let ttl = ttl.unwrap_or(Duration::from_millis(self.config.default_ttl_ms));

        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.config.capacity {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                TraceEvent::CacheEviction { key: lru_key }.emit();
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value: value.into(),
                expires_at: now + ttl,
                last_access: now,
                access_count: 0,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            size: self.entries.read().len(),
        }
    }

    /// Stop the background scrubber.
    pub fn shutdown(&self) {
        if let Some(handle) = self.scrubber.lock().take() {
            handle.abort();
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    /// Sweep expired entries: snapshot candidates under the read lock,
    /// then delete under the write lock, re-checking expiry so a
    /// concurrent overwrite is never lost.
    fn scrub(&self) {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        if candidates.is_empty() {
            return;
        }

        let mut entries = self.entries.write();
        let mut removed = 0usize;
        for key in candidates {
            if entries.get(&key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "scrubbed expired cache entries");
        }
    }

    fn spawn_scrubber(cache: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(cache);
        let interval = Duration::from_millis(cache.config.scrub_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                cache.scrub();
            }
        })
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
