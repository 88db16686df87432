//! Key-value long-term memory backend.
//!
//! [`KvStore`] is the narrow surface a distributed store (Redis and
//! friends) needs to offer: string get/set with TTL, delete, and prefix
//! key listing. [`KvBackend`] layers the memory contract on top, with
//! namespaced keys and a default TTL of seven days. [`InMemoryKv`] is the
//! in-tree implementation used by tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use ra_domain::error::Result;
use ra_domain::Message;

use crate::backend::MemoryBackend;

/// Default TTL for persisted conversations: 7 days.
pub const DEFAULT_KV_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KvStore trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Minimal keyed string storage with expiry.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Keys starting with `prefix`, in no particular order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-local [`KvStore`] with lazy expiry.
#[derive(Default)]
pub struct InMemoryKv {
    entries: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_expired(expires_at: &Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| at < now)
}

#[async_trait::async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|(_, expires)| !is_expired(expires, now))
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.write().insert(key.to_owned(), (value, expires_at));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(k, (_, expires))| k.starts_with(prefix) && !is_expired(expires, now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KvBackend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memory backend over any [`KvStore`], with a key namespace and TTL.
pub struct KvBackend {
    store: Arc<dyn KvStore>,
    prefix: String,
    ttl: Duration,
}

impl KvBackend {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl: DEFAULT_KV_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key_for(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }
}

#[async_trait::async_trait]
impl MemoryBackend for KvBackend {
    async fn load(&self, id: &str) -> Result<Option<Vec<Message>>> {
        let Some(raw) = self.store.get(&self.key_for(id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(Some(messages)),
            Err(e) => {
                tracing::warn!(memory_id = %id, error = %e, "unreadable kv memory blob, starting fresh");
                Ok(None)
            }
        }
    }

    async fn save(&self, id: &str, messages: &[Message]) -> Result<()> {
        let json = serde_json::to_string(messages)?;
        self.store.set(&self.key_for(id), json, Some(self.ttl)).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.store.del(&self.key_for(id)).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let namespace = format!("{}:", self.prefix);
        let mut ids: Vec<String> = self
            .store
            .keys(&namespace)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&namespace).map(str::to_owned))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
