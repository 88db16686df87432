//! Endpoint records held by the dispatcher.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;

use ra_domain::config::BreakerConfig;
use ra_domain::error::{Error, Result};

use crate::breaker::CircuitBreaker;
use crate::traits::ProviderAdapter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
    Disabled,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Unknown => "unknown",
            EndpointStatus::Healthy => "healthy",
            EndpointStatus::Degraded => "degraded",
            EndpointStatus::Unhealthy => "unhealthy",
            EndpointStatus::Disabled => "disabled",
        }
    }

    /// One observation step of the endpoint state machine, shared by the
    /// health loop and in-band request outcomes. A single failure after
    /// prior success only degrades; the second failure escalates.
    pub fn observe(self, ok: bool) -> EndpointStatus {
        match (self, ok) {
            (EndpointStatus::Disabled, _) => EndpointStatus::Disabled,
            (_, true) => EndpointStatus::Healthy,
            (EndpointStatus::Healthy, false) => EndpointStatus::Degraded,
            (EndpointStatus::Degraded, false) => EndpointStatus::Unhealthy,
            (EndpointStatus::Unknown, false) => EndpointStatus::Unhealthy,
            (EndpointStatus::Unhealthy, false) => EndpointStatus::Unhealthy,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config & record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static settings for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub id: String,
    /// Selection weight; must be positive.
    pub weight: f64,
    /// Cap on concurrent calls to this endpoint; 0 means unlimited.
    pub max_concurrency: usize,
}

impl EndpointConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            weight: 1.0,
            max_concurrency: 0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Configuration("endpoint id must not be empty".into()));
        }
        if !(self.weight > 0.0) {
            return Err(Error::Configuration(format!(
                "endpoint '{}' weight must be positive, got {}",
                self.id, self.weight
            )));
        }
        Ok(())
    }
}

/// Mutable endpoint record inside the dispatcher registry.
pub(crate) struct Endpoint {
    pub(crate) id: String,
    pub(crate) adapter: Arc<dyn ProviderAdapter>,
    pub(crate) weight: f64,
    pub(crate) status: EndpointStatus,
    pub(crate) successes: u64,
    pub(crate) errors: u64,
    pub(crate) last_latency: Option<Duration>,
    pub(crate) breaker: CircuitBreaker,
    /// Gauge of calls currently in flight; shared with call guards so it
    /// stays accurate without holding the registry lock.
    pub(crate) in_flight: Arc<AtomicUsize>,
    pub(crate) semaphore: Option<Arc<Semaphore>>,
    /// Smooth weighted round-robin accumulator.
    pub(crate) current_weight: f64,
}

impl Endpoint {
    pub(crate) fn new(
        config: EndpointConfig,
        adapter: Arc<dyn ProviderAdapter>,
        breaker: &BreakerConfig,
    ) -> Self {
        let semaphore = if config.max_concurrency > 0 {
            Some(Arc::new(Semaphore::new(config.max_concurrency)))
        } else {
            None
        };
        Self {
            id: config.id,
            adapter,
            weight: config.weight,
            status: EndpointStatus::Unknown,
            successes: 0,
            errors: 0,
            last_latency: None,
            breaker: CircuitBreaker::new(breaker),
            in_flight: Arc::new(AtomicUsize::new(0)),
            semaphore,
            current_weight: 0.0,
        }
    }

    pub(crate) fn selectable(&self) -> bool {
        self.status != EndpointStatus::Disabled
    }

    pub(crate) fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            id: self.id.clone(),
            status: self.status,
            weight: self.weight,
            in_flight: self.in_flight.load(std::sync::atomic::Ordering::Relaxed),
            successes: self.successes,
            errors: self.errors,
            consecutive_failures: self.breaker.failures(),
            last_latency_ms: self.last_latency.map(|d| d.as_millis() as u64),
            breaker_open: self.breaker.is_open(),
        }
    }
}

/// Read-only view of one endpoint for observability.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub status: EndpointStatus,
    pub weight: f64,
    pub in_flight: usize,
    pub successes: u64,
    pub errors: u64,
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u64>,
    pub breaker_open: bool,
}
