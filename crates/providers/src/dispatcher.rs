//! Multi-provider dispatcher.
//!
//! Holds an ordered set of endpoints and routes each request through one
//! of them according to the configured strategy, skipping endpoints whose
//! circuit breaker is open and preferring healthy over degraded over
//! merely-enabled. On a request-time error the dispatcher falls back to
//! the next endpoint, up to a bounded number of hops, and surfaces an
//! aggregate error once every hop has failed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Semaphore;

use ra_domain::config::{DispatcherConfig, SelectionStrategy};
use ra_domain::error::{Error, Result};
use ra_domain::{CancelToken, CompletionRequest, CompletionResponse, TraceEvent};

use crate::endpoint::{Endpoint, EndpointConfig, EndpointSnapshot, EndpointStatus};
use crate::traits::{ChunkHandler, ProviderAdapter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A successful dispatch plus routing detail for traces.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub response: CompletionResponse,
    /// The endpoint that served the request.
    pub endpoint_id: String,
    /// Total endpoint attempts, including the successful one.
    pub attempts: u32,
}

/// Everything one attempt needs, cloned out of the registry lock so no
/// lock is held across the call.
struct AttemptPlan {
    endpoint_id: String,
    adapter: Arc<dyn ProviderAdapter>,
    semaphore: Option<Arc<Semaphore>>,
    in_flight: Arc<AtomicUsize>,
}

#[derive(Clone, Copy)]
enum CallMode<'a> {
    Complete,
    Stream(ChunkHandler<'a>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Dispatcher {
    config: DispatcherConfig,
    endpoints: RwLock<Vec<Endpoint>>,
    rr_cursor: AtomicUsize,
    /// session-id → endpoint id, recorded on success.
    sticky: Mutex<HashMap<String, String>>,
    rng: Mutex<StdRng>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            endpoints: RwLock::new(Vec::new()),
            rr_cursor: AtomicUsize::new(0),
            sticky: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // ── Endpoint administration ──────────────────────────────────────

    pub fn add_endpoint(
        &self,
        config: EndpointConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<()> {
        config.validate()?;
        let mut endpoints = self.endpoints.write();
        if endpoints.iter().any(|e| e.id == config.id) {
            return Err(Error::Configuration(format!(
                "endpoint '{}' is already registered",
                config.id
            )));
        }
        endpoints.push(Endpoint::new(config, adapter, &self.config.breaker));
        Ok(())
    }

    pub fn remove_endpoint(&self, id: &str) -> bool {
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|e| e.id != id);
        before != endpoints.len()
    }

    /// Admin enable/disable. Disabling takes the endpoint out of every
    /// selection; re-enabling returns it as `unknown` until observed.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut endpoints = self.endpoints.write();
        let Some(endpoint) = endpoints.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        let target = if enabled {
            EndpointStatus::Unknown
        } else {
            EndpointStatus::Disabled
        };
        set_status(endpoint, target);
        true
    }

    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        self.endpoints.read().iter().map(|e| e.snapshot()).collect()
    }

    pub fn endpoint_status(&self, id: &str) -> Option<EndpointStatus> {
        self.endpoints.read().iter().find(|e| e.id == id).map(|e| e.status)
    }

    /// Drop the sticky endpoint binding for a session.
    pub fn release_session(&self, session: &str) {
        self.sticky.lock().remove(session);
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Route a completion request. `session` pins subsequent requests with
    /// the same id to the endpoint that last served it, while selectable.
    pub async fn complete(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
        session: Option<&str>,
    ) -> Result<CompletionResponse> {
        self.dispatch(req, cancel, session).await.map(|d| d.response)
    }

    /// Like [`Dispatcher::complete`], returning routing detail.
    pub async fn dispatch(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
        session: Option<&str>,
    ) -> Result<Dispatched> {
        self.dispatch_inner(req, cancel, session, CallMode::Complete)
            .await
    }

    /// Route a streaming completion request.
    pub async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: ChunkHandler<'_>,
        cancel: &CancelToken,
        session: Option<&str>,
    ) -> Result<Dispatched> {
        self.dispatch_inner(req, cancel, session, CallMode::Stream(on_chunk))
            .await
    }

    async fn dispatch_inner(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
        session: Option<&str>,
        mode: CallMode<'_>,
    ) -> Result<Dispatched> {
        req.validate()?;
        let endpoint_count = self.endpoints.read().len();
        if endpoint_count == 0 {
            return Err(Error::Configuration("no endpoints configured".into()));
        }
        let max_hops = self
            .config
            .max_fallbacks
            .map(|n| n as usize + 1)
            .unwrap_or(endpoint_count);

        let mut excluded: Vec<String> = Vec::new();
        let mut last_err: Option<Error> = None;
        let mut attempts: u32 = 0;
        let mut prev_endpoint: Option<String> = None;

        for hop in 0..max_hops {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("dispatch cancelled".into()));
            }

            // The first hop honors a sticky binding when one exists and the
            // endpoint is still selectable.
            let plan = if hop == 0 {
                session
                    .and_then(|s| self.sticky_plan(s, &excluded))
                    .or_else(|| self.select(&excluded))
            } else {
                self.select(&excluded)
            };
            let Some(plan) = plan else { break };

            if let Some(ref from) = prev_endpoint {
                TraceEvent::LlmFallback {
                    from_endpoint: from.clone(),
                    to_endpoint: plan.endpoint_id.clone(),
                    reason: last_err
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unavailable".into()),
                }
                .emit();
            }

            attempts += 1;

            // Queue behind the endpoint's concurrency cap when it has one.
            let _permit = match &plan.semaphore {
                Some(semaphore) => {
                    let permit = tokio::select! {
                        permit = Arc::clone(semaphore).acquire_owned() => permit,
                        _ = cancel.cancelled() => {
                            return Err(Error::Cancelled("dispatch cancelled".into()));
                        }
                    };
                    match permit {
                        Ok(p) => Some(p),
                        Err(_) => {
                            excluded.push(plan.endpoint_id.clone());
                            continue;
                        }
                    }
                }
                None => None,
            };

            plan.in_flight.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let result = match mode {
                CallMode::Complete => plan.adapter.complete(req, cancel).await,
                CallMode::Stream(on_chunk) => plan.adapter.stream(req, on_chunk, cancel).await,
            };
            let latency = started.elapsed();
            plan.in_flight.fetch_sub(1, Ordering::Relaxed);

            match result {
                Ok(response) => {
                    self.record_success(&plan.endpoint_id, latency);
                    if let Some(session) = session {
                        self.sticky
                            .lock()
                            .insert(session.to_owned(), plan.endpoint_id.clone());
                    }
                    TraceEvent::LlmRequest {
                        endpoint: plan.endpoint_id.clone(),
                        model: req.model.clone(),
                        duration_ms: latency.as_millis() as u64,
                        prompt_tokens: Some(response.usage.prompt_tokens),
                        completion_tokens: Some(response.usage.completion_tokens),
                    }
                    .emit();
                    return Ok(Dispatched {
                        response,
                        endpoint_id: plan.endpoint_id,
                        attempts,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    self.record_failure(&plan.endpoint_id);
                    tracing::warn!(
                        endpoint = %plan.endpoint_id,
                        error = %e,
                        hop,
                        "endpoint failed, consulting fallbacks"
                    );
                    prev_endpoint = Some(plan.endpoint_id.clone());
                    excluded.push(plan.endpoint_id);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(last) => Err(Error::Exhausted {
                attempts,
                last: Box::new(last),
            }),
            // Nothing was even attemptable: every endpoint is disabled or
            // breaker-open. Backing off and retrying is the right reaction.
            None => Err(Error::RateLimit(
                "no selectable endpoint (all disabled or breakers open)".into(),
            )),
        }
    }

    // ── Selection ────────────────────────────────────────────────────

    fn sticky_plan(&self, session: &str, excluded: &[String]) -> Option<AttemptPlan> {
        let bound = self.sticky.lock().get(session).cloned()?;
        if excluded.iter().any(|id| *id == bound) {
            return None;
        }
        let now = Instant::now();
        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints.iter_mut().find(|e| e.id == bound)?;
        if !endpoint.selectable() || !endpoint.breaker.admit(now) {
            return None;
        }
        Some(plan_of(endpoint))
    }

    fn select(&self, excluded: &[String]) -> Option<AttemptPlan> {
        let now = Instant::now();
        let mut endpoints = self.endpoints.write();

        let eligible: Vec<usize> = endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.selectable()
                    && !excluded.iter().any(|id| *id == e.id)
                    && e.breaker.would_admit(now)
            })
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return None;
        }

        // Health tiers: healthy (and not-yet-observed) endpoints first,
        // then degraded, then anything still enabled.
        let tier = |statuses: &[EndpointStatus]| -> Vec<usize> {
            eligible
                .iter()
                .copied()
                .filter(|&i| statuses.contains(&endpoints[i].status))
                .collect()
        };
        let mut candidates = tier(&[EndpointStatus::Healthy, EndpointStatus::Unknown]);
        if candidates.is_empty() {
            candidates = tier(&[EndpointStatus::Degraded]);
        }
        if candidates.is_empty() {
            candidates = eligible;
        }

        // Prefer endpoints with spare concurrency; only queue when every
        // candidate is saturated.
        let spare: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| {
                endpoints[i]
                    .semaphore
                    .as_ref()
                    .map_or(true, |s| s.available_permits() > 0)
            })
            .collect();
        if !spare.is_empty() {
            candidates = spare;
        }

        let chosen = self.apply_strategy(&mut endpoints[..], &candidates);
        let endpoint = &mut endpoints[chosen];
        // Holding the write lock, so the admit cannot race the filter.
        if !endpoint.breaker.admit(now) {
            return None;
        }
        Some(plan_of(endpoint))
    }

    fn apply_strategy(&self, endpoints: &mut [Endpoint], candidates: &[usize]) -> usize {
        debug_assert!(!candidates.is_empty());
        match self.config.strategy {
            SelectionStrategy::RoundRobin => {
                let cursor = self.rr_cursor.fetch_add(1, Ordering::Relaxed);
                candidates[cursor % candidates.len()]
            }
            SelectionStrategy::WeightedRoundRobin => {
                // Smooth weighted round-robin: every candidate gains its
                // weight, the leader serves and pays back the total.
                let total: f64 = candidates.iter().map(|&i| endpoints[i].weight).sum();
                for &i in candidates {
                    endpoints[i].current_weight += endpoints[i].weight;
                }
                let chosen = candidates
                    .iter()
                    .copied()
                    .max_by(|&a, &b| {
                        endpoints[a]
                            .current_weight
                            .partial_cmp(&endpoints[b].current_weight)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| endpoints[b].id.cmp(&endpoints[a].id))
                    })
                    .unwrap_or(candidates[0]);
                endpoints[chosen].current_weight -= total;
                chosen
            }
            SelectionStrategy::LeastLoad => candidates
                .iter()
                .copied()
                .min_by_key(|&i| {
                    let e = &endpoints[i];
                    (
                        e.in_flight.load(Ordering::Relaxed),
                        e.breaker.failures(),
                        e.last_latency.unwrap_or_default(),
                    )
                })
                .unwrap_or(candidates[0]),
            SelectionStrategy::FastestResponse => candidates
                .iter()
                .copied()
                .min_by_key(|&i| endpoints[i].last_latency.unwrap_or_default())
                .unwrap_or(candidates[0]),
            SelectionStrategy::Random => {
                let pick = self.rng.lock().gen_range(0..candidates.len());
                candidates[pick]
            }
            SelectionStrategy::Priority => candidates
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    endpoints[a]
                        .weight
                        .partial_cmp(&endpoints[b].weight)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| endpoints[b].id.cmp(&endpoints[a].id))
                })
                .unwrap_or(candidates[0]),
        }
    }

    // ── Outcome bookkeeping ──────────────────────────────────────────

    fn record_success(&self, id: &str, latency: std::time::Duration) {
        let mut endpoints = self.endpoints.write();
        if let Some(endpoint) = endpoints.iter_mut().find(|e| e.id == id) {
            endpoint.successes += 1;
            endpoint.last_latency = Some(latency);
            if endpoint.breaker.is_open() || endpoint.breaker.state()
                == crate::breaker::BreakerState::HalfOpen
            {
                TraceEvent::BreakerClosed {
                    endpoint: id.to_owned(),
                }
                .emit();
            }
            endpoint.breaker.record_success();
            let next = endpoint.status.observe(true);
            set_status(endpoint, next);
        }
    }

    fn record_failure(&self, id: &str) {
        let now = Instant::now();
        let mut endpoints = self.endpoints.write();
        if let Some(endpoint) = endpoints.iter_mut().find(|e| e.id == id) {
            endpoint.errors += 1;
            if endpoint.breaker.record_failure(now) {
                TraceEvent::BreakerOpened {
                    endpoint: id.to_owned(),
                    failures: endpoint.breaker.failures(),
                }
                .emit();
            }
            let next = endpoint.status.observe(false);
            set_status(endpoint, next);
        }
    }

    /// Apply a health-probe observation (used by the health loop).
    pub(crate) fn apply_health_observation(&self, id: &str, ok: bool) {
        let mut endpoints = self.endpoints.write();
        if let Some(endpoint) = endpoints.iter_mut().find(|e| e.id == id) {
            let next = endpoint.status.observe(ok);
            set_status(endpoint, next);
        }
    }

    /// (id, adapter) pairs of every non-disabled endpoint, for the health
    /// loop.
    pub(crate) fn probe_targets(&self) -> Vec<(String, Arc<dyn ProviderAdapter>)> {
        self.endpoints
            .read()
            .iter()
            .filter(|e| e.selectable())
            .map(|e| (e.id.clone(), Arc::clone(&e.adapter)))
            .collect()
    }
}

fn plan_of(endpoint: &Endpoint) -> AttemptPlan {
    AttemptPlan {
        endpoint_id: endpoint.id.clone(),
        adapter: Arc::clone(&endpoint.adapter),
        semaphore: endpoint.semaphore.clone(),
        in_flight: Arc::clone(&endpoint.in_flight),
    }
}

fn set_status(endpoint: &mut Endpoint, next: EndpointStatus) {
    if endpoint.status != next {
        TraceEvent::EndpointStateChanged {
            endpoint: endpoint.id.clone(),
            from: endpoint.status.as_str().to_owned(),
            to: next.as_str().to_owned(),
        }
        .emit();
        tracing::info!(
            endpoint = %endpoint.id,
            from = endpoint.status.as_str(),
            to = next.as_str(),
            "endpoint status changed"
        );
        endpoint.status = next;
    }
}
