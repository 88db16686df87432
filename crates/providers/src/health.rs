//! Background endpoint health checking.
//!
//! A single task pings every non-disabled endpoint at a fixed interval
//! with a trivial one-token completion, bounded by the health-check
//! timeout, and feeds the outcome into the endpoint state machine. The
//! one-strike tolerance (healthy → degraded → unhealthy) lives in
//! [`EndpointStatus::observe`](crate::endpoint::EndpointStatus::observe).
//!
//! Probes need a real model id: `probe_model` must be configured, or the
//! loop does not start and endpoints are judged by in-band request
//! outcomes alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use ra_domain::{CancelToken, CompletionRequest, Message};

use crate::dispatcher::Dispatcher;

/// Build the trivial probe request.
fn probe_request(model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_owned(),
        messages: vec![Message::user("ping")],
        max_tokens: Some(1),
        ..Default::default()
    }
}

/// Spawn the health-check loop for a dispatcher.
///
/// Returns `None` (and spawns nothing) when `probe_model` is not
/// configured — probing with a made-up model id would mark every healthy
/// endpoint unhealthy. The task holds a weak reference and exits when the
/// dispatcher is dropped; abort the handle for an earlier stop.
pub fn spawn_health_checks(dispatcher: &Arc<Dispatcher>) -> Option<JoinHandle<()>> {
    let health = dispatcher.config().health.clone();
    let Some(model) = health.probe_model.clone() else {
        tracing::debug!("health checks disabled: no probe_model configured");
        return None;
    };

    let weak = Arc::downgrade(dispatcher);
    let interval = Duration::from_millis(health.interval_ms.max(1));
    let timeout = Duration::from_millis(health.timeout_ms);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately so endpoints leave `unknown`
        // without waiting a full interval.
        loop {
            ticker.tick().await;
            let Some(dispatcher) = weak.upgrade() else { break };

            let req = probe_request(&model);
            for (id, adapter) in dispatcher.probe_targets() {
                let cancel = CancelToken::new();
                let outcome =
                    tokio::time::timeout(timeout, adapter.complete(&req, &cancel)).await;
                let ok = matches!(outcome, Ok(Ok(_)));
                if !ok {
                    tracing::debug!(endpoint = %id, "health probe failed");
                }
                dispatcher.apply_health_observation(&id, ok);
            }
        }
    }))
}
