//! The tool-call executor: sequential or bounded-parallel dispatch with
//! per-call timeouts, panic capture, and request-order results.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;

use ra_domain::config::ToolExecutorConfig;
use ra_domain::{CancelToken, ToolCallRequest, ToolCallResult, TraceEvent};

use crate::registry::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs batches of tool-call requests against a registry.
///
/// Results always come back in request order, one per request, regardless
/// of completion order. A failing, missing, panicking, or timed-out tool
/// produces an error-typed result — never an executor-level error.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ToolExecutorConfig,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: ToolExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a batch of requests. Sequential by default; concurrent and
    /// capped at `max_workers` when `parallel` is configured.
    pub async fn execute(
        &self,
        requests: &[ToolCallRequest],
        cancel: &CancelToken,
    ) -> Vec<ToolCallResult> {
        if requests.is_empty() {
            return Vec::new();
        }
        if self.config.parallel && requests.len() > 1 {
            self.execute_parallel(requests, cancel).await
        } else {
            self.execute_sequential(requests, cancel).await
        }
    }

    async fn execute_sequential(
        &self,
        requests: &[ToolCallRequest],
        cancel: &CancelToken,
    ) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            if cancel.is_cancelled() {
                results.push(cancelled_result(request));
                continue;
            }
            results.push(self.run_one(request.clone(), cancel).await);
        }
        results
    }

    /// Spawn one task per request behind a shared semaphore, then join in
    /// request order. Joining in order is what guarantees
    /// `out[i].id == requests[i].id` no matter how the scheduler
    /// interleaves completions.
    async fn execute_parallel(
        &self,
        requests: &[ToolCallRequest],
        cancel: &CancelToken,
    ) -> Vec<ToolCallResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));

        let handles: Vec<_> = requests
            .iter()
            .map(|request| {
                let request = request.clone();
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                let registry = Arc::clone(&self.registry);
                let timeout = Duration::from_millis(self.config.call_timeout_ms);
                tokio::spawn(async move {
                    let permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit,
                        _ = cancel.cancelled() => return cancelled_result(&request),
                    };
                    // Semaphore::acquire only fails when closed, which we never do.
                    let _permit = match permit {
                        Ok(p) => p,
                        Err(_) => return cancelled_result(&request),
                    };
                    run_request(&registry, request, timeout, &cancel).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(requests.len());
        for (handle, request) in handles.into_iter().zip(requests) {
            match handle.await {
                Ok(result) => results.push(result),
                // The outer task never panics itself; treat a lost task
                // like a failed tool so the batch stays complete.
                Err(e) => results.push(error_result(
                    request,
                    Utc::now(),
                    format!("tool task failed: {e}"),
                )),
            }
        }
        results
    }

    async fn run_one(&self, request: ToolCallRequest, cancel: &CancelToken) -> ToolCallResult {
        run_request(
            &self.registry,
            request,
            Duration::from_millis(self.config.call_timeout_ms),
            cancel,
        )
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single invocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_request(
    registry: &ToolRegistry,
    request: ToolCallRequest,
    timeout: Duration,
    cancel: &CancelToken,
) -> ToolCallResult {
    let started_at = Utc::now();

    let Some(tool) = registry.get(&request.name) else {
        return error_result(
            &request,
            started_at,
            format!("tool '{}' is not registered", request.name),
        );
    };

    let handler = tool.handler();
    let args = request.arguments.clone();
    // The handler runs in its own task so a panic is contained and
    // reported as an error result instead of unwinding the executor.
    let mut call = tokio::spawn(async move { handler.call(&args).await });

    let outcome = tokio::select! {
        joined = &mut call => Some(joined),
        _ = tokio::time::sleep(timeout) => None,
        _ = cancel.cancelled() => {
            call.abort();
            let ended_at = Utc::now();
            return ToolCallResult {
                id: request.id.clone(),
                content: String::new(),
                error: Some("tool call cancelled".into()),
                started_at,
                ended_at,
                duration_ms: duration_ms(started_at, ended_at),
            };
        }
    };

    let result = match outcome {
        None => {
            call.abort();
            error_result(
                &request,
                started_at,
                format!("tool '{}' timed out after {} ms", request.name, timeout.as_millis()),
            )
        }
        Some(Err(join_err)) if join_err.is_panic() => error_result(
            &request,
            started_at,
            format!("tool '{}' panicked: {join_err}", request.name),
        ),
        Some(Err(join_err)) => error_result(
            &request,
            started_at,
            format!("tool '{}' aborted: {join_err}", request.name),
        ),
        Some(Ok(Err(e))) => error_result(&request, started_at, e.to_string()),
        Some(Ok(Ok(content))) => {
            let ended_at = Utc::now();
            ToolCallResult {
                id: request.id.clone(),
                content,
                error: None,
                started_at,
                ended_at,
                duration_ms: duration_ms(started_at, ended_at),
            }
        }
    };

    TraceEvent::ToolDispatched {
        tool: request.name.clone(),
        duration_ms: result.duration_ms,
        is_error: result.is_error(),
    }
    .emit();
    result
}

fn error_result(
    request: &ToolCallRequest,
    started_at: chrono::DateTime<Utc>,
    message: String,
) -> ToolCallResult {
    let ended_at = Utc::now();
    ToolCallResult {
        id: request.id.clone(),
        content: String::new(),
        error: Some(message),
        started_at,
        ended_at,
        duration_ms: duration_ms(started_at, ended_at),
    }
}

fn cancelled_result(request: &ToolCallRequest) -> ToolCallResult {
    let now = Utc::now();
    ToolCallResult {
        id: request.id.clone(),
        content: String::new(),
        error: Some("tool call cancelled".into()),
        started_at: now,
        ended_at: now,
        duration_ms: 0,
    }
}

fn duration_ms(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}
