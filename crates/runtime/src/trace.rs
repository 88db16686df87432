//! Per-run trace records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use ra_domain::Usage;

/// The timeline and counters of one orchestrated run, returned in the
/// result payload and emitted as a trace event.
#[derive(Debug, Clone, Serialize)]
pub struct RunTrace {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Model calls made (1 for a plain completion).
    pub iterations: u32,
    pub tool_calls: u32,
    pub parse_errors: u32,
    pub tool_errors: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cache_hit: bool,
    /// Endpoint that served a plain completion; `None` for cache hits and
    /// ReAct runs (which may span endpoints).
    pub endpoint: Option<String>,
    pub retries: u32,
}

impl RunTrace {
    pub(crate) fn begin() -> RunTraceBuilder {
        RunTraceBuilder {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            iterations: 0,
            tool_calls: 0,
            parse_errors: 0,
            tool_errors: 0,
            usage: Usage::default(),
            cache_hit: false,
            endpoint: None,
            retries: 0,
        }
    }
}

/// Accumulates trace fields while a run progresses.
pub(crate) struct RunTraceBuilder {
    pub(crate) run_id: Uuid,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) iterations: u32,
    pub(crate) tool_calls: u32,
    pub(crate) parse_errors: u32,
    pub(crate) tool_errors: u32,
    pub(crate) usage: Usage,
    pub(crate) cache_hit: bool,
    pub(crate) endpoint: Option<String>,
    pub(crate) retries: u32,
}

impl RunTraceBuilder {
    pub(crate) fn finish(self) -> RunTrace {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - self.started_at).num_milliseconds().max(0) as u64;
        let trace = RunTrace {
            run_id: self.run_id,
            started_at: self.started_at,
            ended_at,
            duration_ms,
            iterations: self.iterations,
            tool_calls: self.tool_calls,
            parse_errors: self.parse_errors,
            tool_errors: self.tool_errors,
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            total_tokens: self.usage.total_tokens,
            cache_hit: self.cache_hit,
            endpoint: self.endpoint,
            retries: self.retries,
        };
        ra_domain::TraceEvent::RunCompleted {
            run_id: trace.run_id.to_string(),
            duration_ms: trace.duration_ms,
            iterations: trace.iterations,
            cache_hit: trace.cache_hit,
            retries: trace.retries,
        }
        .emit();
        trace
    }
}
