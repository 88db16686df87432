//! Step records, metrics, and run outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ra_domain::Error;

/// One step of a ReAct run, in emission order. Observations always
/// immediately follow the action that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReActStep {
    Thought {
        content: String,
    },
    Action {
        tool: String,
        args: serde_json::Map<String, serde_json::Value>,
    },
    Observation {
        content: String,
        is_error: bool,
    },
    Final {
        content: String,
    },
}

impl ReActStep {
    pub fn kind(&self) -> &'static str {
        match self {
            ReActStep::Thought { .. } => "thought",
            ReActStep::Action { .. } => "action",
            ReActStep::Observation { .. } => "observation",
            ReActStep::Final { .. } => "final",
        }
    }
}

/// Counters collected when `collect_metrics` is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReActMetrics {
    pub iterations: u32,
    pub tool_calls: u32,
    pub parse_errors: u32,
    pub tool_errors: u32,
    pub duration_ms: u64,
}

/// One timeline entry, recorded for every transition when
/// `collect_timeline` is on.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub kind: String,
    pub content: String,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

/// The result of one ReAct run. Failures are carried in-band so the
/// partial step list survives; `error` is `None` on success.
#[derive(Debug, Default)]
pub struct ReActOutcome {
    pub answer: String,
    pub success: bool,
    pub steps: Vec<ReActStep>,
    pub iterations: u32,
    pub metrics: Option<ReActMetrics>,
    pub timeline: Option<Vec<TimelineEvent>>,
    pub error: Option<Error>,
}

impl ReActOutcome {
    /// Total token usage is tracked by the orchestrator's trace; the
    /// outcome itself records reasoning structure only.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}
