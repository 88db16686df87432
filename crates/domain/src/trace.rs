//! Structured trace events emitted across all Reagent crates.

use serde::Serialize;

/// Structured trace events emitted across all Reagent crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
    CacheEviction {
        key: String,
    },
    RateLimitWaited {
        key: Option<String>,
        waited_ms: u64,
    },
    RateLimitDenied {
        key: Option<String>,
    },
    LlmRequest {
        endpoint: String,
        model: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_endpoint: String,
        to_endpoint: String,
        reason: String,
    },
    EndpointStateChanged {
        endpoint: String,
        from: String,
        to: String,
    },
    BreakerOpened {
        endpoint: String,
        failures: u32,
    },
    BreakerClosed {
        endpoint: String,
    },
    ToolDispatched {
        tool: String,
        duration_ms: u64,
        is_error: bool,
    },
    MemorySaved {
        memory_id: String,
        messages: usize,
    },
    MemoryLoaded {
        memory_id: String,
        messages: usize,
    },
    RunCompleted {
        run_id: String,
        duration_ms: u64,
        iterations: u32,
        cache_hit: bool,
        retries: u32,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ra_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = TraceEvent::CacheHit { key: "abc".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"CacheHit\""));
        assert!(json.contains("\"key\":\"abc\""));
    }

    #[test]
    fn emit_does_not_panic_without_subscriber() {
        TraceEvent::RunCompleted {
            run_id: "r1".into(),
            duration_ms: 10,
            iterations: 1,
            cache_hit: false,
            retries: 0,
        }
        .emit();
    }
}
