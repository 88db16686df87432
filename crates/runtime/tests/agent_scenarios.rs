//! End-to-end scenarios over the full orchestrator with scripted mock
//! adapters — no network, fully deterministic.

use std::sync::Arc;
use std::time::Duration;

use ra_runtime::config::{
    AgentConfig, CacheConfig, DispatcherConfig, RateLimiterConfig, ReActConfig, SelectionStrategy,
    ToolExecutorConfig,
};
use ra_runtime::{
    Agent, CancelToken, Dispatcher, EndpointConfig, Error, FileBackend, MockAdapter,
    ProviderAdapter, RateLimiter, ReActStep, Tool, ToolRegistry,
};

fn single_endpoint_dispatcher(adapter: Arc<MockAdapter>) -> Arc<Dispatcher> {
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
    dispatcher
        .add_endpoint(
            EndpointConfig::new("mock"),
            adapter as Arc<dyn ProviderAdapter>,
        )
        .unwrap();
    dispatcher
}

fn math_tools() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    for (name, op) in [("add", "+"), ("mul", "*")] {
        let op = op.to_owned();
        registry
            .register(Tool::from_fn(
                name,
                format!("{name} two numbers a and b"),
                serde_json::json!({
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"],
                }),
                move |args| {
                    let op = op.clone();
                    async move {
                        let v: serde_json::Value = serde_json::from_str(&args)?;
                        let a = v["a"].as_f64().unwrap_or(0.0);
                        let b = v["b"].as_f64().unwrap_or(0.0);
                        let out = if op == "+" { a + b } else { a * b };
                        Ok(format!("{out}"))
                    }
                },
            ))
            .unwrap();
    }
    Arc::new(registry)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1 — pure answer, cache cold then hot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn pure_answer_cache_cold_then_hot() {
    let adapter = Arc::new(MockAdapter::new("mock").with_reply("pong"));
    let dispatcher = single_endpoint_dispatcher(Arc::clone(&adapter));

    let mut config = AgentConfig::new("echo-model");
    config.system_prompt = Some("You are terse".into());
    config.temperature = Some(0.2);
    config.cache = Some(CacheConfig::default());
    let mut agent = Agent::new(config, dispatcher).unwrap();

    // Cold: one model call, one miss, one write.
    let first = agent.run("ping").await.unwrap();
    assert_eq!(first.text, "pong");
    assert!(!first.cached);
    assert!(!first.trace.cache_hit);
    assert_eq!(adapter.call_count(), 1);

    let stats = agent.cache().unwrap().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.hits, 0);

    // Hot, twice: zero further model calls, two hits total.
    for _ in 0..2 {
        let hot = agent.run("ping").await.unwrap();
        assert_eq!(hot.text, "pong");
        assert!(hot.cached);
        assert!(hot.trace.cache_hit);
    }
    assert_eq!(adapter.call_count(), 1);
    assert_eq!(agent.cache().unwrap().stats().hits, 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2 — two-tool ReAct, parallel executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn two_tool_react_computes_the_product_of_sums() {
    let adapter = Arc::new(
        MockAdapter::new("mock")
            .with_reply("THOUGHT: compute 2+3 first\nACTION: add(a=2, b=3)")
            .with_reply("THOUGHT: now 4+1\nACTION: add(a=4, b=1)")
            .with_reply("THOUGHT: multiply the sums\nACTION: mul(a=5, b=5)")
            .with_reply("THOUGHT: done\nFINAL: (2+3)*(4+1) = 25"),
    );
    let dispatcher = single_endpoint_dispatcher(adapter);

    let mut config = AgentConfig::new("react-model");
    config.tools = ToolExecutorConfig {
        parallel: true,
        ..Default::default()
    };
    config.react = Some(ReActConfig {
        max_iterations: 6,
        ..Default::default()
    });
    let mut agent = Agent::new(config, dispatcher)
        .unwrap()
        .with_tools(math_tools());

    let output = agent
        .run("Using the tools, compute (2+3)*(4+1).")
        .await
        .unwrap();
    assert!(output.text.contains("25"));

    let outcome = output.react.unwrap();
    assert!(outcome.success);
    assert!(outcome.iterations <= 6);

    let kinds: Vec<_> = outcome.steps.iter().map(|s| s.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            "thought",
            "action",
            "observation",
            "thought",
            "action",
            "observation",
            "thought",
            "action",
            "observation",
            "thought",
            "final",
        ]
    );

    let observations: Vec<&str> = outcome
        .steps
        .iter()
        .filter_map(|s| match s {
            ReActStep::Observation { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(observations, vec!["5", "5", "25"]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3 — parse-error self-correction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn parse_error_self_correction_recovers() {
    let adapter = Arc::new(
        MockAdapter::new("mock")
            .with_reply("I think I should add 2 and 3")
            .with_reply("THOUGHT: need to add\nACTION: add(a=2, b=3)")
            .with_reply("FINAL: 5"),
    );
    let dispatcher = single_endpoint_dispatcher(Arc::clone(&adapter));

    let mut config = AgentConfig::new("react-model");
    config.react = Some(ReActConfig::default());
    let mut agent = Agent::new(config, dispatcher)
        .unwrap()
        .with_tools(math_tools());

    let output = agent.run("add 2 and 3").await.unwrap();
    let outcome = output.react.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.answer, "5");
    assert_eq!(outcome.metrics.unwrap().parse_errors, 1);
    assert_eq!(output.trace.parse_errors, 1);

    // The second model call carried the self-correction prompt.
    let correction = adapter.calls()[1].messages.last().unwrap().content.clone();
    assert!(correction.contains("could not be parsed"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4 — tool failure recovery (non-strict)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn flaky_tool_recovers_with_best_effort_answer() {
    let registry = ToolRegistry::new();
    registry
        .register(Tool::from_fn(
            "flaky",
            "looks things up, unreliably",
            serde_json::json!({"type": "object"}),
            |_| async move {
                Err(Error::ToolExecution {
                    tool: "flaky".into(),
                    message: "upstream 503".into(),
                })
            },
        ))
        .unwrap();

    let adapter = Arc::new(
        MockAdapter::new("mock")
            .with_reply("THOUGHT: try the lookup tool\nACTION: flaky(q=\"X\")")
            .with_reply("THOUGHT: the tool is down, I'll answer from general knowledge\nFINAL: X is best described as..."),
    );
    let dispatcher = single_endpoint_dispatcher(adapter);

    let mut config = AgentConfig::new("react-model");
    config.react = Some(ReActConfig::default());
    let mut agent = Agent::new(config, dispatcher)
        .unwrap()
        .with_tools(Arc::new(registry));

    let output = agent
        .run("use flaky to look up X, else reason from general knowledge")
        .await
        .unwrap();
    let outcome = output.react.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.metrics.unwrap().tool_errors, 1);

    let error_obs = outcome
        .steps
        .iter()
        .find_map(|s| match s {
            ReActStep::Observation {
                content,
                is_error: true,
            } => Some(content.as_str()),
            _ => None,
        })
        .unwrap();
    assert!(error_obs.contains("upstream 503"));
    assert!(error_obs.contains("Hint:"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5 — dispatcher fallback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn weighted_fallback_serves_from_the_second_endpoint() {
    let a = Arc::new(
        MockAdapter::new("a")
            .with_error(Error::Transport("connection reset".into()))
            .with_fallback_text("from a"),
    );
    let b = Arc::new(MockAdapter::new("b").with_fallback_text("from b"));

    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig {
        strategy: SelectionStrategy::WeightedRoundRobin,
        ..Default::default()
    }));
    dispatcher
        .add_endpoint(
            EndpointConfig::new("a").with_weight(2.0),
            Arc::clone(&a) as Arc<dyn ProviderAdapter>,
        )
        .unwrap();
    dispatcher
        .add_endpoint(
            EndpointConfig::new("b").with_weight(1.0),
            Arc::clone(&b) as Arc<dyn ProviderAdapter>,
        )
        .unwrap();

    let mut agent = Agent::new(AgentConfig::new("model"), dispatcher.clone()).unwrap();
    let output = agent.run("hello").await.unwrap();
    assert_eq!(output.text, "from b");
    assert_eq!(output.trace.endpoint.as_deref(), Some("b"));

    let snapshot = dispatcher.snapshot();
    let a_snap = snapshot.iter().find(|s| s.id == "a").unwrap();
    let b_snap = snapshot.iter().find(|s| s.id == "b").unwrap();
    assert_eq!(a_snap.errors, 1);
    assert_eq!(a_snap.successes, 0);
    assert_eq!(b_snap.successes, 1);
    assert_eq!(b_snap.errors, 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6 — keyed rate limiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn keyed_limiter_isolates_keys_and_refills() {
    let limiter = RateLimiter::new(RateLimiterConfig {
        rate_per_sec: 2.0,
        burst: 2,
        keyed: true,
        ..Default::default()
    })
    .unwrap();

    // t = 0: both keys admit their burst of two.
    assert!(limiter.allow(Some("k1")));
    assert!(limiter.allow(Some("k1")));
    assert!(limiter.allow(Some("k2")));
    assert!(limiter.allow(Some("k2")));

    // A fifth admission on k1 at t = 0 is denied.
    assert!(!limiter.allow(Some("k1")));

    // At t ~= 0.5 s one token has matured for k1.
    tokio::time::sleep(Duration::from_millis(520)).await;
    assert!(limiter.allow(Some("k1")));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supplemental flows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn rate_limited_agent_rejects_when_the_bucket_is_dry() {
    let adapter = Arc::new(MockAdapter::new("mock").with_fallback_text("ok"));
    let dispatcher = single_endpoint_dispatcher(adapter);

    let mut config = AgentConfig::new("model");
    config.request_timeout_ms = 300;
    config.rate_limit = Some(RateLimiterConfig {
        rate_per_sec: 0.1,
        burst: 1,
        keyed: false,
        ..Default::default()
    });
    let mut agent = Agent::new(config, dispatcher).unwrap();

    agent.run("first").await.unwrap();
    // The bucket is empty and refills at 0.1/s; the run deadline expires
    // while waiting for admission.
    let err = agent.run("second").await.unwrap_err();
    assert_eq!(err.kind(), ra_runtime::ErrorKind::Timeout);
}

#[tokio::test]
async fn retries_recover_from_transient_server_errors() {
    let adapter = Arc::new(
        MockAdapter::new("mock")
            .with_error(Error::Server {
                endpoint: "mock".into(),
                message: "HTTP 500".into(),
            })
            .with_reply("recovered"),
    );
    let dispatcher = single_endpoint_dispatcher(Arc::clone(&adapter));

    let mut config = AgentConfig::new("model");
    config.retry.max_retries = 2;
    config.retry.base_ms = 10;
    let mut agent = Agent::new(config, dispatcher).unwrap();

    let output = agent.run("hello").await.unwrap();
    assert_eq!(output.text, "recovered");
    assert_eq!(output.trace.retries, 1);
    assert_eq!(adapter.call_count(), 2);
}

#[tokio::test]
async fn auth_errors_surface_without_retry() {
    let adapter = Arc::new(
        MockAdapter::new("mock")
            .with_error(Error::Auth("bad key".into()))
            .with_fallback_text("never reached"),
    );
    let dispatcher = single_endpoint_dispatcher(Arc::clone(&adapter));

    let mut config = AgentConfig::new("model");
    config.retry.max_retries = 3;
    let mut agent = Agent::new(config, dispatcher).unwrap();

    let err = agent.run("hello").await.unwrap_err();
    assert_eq!(err.kind(), ra_runtime::ErrorKind::Auth);
    assert_eq!(adapter.call_count(), 1);
}

#[tokio::test]
async fn conversation_persists_across_agents_via_file_memory() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileBackend::new(dir.path()).unwrap());

    let mut config = AgentConfig::new("model");
    config.memory.memory_id = Some("conv-1".into());

    {
        let adapter = Arc::new(MockAdapter::new("mock").with_reply("nice to meet you, Ada"));
        let dispatcher = single_endpoint_dispatcher(adapter);
        let mut agent = Agent::new(config.clone(), dispatcher)
            .unwrap()
            .with_memory_backend(Arc::clone(&backend) as Arc<dyn ra_runtime::MemoryBackend>);
        agent.run("my name is Ada").await.unwrap();
        assert_eq!(agent.history().len(), 2);
    }

    // A fresh agent with the same memory id sees the prior turn and sends
    // it to the model.
    let adapter = Arc::new(MockAdapter::new("mock").with_reply("your name is Ada"));
    let dispatcher = single_endpoint_dispatcher(Arc::clone(&adapter));
    let mut agent = Agent::new(config, dispatcher)
        .unwrap()
        .with_memory_backend(backend as Arc<dyn ra_runtime::MemoryBackend>);

    let output = agent.run("what is my name?").await.unwrap();
    assert_eq!(output.text, "your name is Ada");

    let call = &adapter.calls()[0];
    let contents: Vec<&str> = call.messages.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"my name is Ada"));
    assert!(contents.contains(&"nice to meet you, Ada"));
}

#[tokio::test]
async fn streaming_forwards_chunks_and_returns_the_full_text() {
    let adapter = Arc::new(MockAdapter::new("mock").with_reply("streamed words arrive here"));
    let dispatcher = single_endpoint_dispatcher(adapter);
    let mut agent = Agent::new(AgentConfig::new("model"), dispatcher).unwrap();

    let chunks = std::sync::Mutex::new(Vec::<String>::new());
    let output = agent
        .run_streaming(
            "go",
            &|text| chunks.lock().unwrap().push(text.to_owned()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.text, "streamed words arrive here");
    let chunks = chunks.lock().unwrap();
    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), "streamed words arrive here");
}

#[tokio::test]
async fn cancellation_before_the_model_call_stops_the_run() {
    let adapter = Arc::new(MockAdapter::new("mock").with_fallback_text("never"));
    let dispatcher = single_endpoint_dispatcher(Arc::clone(&adapter));
    let mut agent = Agent::new(AgentConfig::new("model"), dispatcher).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = agent.run_with_cancel("hello", &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(adapter.call_count(), 0);
}

#[tokio::test]
async fn exhausted_react_run_returns_partial_steps_not_an_error() {
    let adapter = Arc::new(MockAdapter::new("mock").with_fallback_text("THOUGHT: hmm"));
    let dispatcher = single_endpoint_dispatcher(adapter);

    let mut config = AgentConfig::new("model");
    config.react = Some(ReActConfig {
        max_iterations: 2,
        ..Default::default()
    });
    let mut agent = Agent::new(config, dispatcher)
        .unwrap()
        .with_tools(math_tools());

    let output = agent.run("impossible task").await.unwrap();
    let outcome = output.react.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.steps.len(), 2);
    assert!(matches!(
        outcome.error,
        Some(Error::MaxIterations { .. })
    ));
    // An unsuccessful turn leaves the conversation window untouched.
    assert_eq!(agent.history().len(), 0);
}
