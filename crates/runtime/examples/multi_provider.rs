//! Two OpenAI-compatible endpoints behind a weighted dispatcher with
//! health checking, caching, and a keyed rate limit.
//!
//! Needs `OPENAI_API_KEY` (and optionally `FALLBACK_BASE_URL` +
//! `FALLBACK_API_KEY` for the second endpoint):
//! `cargo run -p ra-runtime --example multi_provider`

use std::sync::Arc;

use ra_runtime::config::{
    AgentConfig, CacheConfig, DispatcherConfig, HealthCheckConfig, RateLimiterConfig,
    SelectionStrategy,
};
use ra_runtime::{
    spawn_health_checks, Agent, Dispatcher, EndpointConfig, OpenAiCompatAdapter,
    OpenAiCompatConfig, ProviderAdapter,
};

#[tokio::main]
async fn main() -> ra_runtime::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| ra_runtime::Error::Auth("OPENAI_API_KEY is not set".into()))?;

    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig {
        strategy: SelectionStrategy::WeightedRoundRobin,
        health: HealthCheckConfig {
            // Probing needs a model the endpoints actually serve.
            probe_model: Some("gpt-4o-mini".into()),
            ..Default::default()
        },
        ..Default::default()
    }));

    let primary = OpenAiCompatAdapter::new(OpenAiCompatConfig::new(
        "openai",
        "https://api.openai.com/v1",
        api_key,
    ))?;
    dispatcher.add_endpoint(
        EndpointConfig::new("openai").with_weight(2.0).with_max_concurrency(8),
        Arc::new(primary) as Arc<dyn ProviderAdapter>,
    )?;

    if let (Ok(base_url), Ok(key)) = (
        std::env::var("FALLBACK_BASE_URL"),
        std::env::var("FALLBACK_API_KEY"),
    ) {
        let fallback =
            OpenAiCompatAdapter::new(OpenAiCompatConfig::new("fallback", base_url, key))?;
        dispatcher.add_endpoint(
            EndpointConfig::new("fallback").with_weight(1.0),
            Arc::new(fallback) as Arc<dyn ProviderAdapter>,
        )?;
    }

    let _health = spawn_health_checks(&dispatcher);

    let mut config = AgentConfig::new("gpt-4o-mini");
    config.system_prompt = Some("You are terse.".into());
    config.temperature = Some(0.2);
    config.cache = Some(CacheConfig::default());
    config.rate_limit = Some(RateLimiterConfig {
        rate_per_sec: 2.0,
        burst: 4,
        keyed: false,
        ..Default::default()
    });

    let mut agent = Agent::new(config, Arc::clone(&dispatcher))?;

    for prompt in ["In one word: what is the capital of France?"; 2] {
        let output = agent.run(prompt).await?;
        println!(
            "[cached={} endpoint={:?}] {}",
            output.cached, output.trace.endpoint, output.text
        );
    }

    for endpoint in dispatcher.snapshot() {
        println!(
            "endpoint {}: status={:?} ok={} err={} latency={:?}ms",
            endpoint.id,
            endpoint.status,
            endpoint.successes,
            endpoint.errors,
            endpoint.last_latency_ms
        );
    }
    Ok(())
}
