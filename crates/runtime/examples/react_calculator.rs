//! A self-contained ReAct run over a scripted mock backend.
//!
//! Run with: `cargo run -p ra-runtime --example react_calculator`

use std::sync::Arc;

use ra_runtime::config::{AgentConfig, DispatcherConfig, ReActConfig};
use ra_runtime::{
    Agent, Dispatcher, EndpointConfig, MockAdapter, ProviderAdapter, Tool, ToolRegistry,
};

#[tokio::main]
async fn main() -> ra_runtime::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // A scripted model: in production this is an OpenAiCompatAdapter.
    let adapter = Arc::new(
        MockAdapter::new("scripted")
            .with_reply("THOUGHT: compute 2+3 first\nACTION: add(a=2, b=3)")
            .with_reply("THOUGHT: now 4+1\nACTION: add(a=4, b=1)")
            .with_reply("THOUGHT: multiply the sums\nACTION: mul(a=5, b=5)")
            .with_reply("FINAL: (2+3)*(4+1) = 25"),
    );
    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
    dispatcher.add_endpoint(
        EndpointConfig::new("scripted"),
        adapter as Arc<dyn ProviderAdapter>,
    )?;

    let registry = ToolRegistry::new();
    for (name, f) in [
        ("add", (|a, b| a + b) as fn(f64, f64) -> f64),
        ("mul", |a, b| a * b),
    ] {
        registry.register(Tool::from_fn(
            name,
            format!("{name} two numbers a and b"),
            serde_json::json!({
                "type": "object",
                "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                "required": ["a", "b"],
            }),
            move |args| async move {
                let v: serde_json::Value = serde_json::from_str(&args)?;
                let a = v["a"].as_f64().unwrap_or(0.0);
                let b = v["b"].as_f64().unwrap_or(0.0);
                Ok(format!("{}", f(a, b)))
            },
        ))?;
    }

    let mut config = AgentConfig::new("calc-model");
    config.react = Some(ReActConfig {
        collect_timeline: true,
        ..Default::default()
    });

    let mut agent = Agent::new(config, dispatcher)?.with_tools(Arc::new(registry));
    let output = agent.run("Using the tools, compute (2+3)*(4+1).").await?;

    let outcome = output.react.expect("react was configured");
    for step in &outcome.steps {
        println!("{step:?}");
    }
    println!("\nanswer: {}", output.text);
    println!(
        "iterations: {}, duration: {} ms",
        output.trace.iterations, output.trace.duration_ms
    );
    Ok(())
}
