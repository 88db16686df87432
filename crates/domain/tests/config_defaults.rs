//! Round-trip tests for config loading: a TOML file with partial overrides
//! must deserialize with every unnamed field at its documented default.

use ra_domain::config::{AgentConfig, BackoffKind, SelectionStrategy};

#[test]
fn full_config_round_trip_from_file() {
    let toml = r#"
model = "gpt-4o-mini"
system_prompt = "You are terse"
temperature = 0.2

[retry]
max_retries = 4
backoff = "fixed"
base_ms = 250

[rate_limit]
rate_per_sec = 2.0
burst = 2
keyed = true

[cache]
capacity = 64

[tools]
parallel = true
max_workers = 4

[memory]
memory_id = "conv-42"

[react]
max_iterations = 8
strict = false
"#;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, toml).unwrap();

    let cfg = AgentConfig::from_toml_file(&path).unwrap();
    assert_eq!(cfg.model, "gpt-4o-mini");
    assert_eq!(cfg.temperature, Some(0.2));
    assert_eq!(cfg.retry.max_retries, 4);
    assert_eq!(cfg.retry.backoff, BackoffKind::Fixed);
    assert_eq!(cfg.retry.base_ms, 250);
    // Unnamed retry field keeps its default.
    assert_eq!(cfg.retry.cap_ms, 10_000);

    let rl = cfg.rate_limit.as_ref().unwrap();
    assert!(rl.keyed);
    assert_eq!(rl.burst, 2);
    assert_eq!(rl.idle_timeout_ms, 300_000);

    let cache = cfg.cache.as_ref().unwrap();
    assert_eq!(cache.capacity, 64);
    assert_eq!(cache.default_ttl_ms, 3_600_000);
    assert_eq!(cache.scrub_interval_ms, 60_000);

    assert!(cfg.tools.parallel);
    assert_eq!(cfg.tools.max_workers, 4);
    assert_eq!(cfg.tools.call_timeout_ms, 30_000);

    assert_eq!(cfg.memory.memory_id.as_deref(), Some("conv-42"));
    assert!(cfg.memory.auto_save_enabled());

    let react = cfg.react.as_ref().unwrap();
    assert_eq!(react.max_iterations, 8);
    assert_eq!(react.timeout_ms, 60_000);
    assert!(!react.strict);
    assert!(react.collect_metrics);
}

#[test]
fn invalid_config_file_fails_with_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    std::fs::write(&path, "model = \"m\"\ntemperature = 9.0").unwrap();

    let err = AgentConfig::from_toml_file(&path).unwrap_err();
    assert!(err.to_string().contains("temperature"));
}

#[test]
fn strategy_names_deserialize_snake_case() {
    #[derive(serde::Deserialize)]
    struct Wrapper {
        strategy: SelectionStrategy,
    }

    for (name, expected) in [
        ("round_robin", SelectionStrategy::RoundRobin),
        ("weighted_round_robin", SelectionStrategy::WeightedRoundRobin),
        ("least_load", SelectionStrategy::LeastLoad),
        ("fastest_response", SelectionStrategy::FastestResponse),
        ("random", SelectionStrategy::Random),
        ("priority", SelectionStrategy::Priority),
    ] {
        let w: Wrapper = toml::from_str(&format!("strategy = \"{name}\"")).unwrap();
        assert_eq!(w.strategy, expected);
    }
}
