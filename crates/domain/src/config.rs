//! Configuration structs for every runtime component.
//!
//! All structs deserialize from TOML with serde defaults, so a config file
//! only has to name what it overrides. Durations are integer milliseconds.
//! `validate()` methods fail fast with specific messages.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent (top-level)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Top-level configuration for one agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier sent to the dispatcher (e.g. `"gpt-4o-mini"`).
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Overall wall-clock budget for one `run()` call.
    #[serde(default = "d_120000")]
    pub request_timeout_ms: u64,
    /// Rate-limit key for this agent (user id, API key). `None` uses the
    /// limiter's global bucket.
    #[serde(default)]
    pub limiter_key: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// When present, admission is gated by a rate limiter.
    #[serde(default)]
    pub rate_limit: Option<RateLimiterConfig>,
    /// When present, completions are served from / written to a cache.
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub tools: ToolExecutorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// When present, runs go through the ReAct engine instead of a plain
    /// completion.
    #[serde(default)]
    pub react: Option<ReActConfig>,
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            request_timeout_ms: 120_000,
            limiter_key: None,
            retry: RetryConfig::default(),
            rate_limit: None,
            cache: None,
            tools: ToolExecutorConfig::default(),
            memory: MemoryConfig::default(),
            react: None,
        }
    }

    /// Load and validate a config from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AgentConfig = toml::from_str(&raw)
            .map_err(|e| Error::Configuration(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(Error::Configuration("model must not be empty".into()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::Configuration(format!(
                    "temperature must be in [0, 2], got {t}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::Configuration(format!(
                    "top_p must be in [0, 1], got {p}"
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Configuration(
                "request_timeout_ms must be > 0".into(),
            ));
        }
        if let Some(ref rl) = self.rate_limit {
            rl.validate()?;
        }
        if let Some(ref cache) = self.cache {
            cache.validate()?;
        }
        self.tools.validate()?;
        if let Some(ref react) = self.react {
            react.validate()?;
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Sleep `base_ms` between attempts.
    Fixed,
    /// Double `base_ms` each attempt, capped at `cap_ms`.
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_2")]
    pub max_retries: u32,
    #[serde(default = "d_backoff")]
    pub backoff: BackoffKind,
    #[serde(default = "d_500")]
    pub base_ms: u64,
    #[serde(default = "d_10000")]
    pub cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffKind::Exponential,
            base_ms: 500,
            cap_ms: 10_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Refill rate in tokens per second. Must be > 0.
    pub rate_per_sec: f64,
    /// Bucket capacity. Must be >= 1.
    pub burst: u32,
    /// When true, one bucket per caller-supplied key; when false, one
    /// global bucket gates every admission.
    #[serde(default)]
    pub keyed: bool,
    /// Idle keyed buckets are reaped after this long.
    #[serde(default = "d_300000")]
    pub idle_timeout_ms: u64,
    /// When set, bounds every `wait()` even if the caller's deadline is
    /// farther out.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 10.0,
            burst: 10,
            keyed: false,
            idle_timeout_ms: 300_000,
            wait_timeout_ms: None,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rate_per_sec > 0.0) {
            return Err(Error::Configuration(format!(
                "rate_per_sec must be > 0, got {}",
                self.rate_per_sec
            )));
        }
        if self.burst < 1 {
            return Err(Error::Configuration("burst must be >= 1".into()));
        }
        if self.idle_timeout_ms == 0 {
            return Err(Error::Configuration("idle_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    #[serde(default = "d_1000")]
    pub capacity: usize,
    /// TTL applied to writes that do not specify their own.
    #[serde(default = "d_3600000")]
    pub default_ttl_ms: u64,
    /// How often the scrubber sweeps expired entries.
    #[serde(default = "d_60000")]
    pub scrub_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_ttl_ms: 3_600_000,
            scrub_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Configuration("cache capacity must be >= 1".into()));
        }
        if self.default_ttl_ms == 0 {
            return Err(Error::Configuration("default_ttl_ms must be > 0".into()));
        }
        if self.scrub_interval_ms == 0 {
            return Err(Error::Configuration("scrub_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutorConfig {
    /// When true, tool calls within one batch run concurrently.
    #[serde(default)]
    pub parallel: bool,
    /// Cap on concurrent handler invocations in parallel mode.
    #[serde(default = "d_10usize")]
    pub max_workers: usize,
    /// Per-call timeout.
    #[serde(default = "d_30000")]
    pub call_timeout_ms: u64,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_workers: 10,
            call_timeout_ms: 30_000,
        }
    }
}

impl ToolExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Configuration("max_workers must be >= 1".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::Configuration("call_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Stable identifier of the persisted conversation. When set, the
    /// long-term backend is consulted on first use.
    #[serde(default)]
    pub memory_id: Option<String>,
    /// Write the conversation to the backend after every successful turn.
    /// Defaults to on when a memory_id is set.
    #[serde(default)]
    pub auto_save: Option<bool>,
    /// Short-term history cap; oldest messages are dropped first. The
    /// system prompt is held separately and never counted.
    #[serde(default)]
    pub max_messages: Option<usize>,
}

impl MemoryConfig {
    /// Effective auto-save flag: defaults to on when a memory id is set.
    pub fn auto_save_enabled(&self) -> bool {
        self.auto_save.unwrap_or(self.memory_id.is_some())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Endpoint selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastLoad,
    FastestResponse,
    Random,
    Priority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "d_3")]
    pub failure_threshold: u32,
    /// How long an open breaker skips the endpoint before half-open.
    #[serde(default = "d_30000")]
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "d_30000")]
    pub interval_ms: u64,
    /// Budget for one probe request.
    #[serde(default = "d_5000")]
    pub timeout_ms: u64,
    /// Model id used for probe requests. When absent, the background
    /// health loop does not run and endpoint status is driven solely by
    /// in-band request outcomes.
    #[serde(default)]
    pub probe_model: Option<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
            probe_model: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// Fallback hop bound. `None` means one attempt per endpoint.
    #[serde(default)]
    pub max_fallbacks: Option<u32>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub health: HealthCheckConfig,
    /// RNG seed for the `random` strategy; fixed seeds make tests
    /// deterministic.
    #[serde(default)]
    pub seed: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ReAct engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A few-shot example rendered into the ReAct system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActExample {
    pub task: String,
    /// The full THOUGHT/ACTION/OBSERVATION/FINAL transcript to demonstrate.
    pub transcript: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActConfig {
    /// Upper bound on model calls per run. Range 1-100.
    #[serde(default = "d_5")]
    pub max_iterations: u32,
    /// Wall-clock budget for one run. Range 1 s - 10 min.
    #[serde(default = "d_60000")]
    pub timeout_ms: u64,
    /// In strict mode, parse failures and tool errors abort the run
    /// instead of being repaired in-band.
    #[serde(default)]
    pub strict: bool,
    /// Custom system prompt template. `{tools}` and `{examples}`
    /// placeholders are substituted.
    #[serde(default)]
    pub system_prompt_template: Option<String>,
    #[serde(default)]
    pub examples: Vec<ReActExample>,
    #[serde(default = "d_true")]
    pub collect_metrics: bool,
    #[serde(default)]
    pub collect_timeline: bool,
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            timeout_ms: 60_000,
            strict: false,
            system_prompt_template: None,
            examples: Vec::new(),
            collect_metrics: true,
            collect_timeline: false,
        }
    }
}

impl ReActConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.max_iterations) {
            return Err(Error::Configuration(format!(
                "max_iterations must be in [1, 100], got {}",
                self.max_iterations
            )));
        }
        if !(1_000..=600_000).contains(&self.timeout_ms) {
            return Err(Error::Configuration(format!(
                "timeout_ms must be in [1000, 600000], got {}",
                self.timeout_ms
            )));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_2() -> u32 {
    2
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_500() -> u64 {
    500
}
fn d_5000() -> u64 {
    5_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_120000() -> u64 {
    120_000
}
fn d_300000() -> u64 {
    300_000
}
fn d_3600000() -> u64 {
    3_600_000
}
fn d_1000() -> usize {
    1000
}
fn d_10usize() -> usize {
    10
}
fn d_backoff() -> BackoffKind {
    BackoffKind::Exponential
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_config_validates_ranges() {
        let mut cfg = AgentConfig::new("gpt-4o-mini");
        assert!(cfg.validate().is_ok());

        cfg.temperature = Some(3.0);
        assert!(cfg.validate().is_err());
        cfg.temperature = Some(0.2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_model_rejected() {
        let cfg = AgentConfig::new("");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn limiter_config_rejects_zero_rate() {
        let cfg = RateLimiterConfig {
            rate_per_sec: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn limiter_config_rejects_zero_burst() {
        let cfg = RateLimiterConfig {
            burst: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn react_config_bounds() {
        let mut cfg = ReActConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.max_iterations = 0;
        assert!(cfg.validate().is_err());
        cfg.max_iterations = 101;
        assert!(cfg.validate().is_err());
        cfg.max_iterations = 100;
        cfg.timeout_ms = 500;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auto_save_defaults_follow_memory_id() {
        let mut cfg = MemoryConfig::default();
        assert!(!cfg.auto_save_enabled());
        cfg.memory_id = Some("conv-1".into());
        assert!(cfg.auto_save_enabled());
        cfg.auto_save = Some(false);
        assert!(!cfg.auto_save_enabled());
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let cfg: AgentConfig = toml::from_str("model = \"gpt-4o-mini\"").unwrap();
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.retry.max_retries, 2);
        assert_eq!(cfg.tools.max_workers, 10);
        assert_eq!(cfg.tools.call_timeout_ms, 30_000);
        assert!(cfg.react.is_none());
        assert!(cfg.cache.is_none());
    }
}
