//! The orchestrator: wires rate limiting, caching, memory, the
//! dispatcher, and the ReAct engine around a single user prompt.
//!
//! Pipeline per [`Agent::run`]: admission → cache probe → message
//! assembly → plain completion or ReAct run (with retries on transient
//! failures) → memory persist → cache write → trace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ra_cache::{fingerprint, ResponseCache};
use ra_domain::config::AgentConfig;
use ra_domain::error::{Error, Result};
use ra_domain::{CancelToken, CompletionRequest, Message};
use ra_limiter::RateLimiter;
use ra_memory::{MemoryBackend, MemoryManager};
use ra_providers::{ChunkHandler, Dispatcher};
use ra_react::{ReActEngine, ReActOutcome};
use ra_tools::{ToolExecutor, ToolRegistry};

use crate::retry::backoff_delay;
use crate::trace::RunTrace;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The result of one orchestrated run.
#[derive(Debug)]
pub struct RunOutput {
    /// The final answer text.
    pub text: String,
    /// Whether the answer came from the response cache.
    pub cached: bool,
    /// The full step/metrics/timeline payload for ReAct runs.
    pub react: Option<ReActOutcome>,
    pub trace: RunTrace,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured agent instance.
///
/// Owns the conversation; shares the dispatcher, cache, limiter, and tool
/// registry. Construct inside a Tokio runtime (the cache scrubber and
/// limiter reaper are background tasks).
pub struct Agent {
    config: AgentConfig,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    cache: Option<Arc<ResponseCache>>,
    limiter: Option<Arc<RateLimiter>>,
    memory: MemoryManager,
}

impl Agent {
    /// Validate the config and assemble the agent. The cache and rate
    /// limiter are built from their config sections when present.
    pub fn new(config: AgentConfig, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        config.validate()?;

        let cache = match &config.cache {
            Some(cache_config) => Some(ResponseCache::new(cache_config.clone())?),
            None => None,
        };
        let limiter = match &config.rate_limit {
            Some(limiter_config) => Some(RateLimiter::new(limiter_config.clone())?),
            None => None,
        };
        let registry = Arc::new(ToolRegistry::new());
        let executor = Arc::new(ToolExecutor::new(Arc::clone(&registry), config.tools.clone()));
        let mut memory = MemoryManager::new(&config.memory, None);
        memory
            .history_mut()
            .set_system_prompt(config.system_prompt.clone());

        Ok(Self {
            config,
            dispatcher,
            registry,
            executor,
            cache,
            limiter,
            memory,
        })
    }

    /// Replace the tool registry (and the executor bound to it).
    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.executor = Arc::new(ToolExecutor::new(
            Arc::clone(&registry),
            self.config.tools.clone(),
        ));
        self.registry = registry;
        self
    }

    /// Attach a long-term memory backend.
    pub fn with_memory_backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        let mut memory = MemoryManager::new(&self.config.memory, Some(backend));
        memory
            .history_mut()
            .set_system_prompt(self.config.system_prompt.clone());
        self.memory = memory;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    /// The conversation window (read-only; the orchestrator is the single
    /// writer).
    pub fn history(&self) -> &ra_memory::ConversationHistory {
        self.memory.history()
    }

    pub fn clear_history(&mut self) {
        self.memory.clear();
    }

    // ── Run entry points ─────────────────────────────────────────────

    pub async fn run(&mut self, prompt: &str) -> Result<RunOutput> {
        self.run_with_cancel(prompt, &CancelToken::new()).await
    }

    pub async fn run_with_cancel(
        &mut self,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<RunOutput> {
        self.run_inner(prompt, None, cancel).await
    }

    /// Run a plain (non-ReAct) completion, forwarding partial content to
    /// `on_chunk` as it arrives. Cache hits deliver the whole cached text
    /// as one chunk.
    pub async fn run_streaming(
        &mut self,
        prompt: &str,
        on_chunk: ChunkHandler<'_>,
        cancel: &CancelToken,
    ) -> Result<RunOutput> {
        if self.config.react.is_some() {
            return Err(Error::Configuration(
                "streaming is not available for ReAct runs".into(),
            ));
        }
        self.run_inner(prompt, Some(on_chunk), cancel).await
    }

    // ── The pipeline ─────────────────────────────────────────────────

    async fn run_inner(
        &mut self,
        prompt: &str,
        on_chunk: Option<ChunkHandler<'_>>,
        cancel: &CancelToken,
    ) -> Result<RunOutput> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.request_timeout_ms);
        let mut trace = RunTrace::begin();

        // Admission.
        if let Some(limiter) = &self.limiter {
            limiter
                .wait(self.config.limiter_key.as_deref(), Some(deadline), cancel)
                .await?;
        }

        // Cache probe.
        let key = fingerprint(
            &self.config.model,
            prompt,
            self.config.temperature,
            self.config.system_prompt.as_deref(),
        );
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(&key) {
                if let Some(on_chunk) = on_chunk {
                    on_chunk(&value);
                }
                trace.cache_hit = true;
                return Ok(RunOutput {
                    text: value,
                    cached: true,
                    react: None,
                    trace: trace.finish(),
                });
            }
        }

        // Assemble: seed from long-term memory on first use.
        self.memory.ensure_loaded().await;

        // Plain completion or ReAct, with retries on transient failures.
        let (text, react) = if self.config.react.is_some() {
            let outcome = self.run_react(prompt, deadline, cancel, &mut trace).await?;
            (outcome.answer.clone(), Some(outcome))
        } else {
            let text = self
                .run_single_shot(prompt, on_chunk, deadline, cancel, &mut trace)
                .await?;
            (text, None)
        };

        // An exhausted ReAct run returns its partial payload; it is not a
        // successful turn, so nothing is persisted or cached.
        let succeeded = react.as_ref().map_or(true, |o| o.success);
        if succeeded {
            self.memory
                .record_turn(Message::user(prompt), Message::assistant(text.clone()))
                .await;
            if let Some(cache) = &self.cache {
                cache.set(&key, &text, None);
            }
        }

        Ok(RunOutput {
            text,
            cached: false,
            react,
            trace: trace.finish(),
        })
    }

    async fn run_single_shot(
        &mut self,
        prompt: &str,
        on_chunk: Option<ChunkHandler<'_>>,
        deadline: Instant,
        cancel: &CancelToken,
        trace: &mut crate::trace::RunTraceBuilder,
    ) -> Result<String> {
        let mut req = self.base_request();
        req.system = self.config.system_prompt.clone();
        req.messages = self.memory.history().snapshot();
        req.messages.push(Message::user(prompt));

        let session = self.config.memory.memory_id.clone();

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("run cancelled".into()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "run exceeded {} ms",
                    self.config.request_timeout_ms
                )));
            }
            let remaining = deadline - now;

            let call = async {
                match on_chunk {
                    Some(on_chunk) => {
                        self.dispatcher
                            .stream(&req, on_chunk, cancel, session.as_deref())
                            .await
                    }
                    None => self.dispatcher.dispatch(&req, cancel, session.as_deref()).await,
                }
            };

            let result = match tokio::time::timeout(remaining, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "model call exceeded the remaining {} ms budget",
                    remaining.as_millis()
                ))),
            };

            match result {
                Ok(dispatched) => {
                    trace.iterations += 1;
                    trace.usage.add(&dispatched.response.usage);
                    trace.endpoint = Some(dispatched.endpoint_id);
                    return Ok(dispatched.response.content);
                }
                Err(e) if e.is_retryable() && attempt < self.config.retry.max_retries => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "retryable failure, backing off"
                    );
                    self.backoff(attempt, deadline, cancel).await?;
                    attempt += 1;
                    trace.retries = attempt;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_react(
        &mut self,
        prompt: &str,
        deadline: Instant,
        cancel: &CancelToken,
        trace: &mut crate::trace::RunTraceBuilder,
    ) -> Result<ReActOutcome> {
        let react_config = self
            .config
            .react
            .clone()
            .expect("run_react is only called when react is configured");
        let engine = ReActEngine::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.executor),
            react_config,
        )?;
        let base = self.base_request();

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("run cancelled".into()));
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "run exceeded {} ms",
                    self.config.request_timeout_ms
                )));
            }

            let mut outcome = engine
                .run_with_history(&base, prompt, self.memory.history().messages(), cancel)
                .await;

            if let Some(metrics) = outcome.metrics {
                trace.iterations += metrics.iterations;
                trace.tool_calls += metrics.tool_calls;
                trace.parse_errors += metrics.parse_errors;
                trace.tool_errors += metrics.tool_errors;
            } else {
                trace.iterations += outcome.iterations;
            }

            match outcome.error.take() {
                None => return Ok(outcome),
                Some(e) if e.is_retryable() && attempt < self.config.retry.max_retries => {
                    tracing::warn!(attempt, error = %e, "reasoning run failed, backing off");
                    self.backoff(attempt, deadline, cancel).await?;
                    attempt += 1;
                    trace.retries = attempt;
                }
                // Exhaustion keeps its partial payload; the caller sees
                // the unsuccessful outcome rather than a bare error.
                Some(e @ Error::MaxIterations { .. }) => {
                    outcome.error = Some(e);
                    return Ok(outcome);
                }
                Some(e) => return Err(e),
            }
        }
    }

    async fn backoff(&self, attempt: u32, deadline: Instant, cancel: &CancelToken) -> Result<()> {
        let delay = backoff_delay(&self.config.retry, attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                Err(Error::Timeout("retry budget exhausted".into()))
            }
            _ = cancel.cancelled() => Err(Error::Cancelled("run cancelled".into())),
        }
    }

    fn base_request(&self) -> CompletionRequest {
        CompletionRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            ..Default::default()
        }
    }
}
