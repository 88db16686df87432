//! Reagent — an LLM agent runtime.
//!
//! Coordinates one or more model backends to perform multi-step
//! reasoning tasks, invoke tools, and maintain conversational state.
//! This crate is the public surface: it hosts the orchestrator and
//! re-exports the leaf crates.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ra_runtime::{Agent, Dispatcher, EndpointConfig, OpenAiCompatAdapter, OpenAiCompatConfig};
//! use ra_runtime::config::{AgentConfig, DispatcherConfig};
//!
//! # async fn example() -> ra_runtime::Result<()> {
//! let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
//! let adapter = OpenAiCompatAdapter::new(OpenAiCompatConfig::new(
//!     "openai", "https://api.openai.com/v1", std::env::var("OPENAI_API_KEY").unwrap(),
//! ))?;
//! dispatcher.add_endpoint(EndpointConfig::new("openai"), Arc::new(adapter))?;
//!
//! let mut agent = Agent::new(AgentConfig::new("gpt-4o-mini"), dispatcher)?;
//! let output = agent.run("What is the capital of France?").await?;
//! println!("{}", output.text);
//! # Ok(())
//! # }
//! ```

pub mod orchestrator;
pub(crate) mod retry;
pub mod trace;

pub use orchestrator::{Agent, RunOutput};
pub use trace::RunTrace;

// The leaf crates, re-exported for client programs.
pub use ra_cache::{fingerprint, CacheStats, ResponseCache};
pub use ra_domain::{
    config, CancelToken, CompletionRequest, CompletionResponse, Error, ErrorKind, FinishReason,
    Message, ResponseFormat, Result, Role, ToolCallRequest, ToolCallResult, ToolChoice,
    ToolDefinition, TraceEvent, Usage,
};
pub use ra_limiter::{LimiterStats, RateLimiter, Reservation};
pub use ra_memory::{
    ConversationHistory, FileBackend, InMemoryKv, KvBackend, KvStore, MemoryBackend, MemoryManager,
};
pub use ra_providers::{
    spawn_health_checks, Dispatched, Dispatcher, EndpointConfig, EndpointSnapshot, EndpointStatus,
    MockAdapter, MockReply, OpenAiCompatAdapter, OpenAiCompatConfig, ProviderAdapter,
};
pub use ra_react::{ReActEngine, ReActMetrics, ReActOutcome, ReActStep, TimelineEvent};
pub use ra_tools::{Tool, ToolExecutor, ToolHandler, ToolRegistry};
