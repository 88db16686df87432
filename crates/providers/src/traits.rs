//! The adapter contract every model backend implements.

use ra_domain::error::Result;
use ra_domain::{CancelToken, CompletionRequest, CompletionResponse};

/// Callback invoked with each partial content chunk during streaming.
/// Adapters invoke it from one logical context at a time.
pub type ChunkHandler<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Trait that every model backend adapter must implement.
///
/// Implementations translate the unified [`CompletionRequest`] into their
/// backend's native wire shape — including tool schemas, tool-choice, and
/// response-format hints — and classify failures into the domain error
/// taxonomy so upper layers can decide retry and fallback policy.
///
/// Tool-call ids emitted by the model must round-trip unchanged: any id in
/// a response must be returnable to that model in a subsequent tool-role
/// message.
///
/// Adapters are shared across concurrent calls; internal state must be
/// safe under parallel use.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send a completion request and wait for the full response.
    async fn complete(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse>;

    /// Send a completion request, invoking `on_chunk` zero or more times as
    /// partial content arrives, and return the accumulated final response.
    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: ChunkHandler<'_>,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse>;

    /// A unique identifier for this adapter instance.
    fn id(&self) -> &str;
}
