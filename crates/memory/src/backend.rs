//! The pluggable long-term memory interface.

use ra_domain::error::Result;
use ra_domain::Message;

/// A durable store of conversation histories keyed by memory id.
///
/// Implementations must be idempotent under concurrent calls with distinct
/// ids. Concurrent saves to the same id may interleave; the backend must
/// leave a consistent state — typically an atomic replace of the whole
/// blob.
#[async_trait::async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Load the conversation for `id`, or `None` when absent.
    async fn load(&self, id: &str) -> Result<Option<Vec<Message>>>;

    /// Persist the conversation for `id`, replacing any previous value.
    async fn save(&self, id: &str, messages: &[Message]) -> Result<()>;

    /// Remove the conversation for `id`. Deleting a missing id is not an
    /// error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// All stored memory ids.
    async fn list(&self) -> Result<Vec<String>>;
}
