//! Scripted mock adapter.
//!
//! The deterministic test backbone: replies are queued up front and
//! consumed one per call. A reply can be plain text, a full response, or
//! an error to exercise fallback and retry paths. Optional artificial
//! latency makes timeout behavior testable; the call log lets tests
//! assert on what the dispatcher actually sent.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use ra_domain::error::{Error, Result};
use ra_domain::{CancelToken, CompletionRequest, CompletionResponse};

use crate::traits::{ChunkHandler, ProviderAdapter};

/// One scripted reply.
pub enum MockReply {
    /// A plain text completion.
    Text(String),
    /// A fully specified response.
    Response(CompletionResponse),
    /// Fail the call with this error.
    Fail(Error),
}

/// A scripted [`ProviderAdapter`] for tests and examples.
pub struct MockAdapter {
    id: String,
    script: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<CompletionRequest>>,
    latency: Option<Duration>,
    /// Served when the script runs dry; `None` makes exhaustion an error.
    fallback_text: Option<String>,
}

impl MockAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            latency: None,
            fallback_text: None,
        }
    }

    /// Queue a plain text reply.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(MockReply::Text(text.into()));
        self
    }

    /// Queue a full response.
    pub fn with_response(self, response: CompletionResponse) -> Self {
        self.script.lock().push_back(MockReply::Response(response));
        self
    }

    /// Queue an error.
    pub fn with_error(self, error: Error) -> Self {
        self.script.lock().push_back(MockReply::Fail(error));
        self
    }

    /// Sleep this long before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serve this text whenever the script is empty instead of erroring.
    pub fn with_fallback_text(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = Some(text.into());
        self
    }

    /// Append a reply after construction (shared-adapter tests).
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    /// Requests seen so far, in call order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_reply(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        match self.script.lock().pop_front() {
            Some(MockReply::Text(text)) => Ok(CompletionResponse::text(text, req.model.clone())),
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Fail(error)) => Err(error),
            None => match &self.fallback_text {
                Some(text) => Ok(CompletionResponse::text(text.clone(), req.model.clone())),
                None => Err(Error::Server {
                    endpoint: self.id.clone(),
                    message: "mock script exhausted".into(),
                }),
            },
        }
    }

    async fn respond(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse> {
        self.calls.lock().push(req.clone());
        if let Some(latency) = self.latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled(format!("mock '{}' cancelled", self.id)));
                }
            }
        } else if cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("mock '{}' cancelled", self.id)));
        }
        self.next_reply(req)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for MockAdapter {
    async fn complete(
        &self,
        req: &CompletionRequest,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse> {
        self.respond(req, cancel).await
    }

    async fn stream(
        &self,
        req: &CompletionRequest,
        on_chunk: ChunkHandler<'_>,
        cancel: &CancelToken,
    ) -> Result<CompletionResponse> {
        let response = self.respond(req, cancel).await?;
        // Chunk on whitespace boundaries so callers see several deltas.
        let mut rest = response.content.as_str();
        while !rest.is_empty() {
            let split = rest
                .char_indices()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(rest.len());
            let (chunk, tail) = rest.split_at(split);
            on_chunk(chunk);
            rest = tail;
        }
        Ok(response)
    }

    fn id(&self) -> &str {
        &self.id
    }
}
