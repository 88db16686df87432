//! Shared error type and taxonomy used across all Reagent crates.
//!
//! Every failure carries a [`ErrorKind`] tag so the upper layers can make
//! retry and fallback decisions without matching on concrete variants.

/// Shared error type used across all Reagent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("server error from '{endpoint}': {message}")]
    Server { endpoint: String, message: String },

    #[error("content policy: {0}")]
    ContentPolicy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("tool '{tool}' panicked: {message}")]
    ToolPanic { tool: String, message: String },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("max iterations reached after {iterations} model calls")]
    MaxIterations { iterations: u32 },

    /// Every endpoint in the fallback chain failed. Carries the last
    /// underlying error; `kind()` delegates to it so retry policy still
    /// sees the real failure class.
    #[error("all {attempts} endpoint attempts failed, last: {last}")]
    Exhausted { attempts: u32, last: Box<Error> },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The abstract failure class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Auth,
    RateLimit,
    Timeout,
    Transport,
    Server,
    ContentPolicy,
    NotFound,
    Parse,
    ToolNotFound,
    ToolExecution,
    ToolPanic,
    Cancelled,
    MaxIterations,
    Io,
    Json,
}

impl Error {
    /// The abstract kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Auth(_) => ErrorKind::Auth,
            Error::RateLimit(_) => ErrorKind::RateLimit,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Server { .. } => ErrorKind::Server,
            Error::ContentPolicy(_) => ErrorKind::ContentPolicy,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Parse(_) => ErrorKind::Parse,
            Error::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Error::ToolExecution { .. } => ErrorKind::ToolExecution,
            Error::ToolPanic { .. } => ErrorKind::ToolPanic,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::MaxIterations { .. } => ErrorKind::MaxIterations,
            Error::Exhausted { last, .. } => last.kind(),
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// Whether the orchestrator may retry after this error.
    ///
    /// Rate-limit, timeout, transport, and server errors are transient;
    /// everything else surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::Transport | ErrorKind::Server
        )
    }

    /// Whether this error is a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, Error>;
