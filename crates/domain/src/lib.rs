//! Shared domain types for the Reagent runtime.
//!
//! Everything the leaf crates agree on lives here: the message and
//! completion data model, the error taxonomy, cancellation tokens,
//! configuration structs, and structured trace events.

pub mod cancel;
pub mod completion;
pub mod config;
pub mod error;
pub mod message;
pub mod trace;

// Re-exports for convenience.
pub use cancel::CancelToken;
pub use completion::{
    CompletionRequest, CompletionResponse, FinishReason, ResponseFormat, ToolChoice, Usage,
};
pub use error::{Error, ErrorKind, Result};
pub use message::{
    validate_conversation, Message, Role, ToolCallRequest, ToolCallResult, ToolDefinition,
};
pub use trace::TraceEvent;
