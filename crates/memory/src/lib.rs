//! Conversation memory for the Reagent runtime.
//!
//! Two orthogonal layers:
//! - [`ConversationHistory`] — the in-process short-term window, optionally
//!   capped, with the system prompt held apart from the counted messages.
//! - [`MemoryBackend`] — the pluggable long-term store behind
//!   load/save/delete/list; [`FileBackend`] persists one JSON blob per
//!   memory id, [`KvBackend`] adapts any [`KvStore`] (in-tree:
//!   [`InMemoryKv`]).
//!
//! [`MemoryManager`] ties them together with auto-load / auto-save
//! semantics: backend failures are logged, never surfaced to the turn.

pub mod backend;
pub mod file;
pub mod history;
pub mod kv;
pub mod manager;

pub use backend::MemoryBackend;
pub use file::FileBackend;
pub use history::ConversationHistory;
pub use kv::{InMemoryKv, KvBackend, KvStore};
pub use manager::MemoryManager;
