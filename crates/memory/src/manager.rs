//! Glue between the short-term window and the long-term backend.

use std::sync::Arc;

use ra_domain::config::MemoryConfig;
use ra_domain::{Message, TraceEvent};

use crate::backend::MemoryBackend;
use crate::history::ConversationHistory;

/// Owns the conversation for one agent: the short-term window plus the
/// optional long-term backend with auto-load / auto-save semantics.
///
/// Backend failures never fail the turn — they are logged and the
/// conversation carries on in-process.
pub struct MemoryManager {
    history: ConversationHistory,
    backend: Option<Arc<dyn MemoryBackend>>,
    memory_id: Option<String>,
    auto_save: bool,
    loaded: bool,
}

impl MemoryManager {
    pub fn new(config: &MemoryConfig, backend: Option<Arc<dyn MemoryBackend>>) -> Self {
        Self {
            history: ConversationHistory::new(config.max_messages),
            backend,
            memory_id: config.memory_id.clone(),
            auto_save: config.auto_save_enabled(),
            loaded: false,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ConversationHistory {
        &mut self.history
    }

    /// Seed the window from the backend on first use. Absent or unreadable
    /// conversations start empty; errors are logged.
    pub async fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let (Some(backend), Some(id)) = (self.backend.as_ref(), self.memory_id.as_deref()) else {
            return;
        };
        match backend.load(id).await {
            Ok(Some(messages)) => {
                if let Err(e) = ra_domain::validate_conversation(&messages) {
                    tracing::warn!(memory_id = %id, error = %e, "persisted conversation is inconsistent, starting empty");
                    return;
                }
                TraceEvent::MemoryLoaded {
                    memory_id: id.to_owned(),
                    messages: messages.len(),
                }
                .emit();
                self.history.replace(messages);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(memory_id = %id, error = %e, "memory auto-load failed, starting empty");
            }
        }
    }

    /// Append one completed turn and, when auto-save is on, persist the
    /// window to the backend. Persistence failures are logged, never
    /// returned.
    pub async fn record_turn(&mut self, user: Message, assistant: Message) {
        self.history.push(user);
        self.history.push(assistant);
        self.auto_save().await;
    }

    async fn auto_save(&self) {
        if !self.auto_save {
            return;
        }
        let (Some(backend), Some(id)) = (self.backend.as_ref(), self.memory_id.as_deref()) else {
            return;
        };
        match backend.save(id, self.history.messages()).await {
            Ok(()) => {
                TraceEvent::MemorySaved {
                    memory_id: id.to_owned(),
                    messages: self.history.len(),
                }
                .emit();
            }
            Err(e) => {
                tracing::warn!(memory_id = %id, error = %e, "memory auto-save failed");
            }
        }
    }

    /// Clear the in-process window. The persisted copy is untouched; use
    /// [`MemoryManager::forget`] to drop it too.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Clear the window and delete the persisted conversation.
    pub async fn forget(&mut self) {
        self.history.clear();
        if let (Some(backend), Some(id)) = (self.backend.as_ref(), self.memory_id.as_deref()) {
            if let Err(e) = backend.delete(id).await {
                tracing::warn!(memory_id = %id, error = %e, "memory delete failed");
            }
        }
    }
}
