//! In-process short-term conversation history.

use ra_domain::{Message, Role};

/// A bounded FIFO window over the conversation.
///
/// When a cap is set and the window is full, the oldest messages are
/// dropped first. The system prompt is held separately and never counts
/// against the cap. Single-writer discipline: the orchestrator mutates,
/// everyone else reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    system_prompt: Option<String>,
    messages: Vec<Message>,
    max_messages: Option<usize>,
}

impl ConversationHistory {
    pub fn new(max_messages: Option<usize>) -> Self {
        Self {
            system_prompt: None,
            messages: Vec::new(),
            max_messages,
        }
    }

    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.system_prompt = prompt;
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Append a message, dropping the oldest when over the cap.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        if let Some(cap) = self.max_messages {
            if self.messages.len() > cap {
                let excess = self.messages.len() - cap;
                self.messages.drain(..excess);
            }
        }
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.push(message);
        }
    }

    /// Replace the whole window (used when seeding from long-term memory).
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Clone the window for external readers.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// The message list sent to a model: system prompt first (when set),
    /// then the window.
    pub fn assemble(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(ref prompt) = self.system_prompt {
            out.push(Message::system(prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last assistant reply, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }
}
