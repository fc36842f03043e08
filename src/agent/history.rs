//! Append-only conversation history

use crate::llm::{Message, Role};

/// Ordered messages of one run
///
/// Messages can only be appended. Nothing is persisted; the history dies
/// with the process.
#[derive(Debug, Clone, Default)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages with `role`
    pub fn count(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// History followed by a message that is not part of it yet
    pub fn with_pending(&self, pending: &Message) -> Vec<Message> {
        let mut request = Vec::with_capacity(self.messages.len() + 1);
        request.extend_from_slice(&self.messages);
        request.push(pending.clone());
        request
    }
}
