//! Conversation history - exclusive writer, snapshot readers

use std::collections::HashMap;
use std::sync::RwLock;

use crate::llm::types::{Message, Role};

/// Ordered, append-only message sequence.
///
/// The owning agent is the only writer; UI observers read through
/// [`snapshot`](ConversationHistory::snapshot), which always returns a deep
/// copy, never a live reference. [`replace`](ConversationHistory::replace)
/// atomically substitutes the whole sequence and is used by compression.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    messages: RwLock<Vec<Message>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: Message) {
        self.write().push(message);
    }

    /// Deep copy of the current message sequence
    pub fn snapshot(&self) -> Vec<Message> {
        self.read().clone()
    }

    /// Atomically substitute the whole sequence
    pub fn replace(&self, messages: Vec<Message>) {
        *self.write() = messages;
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn last(&self) -> Option<Message> {
        self.read().last().cloned()
    }

    /// Message counts keyed by role string
    pub fn role_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for msg in self.read().iter() {
            *counts.entry(msg.role.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Total tool calls carried on assistant messages
    pub fn tool_call_count(&self) -> usize {
        self.read()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.tool_calls.len())
            .sum()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Message>> {
        // A poisoned lock still holds valid message data
        self.messages.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Message>> {
        self.messages.write().unwrap_or_else(|p| p.into_inner())
    }
}
