use serde_json::Value;

use crate::compaction::{self, CompactionPolicy, CompactionReport};
use crate::message::{Message, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation is empty")]
    Empty,
    #[error("first message must be the system prompt, found {0}")]
    MissingSystemMessage(&'static str),
}

/// Linear message history for one session. Index 0 is always the system
/// prompt.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Rebuild from previously exported messages.
    pub fn restore(messages: Vec<Message>) -> Result<Self, ConversationError> {
        let conversation = Self { messages };
        conversation.verify()?;
        Ok(conversation)
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

    pub fn system_prompt(&self) -> String {
        self.messages.first().map(Message::text).unwrap_or_default()
    }

    /// Attach compaction bookkeeping to an existing message. Content stays
    /// untouched.
    pub fn set_metadata(&mut self, index: usize, key: &str, value: Value) -> bool {
        match self.messages.get_mut(index) {
            Some(message) => {
                message.metadata.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Drop everything but the system prompt.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    /// Summarize the middle of the history. No-op at or below the threshold.
    pub fn compact(&mut self, policy: &CompactionPolicy) -> Option<CompactionReport> {
        compaction::compact(&mut self.messages, policy)
    }

    /// End-of-turn variant: only runs when the policy enables auto mode.
    pub fn maybe_compact(&mut self, policy: &CompactionPolicy) -> Option<CompactionReport> {
        if !policy.auto {
            return None;
        }
        self.compact(policy)
    }

    pub fn verify(&self) -> Result<(), ConversationError> {
        match self.messages.first() {
            None => Err(ConversationError::Empty),
            Some(m) if m.role != Role::System => {
                Err(ConversationError::MissingSystemMessage(m.role.as_str()))
            }
            Some(_) => Ok(()),
        }
    }

    /// Approximate token count using character count / 4 heuristic.
    pub fn approximate_tokens(&self) -> usize {
        self.messages.iter().map(Message::char_len).sum::<usize>() / 4
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new("You are a helpful assistant.")
    }
}
