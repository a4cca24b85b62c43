//! Linear conversation log.
//!
//! Entries render in arrival order. The only mutation allowed is settling a
//! pending placeholder, once, into a final or error entry.

use uuid::Uuid;

use healbot_core::error::HealbotError;
use healbot_core::types::{Message, MessageStatus};

#[derive(Debug, Default, Clone)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) -> Uuid {
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Settle a pending entry.
    ///
    /// `apply` may rewrite the entry's content before its status is set.
    /// Fails if the entry is unknown, already settled, or `status` is
    /// itself `Pending`.
    pub fn settle(
        &mut self,
        id: Uuid,
        status: MessageStatus,
        apply: impl FnOnce(&mut Message),
    ) -> Result<Message, HealbotError> {
        if status == MessageStatus::Pending {
            return Err(HealbotError::InvalidState(
                "a placeholder cannot settle into Pending".to_string(),
            ));
        }
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| HealbotError::InvalidState(format!("no log entry {}", id)))?;
        if !message.is_pending() {
            return Err(HealbotError::InvalidState(format!(
                "log entry {} is already settled",
                id
            )));
        }
        apply(message);
        message.status = status;
        Ok(message.clone())
    }

    /// Replace the whole log, e.g. with a resumed session's history.
    pub fn reset(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
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
}
