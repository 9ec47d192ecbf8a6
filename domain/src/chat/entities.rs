//! Chat domain entities

use super::title::derive_title;
use super::value_objects::{ChatId, MessageId};
use crate::completion::CompletionMessage;
use crate::core::error::DomainError;
use crate::core::time::now_millis;
use serde::{Deserialize, Serialize};

/// One turn in a conversation (Entity)
///
/// Messages are only built through [`Message::user`], [`Message::placeholder`]
/// and [`Message::error`], so a user message never carries the streaming or
/// error flag and the two flags are never set together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    id: MessageId,
    text: String,
    is_user: bool,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    is_streaming: bool,
    #[serde(default)]
    is_error: bool,
}

impl Message {
    /// A message typed by the user.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            text: text.into(),
            is_user: true,
            timestamp: now_millis(),
            is_streaming: false,
            is_error: false,
        }
    }

    /// An empty assistant message that is still receiving deltas.
    pub fn placeholder() -> Self {
        Self {
            id: MessageId::generate(),
            text: String::new(),
            is_user: false,
            timestamp: now_millis(),
            is_streaming: true,
            is_error: false,
        }
    }

    /// An assistant-side message reporting a delivery failure.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            text: text.into(),
            is_user: false,
            timestamp: now_millis(),
            is_streaming: false,
            is_error: true,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_user(&self) -> bool {
        self.is_user
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Whether the flag invariants hold for this message.
    pub fn is_consistent(&self) -> bool {
        let conflicting = self.is_streaming && self.is_error;
        let flagged_user = self.is_user && (self.is_streaming || self.is_error);
        !conflicting && !flagged_user
    }
}

/// One conversation (Entity)
///
/// `messages` is append-only. The only in-place change is text growth of the
/// single message whose `is_streaming` flag is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    id: ChatId,
    title: String,
    messages: Vec<Message>,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    created_at: i64,
}

impl Chat {
    /// Create a new, empty chat.
    ///
    /// The title is derived from `first_message` (see [`derive_title`]); the
    /// message itself is not added to the conversation.
    pub fn new(first_message: Option<&str>) -> Self {
        Self {
            id: ChatId::generate(),
            title: derive_title(first_message),
            messages: Vec::new(),
            pinned: false,
            created_at: now_millis(),
        }
    }

    pub fn id(&self) -> &ChatId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The assistant message currently receiving deltas, if any.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_streaming)
    }

    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Flip the pinned flag and return the new value.
    pub fn toggle_pin(&mut self) -> bool {
        self.pinned = !self.pinned;
        self.pinned
    }

    /// Append a user message.
    ///
    /// When this is the first message of the chat the title is re-derived
    /// from it.
    pub fn push_user_message(&mut self, text: impl Into<String>) -> &Message {
        let message = Message::user(text);
        if self.messages.is_empty() {
            self.title = derive_title(Some(message.text.as_str()));
        }
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Append an empty streaming assistant message and return its id.
    ///
    /// A message left streaming by an interrupted earlier run is closed first.
    pub fn open_placeholder(&mut self) -> MessageId {
        self.finish_streaming();
        let message = Message::placeholder();
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Concatenate `delta` onto the streaming message.
    ///
    /// Returns `false` when no message is streaming.
    pub fn append_delta(&mut self, delta: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.is_streaming) {
            Some(message) => {
                message.text.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Clear the streaming flag, keeping whatever text has accumulated.
    pub fn finish_streaming(&mut self) {
        for message in self.messages.iter_mut().filter(|m| m.is_streaming) {
            message.is_streaming = false;
        }
    }

    /// Close the streaming message and append an error message after it.
    pub fn push_error_message(&mut self, text: impl Into<String>) -> &Message {
        self.finish_streaming();
        self.messages.push(Message::error(text));
        &self.messages[self.messages.len() - 1]
    }

    /// The role-tagged conversation history sent to the completion endpoint.
    pub fn history(&self) -> Vec<CompletionMessage> {
        self.messages
            .iter()
            .map(|m| {
                if m.is_user {
                    CompletionMessage::user(m.text.clone())
                } else {
                    CompletionMessage::assistant(m.text.clone())
                }
            })
            .collect()
    }

    /// Check the record-level invariants.
    ///
    /// Run on every record read from or written to storage.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.is_empty() {
            return Err(DomainError::invalid_record("chat id is empty"));
        }
        if self.title.is_empty() {
            return Err(DomainError::invalid_record(format!(
                "chat {} has an empty title",
                self.id
            )));
        }
        if let Some(message) = self.messages.iter().find(|m| !m.is_consistent()) {
            return Err(DomainError::invalid_record(format!(
                "message {} in chat {} has conflicting flags",
                message.id, self.id
            )));
        }
        if self.messages.iter().filter(|m| m.is_streaming).count() > 1 {
            return Err(DomainError::invalid_record(format!(
                "chat {} has more than one streaming message",
                self.id
            )));
        }
        Ok(())
    }
}
