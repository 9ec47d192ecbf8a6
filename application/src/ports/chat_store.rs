//! Chat Store port
//!
//! Defines the durable mapping from chat id to chat record. The use case
//! depends only on this trait, so the backing medium can change without
//! touching session logic.

use async_trait::async_trait;
use streamchat_domain::{Chat, ChatId, DomainError};
use thiserror::Error;

/// Boxed cause carried by [`StoreError::WriteFailed`].
pub type StoreCause = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during chat store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record handed to the store does not validate.
    #[error("Invalid chat record: {0}")]
    InvalidRecord(String),

    /// The stored record set could not be parsed or does not validate.
    ///
    /// Callers treat the store as empty rather than failing.
    #[error("Stored chats are corrupt: {0}")]
    StorageCorrupt(String),

    /// Persisting the record set failed; nothing was written.
    #[error("Failed to save chats to storage")]
    WriteFailed(#[source] StoreCause),

    /// The underlying medium could not be read.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<DomainError> for StoreError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::InvalidRecord(reason) => StoreError::InvalidRecord(reason),
        }
    }
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::StorageCorrupt(_))
    }
}

/// Durable chat record storage
///
/// Every mutating call persists the whole record set. Implementations
/// validate records on both read and write.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// All stored chats, in insertion order.
    async fn list(&self) -> Result<Vec<Chat>, StoreError>;

    /// The chat with the given id, if stored.
    async fn get(&self, id: &ChatId) -> Result<Option<Chat>, StoreError>;

    /// Insert the chat, or replace the stored record with the same id.
    async fn put(&self, chat: &Chat) -> Result<(), StoreError>;

    /// Remove one chat. Removing an absent id is a no-op.
    async fn delete(&self, id: &ChatId) -> Result<(), StoreError>;

    /// Remove every chat.
    async fn clear(&self) -> Result<(), StoreError>;

    /// The id of the chat that was open last, if recorded.
    async fn last_active_chat_id(&self) -> Result<Option<ChatId>, StoreError>;

    /// Record (or with `None`, forget) the chat that is currently open.
    async fn set_last_active_chat_id(&self, id: Option<&ChatId>) -> Result<(), StoreError>;
}
