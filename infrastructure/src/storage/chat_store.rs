//! [`ChatStore`] over a string key-value medium.
//!
//! The full record set is one JSON array under a single key; the last
//! active chat id lives under a second key.

use super::key_value::{KeyValueStore, KvError};
use async_trait::async_trait;
use streamchat_application::ports::chat_store::{ChatStore, StoreError};
use streamchat_domain::{Chat, ChatId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_CHATS_KEY: &str = "chat_app_chats";
pub const DEFAULT_ACTIVE_CHAT_KEY: &str = "chat_app_last_active";

pub struct KvChatStore<K> {
    kv: K,
    chats_key: String,
    active_key: String,
    // Serializes read-modify-write cycles on the record set
    write_lock: Mutex<()>,
}

impl<K: KeyValueStore> KvChatStore<K> {
    pub fn new(kv: K) -> Self {
        Self::with_keys(kv, DEFAULT_CHATS_KEY, DEFAULT_ACTIVE_CHAT_KEY)
    }

    pub fn with_keys(kv: K, chats_key: impl Into<String>, active_key: impl Into<String>) -> Self {
        Self {
            kv,
            chats_key: chats_key.into(),
            active_key: active_key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &K {
        &self.kv
    }

    async fn read_all(&self) -> Result<Vec<Chat>, StoreError> {
        let raw = match self.kv.get(&self.chats_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => return Err(read_error(e)),
        };

        let chats: Vec<Chat> =
            serde_json::from_str(&raw).map_err(|e| StoreError::StorageCorrupt(e.to_string()))?;
        for chat in &chats {
            chat.validate()
                .map_err(|e| StoreError::StorageCorrupt(format!("chat {}: {}", chat.id(), e)))?;
        }
        Ok(chats)
    }

    /// Read for a mutation. Unreadable data is dropped and overwritten.
    async fn read_for_update(&self) -> Result<Vec<Chat>, StoreError> {
        match self.read_all().await {
            Err(StoreError::StorageCorrupt(reason)) => {
                warn!("Discarding unreadable stored chats: {}", reason);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn write_all(&self, chats: &[Chat]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(chats).map_err(|e| StoreError::WriteFailed(Box::new(e)))?;
        self.kv
            .set(&self.chats_key, raw)
            .await
            .map_err(|e| StoreError::WriteFailed(Box::new(e)))?;
        debug!(chats = chats.len(), "Persisted chat set");
        Ok(())
    }
}

fn read_error(error: KvError) -> StoreError {
    if error.is_malformed() {
        StoreError::StorageCorrupt(error.to_string())
    } else {
        StoreError::Backend(error.to_string())
    }
}

#[async_trait]
impl<K: KeyValueStore> ChatStore for KvChatStore<K> {
    async fn list(&self) -> Result<Vec<Chat>, StoreError> {
        self.read_all().await
    }

    async fn get(&self, id: &ChatId) -> Result<Option<Chat>, StoreError> {
        Ok(self.read_all().await?.into_iter().find(|c| c.id() == id))
    }

    async fn put(&self, chat: &Chat) -> Result<(), StoreError> {
        chat.validate()?;

        let _guard = self.write_lock.lock().await;
        let mut chats = self.read_for_update().await?;
        match chats.iter_mut().find(|c| c.id() == chat.id()) {
            Some(existing) => *existing = chat.clone(),
            None => chats.push(chat.clone()),
        }
        self.write_all(&chats).await
    }

    async fn delete(&self, id: &ChatId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut chats = self.read_for_update().await?;
        chats.retain(|c| c.id() != id);
        self.write_all(&chats).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_all(&[]).await
    }

    async fn last_active_chat_id(&self) -> Result<Option<ChatId>, StoreError> {
        let id = self.kv.get(&self.active_key).await.map_err(read_error)?;
        Ok(id.filter(|id| !id.is_empty()).map(ChatId::from))
    }

    async fn set_last_active_chat_id(&self, id: Option<&ChatId>) -> Result<(), StoreError> {
        let result = match id {
            Some(id) => self.kv.set(&self.active_key, id.as_str().to_string()).await,
            None => self.kv.remove(&self.active_key).await,
        };
        result.map_err(|e| StoreError::WriteFailed(Box::new(e)))
    }
}
