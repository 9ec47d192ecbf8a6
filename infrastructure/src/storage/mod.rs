//! Chat persistence.
//!
//! [`KvChatStore`] implements the [`ChatStore`](streamchat_application::ChatStore)
//! port on top of any [`KeyValueStore`]:
//!
//! - [`MemoryKeyValueStore`] keeps everything in process
//! - [`JsonFileKeyValueStore`] keeps one JSON file, replaced atomically on write

mod chat_store;
mod json_file;
mod key_value;

pub use chat_store::{DEFAULT_ACTIVE_CHAT_KEY, DEFAULT_CHATS_KEY, KvChatStore};
pub use json_file::JsonFileKeyValueStore;
pub use key_value::{KeyValueStore, KvError, MemoryKeyValueStore};
