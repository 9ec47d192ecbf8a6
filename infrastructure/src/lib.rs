//! Infrastructure layer for streamchat
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer: the streaming HTTP completion client, chat
//! storage, configuration file loading and the conversation transcript.

pub mod completion;
pub mod config;
pub mod logging;
pub mod storage;

// Re-export commonly used types
pub use completion::{CompletionSettings, OpenAiCompatibleClient, SseEvent, SseLineDecoder};
pub use config::{ConfigError, ConfigLoader, FileConfig};
pub use logging::JsonlConversationLogger;
pub use storage::{
    JsonFileKeyValueStore, KeyValueStore, KvChatStore, KvError, MemoryKeyValueStore,
};
