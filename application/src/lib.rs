//! Application layer for streamchat
//!
//! This crate contains the chat session use case, port definitions, and
//! application configuration. It depends only on the domain layer.

pub mod config;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use config::{ChatConfig, DEFAULT_ERROR_MESSAGE};
pub use ports::{
    chat_store::{ChatStore, StoreError},
    completion_gateway::{CompletionGateway, DeltaStream, GatewayError},
    conversation_logger::{ConversationEvent, ConversationLogger, NoConversationLogger},
};
pub use use_cases::chat_session::{ChatSessionError, ChatSessionUseCase, SnapshotStream};
