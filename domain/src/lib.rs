//! Domain layer for streamchat
//!
//! This crate contains the chat entities and their invariants.
//! It has no dependencies on infrastructure or presentation concerns.
//!
//! # Core Concepts
//!
//! - **Chat**: one persisted conversation, an ordered list of messages plus metadata
//! - **Message**: one user or assistant turn, with optional streaming/error flags
//! - **Completion history**: the `{role, content}` view of a chat sent to the
//!   completion endpoint

pub mod chat;
pub mod completion;
pub mod core;

// Re-export commonly used types
pub use chat::{
    entities::{Chat, Message},
    title::{DEFAULT_CHAT_TITLE, derive_title},
    value_objects::{ChatId, MessageId},
};
pub use completion::{CompletionMessage, Role};
pub use core::error::DomainError;
