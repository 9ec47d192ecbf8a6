//! Application-level configuration.
//!
//! - [`ChatConfig`]: behavior of the chat session use case

pub mod chat_config;

pub use chat_config::{ChatConfig, DEFAULT_ERROR_MESSAGE};
