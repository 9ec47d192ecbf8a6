//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod chat_store;
pub mod completion_gateway;
pub mod conversation_logger;
