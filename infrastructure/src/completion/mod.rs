//! Remote completion adapter.
//!
//! - [`sse`]: line framing and payload extraction for streamed responses
//! - [`client`]: [`OpenAiCompatibleClient`], the HTTP implementation of the
//!   [`CompletionGateway`](streamchat_application::CompletionGateway) port

pub mod client;
pub mod sse;

pub use client::{
    CompletionSettings, DEFAULT_API_URL, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
    OpenAiCompatibleClient,
};
pub use sse::{SseEvent, SseLineDecoder};
