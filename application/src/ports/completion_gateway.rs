//! Completion Gateway port
//!
//! Defines the interface for streaming a completion from a remote
//! text-generation endpoint.

use futures::Stream;
use std::pin::Pin;
use streamchat_domain::CompletionMessage;
use thiserror::Error;

/// Errors that can occur during a streaming completion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The endpoint answered the initial request with a non-success status.
    #[error("API request failed with status {status}")]
    Status { status: u16, body: String },

    /// The request could not be sent or the connection broke mid-stream.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Lazy sequence of text deltas.
///
/// Nothing is sent until the stream is first polled. The stream is
/// single-consumer and cannot be restarted.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Gateway for streaming completions
///
/// This port defines how the application layer talks to the remote endpoint.
/// Implementations (adapters) live in the infrastructure layer.
pub trait CompletionGateway: Send + Sync {
    /// Open one streaming request carrying the full role-tagged history.
    ///
    /// The stream ends on the end-of-stream sentinel, on connection close,
    /// or after [`cancel`](Self::cancel). A failure before the first delta
    /// is yielded as an error item and ends the stream.
    fn stream_completion(&self, history: Vec<CompletionMessage>) -> DeltaStream;

    /// Abort the in-flight request, if any.
    ///
    /// Deltas already yielded stay yielded. With no active request this is a
    /// no-op.
    fn cancel(&self);
}
