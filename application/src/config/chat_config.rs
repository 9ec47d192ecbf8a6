//! Chat session behavior configuration.

/// Text of the message appended to a chat when a completion fails.
pub const DEFAULT_ERROR_MESSAGE: &str =
    "Sorry, I'm having trouble connecting to the AI service. Please try again later.";

/// Controls how [`ChatSessionUseCase`](crate::use_cases::chat_session::ChatSessionUseCase)
/// reports failures inside a conversation.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// User-facing text of the error message persisted on transport failure.
    pub error_message: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            error_message: DEFAULT_ERROR_MESSAGE.to_string(),
        }
    }
}

impl ChatConfig {
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }
}
