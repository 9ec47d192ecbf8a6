//! Title derivation for new chats.

use crate::core::string::ellipsize;

/// Title used when a chat is created without a first message.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Messages longer than this many characters are shortened.
pub const TITLE_MAX_CHARS: usize = 50;

/// Characters kept from a shortened message before the `...` marker.
pub const TITLE_KEEP_CHARS: usize = 47;

/// Derive a chat title from its first user message.
///
/// A blank message counts as no message.
///
/// ```
/// use streamchat_domain::chat::title::derive_title;
///
/// assert_eq!(derive_title(None), "New Chat");
/// assert_eq!(derive_title(Some("Hi there")), "Hi there");
/// assert_eq!(derive_title(Some("")), "New Chat");
/// ```
pub fn derive_title(first_message: Option<&str>) -> String {
    match first_message {
        Some(message) if !message.trim().is_empty() => {
            ellipsize(message, TITLE_MAX_CHARS, TITLE_KEEP_CHARS)
        }
        _ => DEFAULT_CHAT_TITLE.to_string(),
    }
}
