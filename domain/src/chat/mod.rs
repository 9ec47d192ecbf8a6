//! Chat domain.
//!
//! - [`entities::Chat`]: one persisted conversation
//! - [`entities::Message`]: a single turn within a chat
//! - [`value_objects::ChatId`] / [`value_objects::MessageId`]: opaque identifiers
//! - [`title`]: title derivation from the first user message

pub mod entities;
pub mod title;
pub mod value_objects;
