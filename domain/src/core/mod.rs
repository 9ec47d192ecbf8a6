//! Core domain concepts shared across all subdomains.
//!
//! - [`error::DomainError`]: domain-level errors
//! - [`string`]: character-safe truncation helpers
//! - [`time`]: creation timestamps

pub mod error;
pub mod string;
pub mod time;
