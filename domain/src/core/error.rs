//! Domain error types

use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid chat record: {0}")]
    InvalidRecord(String),
}

impl DomainError {
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        DomainError::InvalidRecord(reason.into())
    }
}
