//! Validation failures for identifiers and grant metadata.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A grant, scope or similar value is internally inconsistent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// `kind` names the identifier type, e.g. `UserId`.
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(kind: &'static str, reason: impl ToString) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.to_string(),
        }
    }
}
