//! Error model.
//!
//! `DomainError` carries deterministic business failures: the same input
//! always produces the same outcome, and the saga treats them as terminal
//! for the current intent. Infrastructure failures (lost connections,
//! optimistic-lock misses) travel as `StoreError` and may be retried.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic business failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A batch removal asked for more units than a stock row holds.
    #[error("not enough items in stock")]
    InsufficientStock,

    /// A pay would drive the account balance negative.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The requested schedule hours are already taken.
    #[error("slot is already reserved")]
    SlotReserved,

    /// No courier has the requested hours free.
    #[error("no courier slot available")]
    SlotUnavailable,

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Failures raised by store implementations.
///
/// `Conflict` marks an optimistic-lock miss: the row's version token moved
/// between read and write. It is the only retryable variant.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic lock conflict: {0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Persisted `error` strings are operator diagnostics, not dispatch data;
/// cap them so a driver error cannot bloat the intent row.
pub const ERROR_TEXT_MAX: usize = 256;

pub fn truncate_error(msg: &str) -> String {
    if msg.len() <= ERROR_TEXT_MAX {
        return msg.to_string();
    }
    let mut end = ERROR_TEXT_MAX;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    msg[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_errors() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_error(&long).len(), ERROR_TEXT_MAX);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn conflict_is_retryable_marker() {
        assert!(StoreError::conflict("stock 5").is_conflict());
        assert!(!StoreError::NotFound.is_conflict());
    }
}
