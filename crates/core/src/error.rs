//! Errors raised by the record types themselves.

use std::fmt::Display;

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures that need no storage to detect: bad input, bad ids, and status
/// changes the state machines forbid. Stores wrap these in their own errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// A forward-only status machine was asked to move backwards or sideways.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness clash, e.g. the same content hash uploaded twice for one customer.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// `<subject> cannot move from <from> to <to>`.
    pub fn illegal_transition(subject: impl Display, from: impl Display, to: impl Display) -> Self {
        Self::InvariantViolation(format!("{subject} cannot move from {from} to {to}"))
    }
}
