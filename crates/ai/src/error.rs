use std::time::Duration;

use thiserror::Error;

/// Failure of a generation call.
///
/// The split between [`Transient`](GenerationError::Transient) and
/// [`Permanent`](GenerationError::Permanent) drives the retry decorator:
/// only transient failures are retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Rate limiting, 5xx responses and network faults.
    #[error("transient generation failure: {message}")]
    Transient {
        message: String,
        /// Server-provided hint for when to try again.
        retry_after: Option<Duration>,
    },

    /// Anything retrying cannot fix (bad request, auth, exhausted retries).
    #[error("generation failed: {0}")]
    Permanent(String),

    #[error("generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient { .. })
    }
}
