//! Error types and result aliases for Drover.
//!
//! This module defines the shared error types used across all Drover
//! components. Errors are structured for programmatic handling: optimistic
//! concurrency conflicts have their own variant so that handlers can treat
//! them as "another worker advanced the stream" rather than as failures.

/// The result type used throughout Drover.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Drover operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the id invalid.
        message: String,
    },

    /// An optimistic concurrency check failed on append.
    ///
    /// Raised when the expected stream version does not match, or when an
    /// event id already exists within the stream. Handlers treat this as a
    /// normal outcome, not a failure.
    #[error("concurrency conflict: {message}")]
    Concurrency {
        /// Description of the conflicting condition.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    Validation(String),

    /// An internal error occurred that should not happen in normal
    /// operation (e.g., a stored payload that no longer deserializes).
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new concurrency conflict error.
    #[must_use]
    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true when this error is an optimistic concurrency conflict.
    #[must_use]
    pub const fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn concurrency_error_display() {
        let err = Error::concurrency("expected version 3, stream at 5");
        assert!(err.to_string().contains("concurrency conflict"));
        assert!(err.is_concurrency());
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::storage_with_source("failed to read stream", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
        assert!(!err.is_concurrency());
    }
}
