//! Error types for the workflow engine.

/// The result type used throughout drover-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in workflow operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A call to the external job service failed.
    ///
    /// Transient by assumption: the trigger runtime redelivers and the next
    /// attempt sees an unchanged stream.
    #[error("external service error: {message}")]
    External {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Publishing an integration event failed.
    ///
    /// Re-raised so the bus redelivers; the retry republishes from the
    /// stored event with the same deterministic id.
    #[error("publish error: {message}")]
    Publish {
        /// Description of the failure.
        message: String,
    },

    /// A configuration value was invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the invalid value.
        message: String,
    },

    /// An error from drover-core.
    #[error("core error: {0}")]
    Core(#[from] drover_core::Error),
}

impl Error {
    /// Creates a new external service error.
    #[must_use]
    pub fn external(message: impl Into<String>) -> Self {
        Self::External {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new external service error with a source.
    #[must_use]
    pub fn external_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new publish error.
    #[must_use]
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true when this error is an optimistic concurrency conflict
    /// surfaced by the event store.
    #[must_use]
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Core(core) if core.is_concurrency())
    }
}
