//! Error types for message handling.

use thiserror::Error;

/// Error returned by a [`Handler`](crate::Handler) when a message could not be
/// processed.
///
/// Every variant is treated the same by queue backends: the message is
/// redelivered later. The variants only exist to give logs a useful shape.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Handler-reported failure
    #[error("handler failed: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Payload could not be decoded
    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Payload content type is not one the caller can decode
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl ProcessingError {
    /// Create a handler failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a handler failure with a source.
    pub fn failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
