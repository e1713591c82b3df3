//! Error types for the NSQ worker.

use thiserror::Error;

/// Error that can occur in NSQ worker operations.
#[derive(Debug, Error)]
pub enum NsqError {
    /// Topic name rejected by the client
    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    /// Channel name rejected by the client
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// Configuration rejected at construction
    #[error("Configuration error: {0}")]
    Config(String),

    /// nsqlookupd could not be reached or queried
    #[error("Lookupd connection error: {0}")]
    Lookupd(String),

    /// Connection attempted before any handler was registered
    #[error("No handlers registered")]
    NoHandlers,

    /// Handlers registered after the consumer connected
    #[error("Handlers cannot be added after connecting")]
    AlreadyConnected,

    /// Consumer or worker has been stopped
    #[error("Consumer stopped")]
    Stopped,

    /// `consume` called while another `consume` is running
    #[error("Worker is already consuming")]
    AlreadyConsuming,

    /// Consecutive lookupd failures went past the retry budget
    #[error("Lookupd connection failed {attempts} consecutive times")]
    RetriesExhausted { attempts: u32 },
}

impl NsqError {
    /// Whether the connect loop should try again after this error. Anything
    /// else stops the worker.
    pub fn is_transient(&self) -> bool {
        matches!(self, NsqError::Lookupd(_))
    }

    /// Create a lookupd error from any displayable cause.
    pub fn lookupd(error: impl std::fmt::Display) -> Self {
        Self::Lookupd(error.to_string())
    }
}
