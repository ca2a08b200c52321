//! Registry error types

use std::time::Duration;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No entry for the stream
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The stream has no activation in progress to complete or roll back
    #[error("stream is not activating: {0}")]
    NotActivating(String),

    /// The registry has been shut down
    #[error("registry is shut down")]
    ShutDown,
}

/// Error writing a segment to one client
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The client is closing or already closed
    #[error("client closed")]
    Closed,

    /// The write did not finish within the write timeout
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),

    /// The connection rejected the write
    #[error("write failed: {0}")]
    Sink(String),
}
