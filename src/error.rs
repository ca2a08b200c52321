//! Error types
//!
//! Each subsystem has its own error enum; [`Error`] wraps them for callers
//! that drive several subsystems at once.

use std::path::PathBuf;

pub use crate::capture::CaptureError;
pub use crate::registry::{DeliveryError, RegistryError};
pub use crate::transport::TransportError;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration document is not valid JSON for the expected shape
    #[error("failed to parse camera configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A camera entry is invalid
    #[error("invalid camera '{camera}': {reason}")]
    InvalidCamera { camera: String, reason: String },

    /// Two cameras share a name
    #[error("duplicate camera name: {0}")]
    DuplicateCamera(String),
}

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Capture process error
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Stream transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Stream registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}
