//! Error types for augmentation operations.

use thiserror::Error;

/// Errors that can occur while building or sampling augmentation chains.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AugmentError {
    /// Invalid parameter combination in the mixture configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation identifier that is not part of the catalog.
    #[error("Unknown augmentation operation: {0}")]
    UnknownOperation(String),

    /// Error with invalid parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Image or batch with an unexpected shape.
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Failure inside a prefetch worker.
    #[error("Worker error: {0}")]
    WorkerError(String),
}

impl AugmentError {
    /// Whether this error stems from invalid configuration rather than data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AugmentError::ConfigError(_) | AugmentError::UnknownOperation(_)
        )
    }
}

/// Result type for augmentation operations.
pub type AugmentResult<T> = Result<T, AugmentError>;
