//! Error types for training operations.

use augmix_augment::AugmentError;
use thiserror::Error;

/// Errors that can occur during training.
#[derive(Error, Debug)]
pub enum TrainError {
    /// Error in loss computation.
    #[error("Loss computation error: {0}")]
    LossError(String),

    /// Non-finite value produced by the objective.
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// Error in optimizer operation.
    #[error("Optimizer error: {0}")]
    OptimizerError(String),

    /// Error in batch processing.
    #[error("Batch processing error: {0}")]
    BatchError(String),

    /// Failure reported by a callback or logging backend.
    #[error("Collaborator error: {0}")]
    CollaboratorError(String),

    /// Error in metrics computation.
    #[error("Metrics error: {0}")]
    MetricsError(String),

    /// Error in checkpoint save/load.
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// Error with invalid parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error in model operations.
    #[error("Model error: {0}")]
    ModelError(String),

    /// Error in configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error from the augmentation pipeline.
    #[error("Augmentation error: {0}")]
    Augment(#[from] AugmentError),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl TrainError {
    /// Whether the error comes from invalid configuration.
    ///
    /// Configuration errors are raised before or at the start of a run and
    /// are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        match self {
            TrainError::ConfigError(_) => true,
            TrainError::Augment(err) => err.is_configuration(),
            _ => false,
        }
    }

    /// Whether the error comes from an external collaborator.
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            TrainError::CollaboratorError(_) | TrainError::CheckpointError(_)
        )
    }
}

impl From<std::io::Error> for TrainError {
    fn from(err: std::io::Error) -> Self {
        TrainError::CollaboratorError(err.to_string())
    }
}

/// Result type for training operations.
pub type TrainResult<T> = Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TrainError::ConfigError("min_lr > max_lr".to_string()).is_configuration());
        assert!(TrainError::from(AugmentError::UnknownOperation("blur".to_string())).is_configuration());
        assert!(!TrainError::from(AugmentError::ShapeError("3x3".to_string())).is_configuration());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        assert!(TrainError::from(io).is_collaborator());
        assert!(TrainError::CheckpointError("disk full".to_string()).is_collaborator());
        assert!(!TrainError::LossError("shape".to_string()).is_collaborator());
    }
}
