//! Error types for model inference.

use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors raised by the classifier and detectors.
#[derive(Debug, Error)]
pub enum VisionError {
    /// The window cannot be classified; the caller skips it.
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// A detector call failed for a whole batch.
    #[error("Detection failed: {0}")]
    DetectionFailure(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    pub fn invalid_window(message: impl Into<String>) -> Self {
        Self::InvalidWindow(message.into())
    }

    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailure(message.into())
    }

    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error comes from loading a model rather than running one.
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::ModelNotFound(_) | Self::InvalidConfig(_))
    }
}
