//! Scanner error types.

use thiserror::Error;
use vball_media::MediaError;
use vball_store::StoreError;
use vball_vision::VisionError;

pub type ScanResult<T> = Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open video: {0}")]
    VideoOpen(#[source] MediaError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Model error: {0}")]
    Vision(#[from] VisionError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn video_open(err: MediaError) -> Self {
        Self::VideoOpen(err)
    }

    /// Process exit code for the `scan-match` binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::InvalidConfig(_) => 2,
            ScanError::Vision(e) if e.is_load_error() => 2,
            ScanError::VideoOpen(_) => 3,
            ScanError::Persistence(_) => 4,
            _ => 1,
        }
    }
}

impl From<serde_yaml::Error> for ScanError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
