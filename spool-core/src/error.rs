/*!
Error types for the Spool sink engine.
*/

use thiserror::Error;

/// Result type used throughout the Spool core.
pub type Result<T> = std::result::Result<T, SpoolError>;

/// Errors that can occur while buffering, staging or uploading records.
#[derive(Error, Debug)]
pub enum SpoolError {
    /// I/O errors outside the staging path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// In-memory buffer could not grow
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Staging file could not be created, appended, read or removed
    #[error("Staging error: {0}")]
    Staging(String),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Remote object store rejected or failed the upload
    #[error("Upload error: {0}")]
    Upload(String),

    /// Invalid sink configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The upload worker is no longer accepting commands
    #[error("Upload queue closed")]
    QueueClosed,
}

impl SpoolError {
    /// Create a new buffer error
    pub fn buffer<S: Into<String>>(msg: S) -> Self {
        Self::Buffer(msg.into())
    }

    /// Create a new staging error
    pub fn staging<S: Into<String>>(msg: S) -> Self {
        Self::Staging(msg.into())
    }

    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new upload error
    pub fn upload<S: Into<String>>(msg: S) -> Self {
        Self::Upload(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the next flush trigger may succeed where this one failed.
    ///
    /// Staged data is never discarded on these errors, so the caller only logs
    /// and waits for the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Staging(_) | Self::Compression(_) | Self::Upload(_)
        )
    }
}
