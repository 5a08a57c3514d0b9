use thiserror::Error;

#[derive(Error, Debug)]
pub enum MontageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] mongodb::error::Error),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Unexpected server response: {0}")]
    InvalidResponse(String),

    #[error("Media host error: {0}")]
    MediaHostError(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Chunk count mismatch: expected {expected}, received {received}")]
    ChunkCountMismatch { expected: u32, received: u32 },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl MontageError {
    /// True for the user-initiated abort, as opposed to network or
    /// server failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MontageError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, MontageError>;
