//! Error types for QuarryDB.

use thiserror::Error;

/// Result type alias using QuarryError.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Errors that can occur in QuarryDB operations.
#[derive(Debug, Error)]
pub enum QuarryError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Buffer pool exhausted, no frame is free or evictable")]
    PoolExhausted,

    // Page directory errors
    #[error("Pathological hash collision: bucket of {bucket_size} keys cannot be split")]
    PathologicalHashCollision { bucket_size: usize },

    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
