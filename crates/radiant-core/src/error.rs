//! Error types for the renderer.

use thiserror::Error;

/// Renderer-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// GPU error
    #[error("GPU error: {0}")]
    Gpu(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
