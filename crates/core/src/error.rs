//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("invalid ignore pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid chunk count: {0}")]
    InvalidChunkCount(u32),

    #[error("chunk count mismatch: session expects {expected}, request declared {declared}")]
    ChunkCountMismatch { expected: u32, declared: u32 },

    #[error("invalid chunk index {index} (session expects {expected:?} chunks)")]
    InvalidChunkIndex { index: u32, expected: Option<u32> },

    #[error("inventory error: {0}")]
    Inventory(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
