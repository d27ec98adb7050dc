//! Storage engine error types
//!
//! Defines all errors that can occur in the storage layer.

use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed (segment files, index artifact)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Encrypting the index snapshot failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The image transcoder rejected a payload
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// Stored data does not match what the block table promises
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// A background I/O task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<lz4_flex::block::DecompressError> for StorageError {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        StorageError::Compression(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
