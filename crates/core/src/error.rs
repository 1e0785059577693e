//! Storage error types

use thiserror::Error;

/// Durable storage errors
///
/// Errors related to keyed persistence: file I/O, encoding of stored
/// records and invalid storage paths.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to read an entry
    #[error("failed to read '{path}': {source}")]
    Read {
        /// Storage path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write an entry
    #[error("failed to write '{path}': {source}")]
    Write {
        /// Storage path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to delete an entry
    #[error("failed to delete '{path}': {source}")]
    Delete {
        /// Storage path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Stored bytes could not be encoded or decoded
    #[error("failed to (de)serialize '{path}': {source}")]
    Serialization {
        /// Storage path
        path: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// The storage path is not acceptable for this backend
    #[error("invalid storage path '{path}': {reason}")]
    InvalidPath {
        /// Rejected path
        path: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Injected or backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
