//! Storage-specific error types

use std::path::Path;

use crate::services::record::InvariantViolation;

/// Service record storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Service {hash} not found")]
    NotFound { hash: String },

    #[error("Service {hash} already exists")]
    AlreadyExists { hash: String },

    #[error("Invalid service hash: {hash:?}")]
    InvalidHash { hash: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Serialization error on {path}: {message}")]
    Serialization { path: String, message: String },

    /// The record would break an invariant and was not persisted
    #[error("Refusing to store service {hash}: {violation}")]
    InvariantViolation {
        hash: String,
        violation: InvariantViolation,
    },
}

impl StorageError {
    pub fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn serialization(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
