//! Index layer error types
//!
//! Every failure an index backend can report. The revision core treats all of
//! them as fatal for the operation at hand and surfaces them unchanged.

use std::path::PathBuf;

use thiserror::Error;

use crate::index::types::InvalidNameError;

/// the main error type for index operations
#[derive(Debug, Error)]
pub enum IndexError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// invalid document type or key
    #[error("invalid document name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// documents must be JSON objects
    #[error("document {path} is not a JSON object")]
    NotAnObject { path: String },

    /// the document body uses a field name reserved for the envelope
    #[error("document {path} uses reserved field '{field}'")]
    ReservedField { path: String, field: &'static str },

    /// data integrity check failed
    #[error("corrupted document at {path}: {reason}")]
    CorruptedData { path: String, reason: String },

    /// the tree entry has an unexpected type
    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: String,
        expected: String,
        found: String,
    },

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// repo is not initialized
    #[error("index not initialized: {0}")]
    NotInitialized(PathBuf),

    /// the index ref moved while a batch was being written
    #[error("concurrent modification: {reference} was updated by another writer")]
    ConcurrentModification { reference: String },

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl IndexError {
    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, IndexError::ConcurrentModification { .. })
    }

    pub(crate) fn corrupted(path: impl ToString, reason: impl Into<String>) -> Self {
        IndexError::CorruptedData {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;
