//! Error types for kbsync-db.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kbsync-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in kbsync-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Vector index errors
    // ========================================================================
    /// Vector dimension mismatch.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A slot was referenced that the index does not hold.
    #[error("Unknown vector slot {slot}")]
    UnknownSlot { slot: u64 },

    /// A slot was retired twice.
    #[error("Vector slot {slot} is already retired")]
    SlotAlreadyRetired { slot: u64 },

    // ========================================================================
    // Snapshot errors
    // ========================================================================
    /// Snapshot I/O error.
    #[error("Snapshot I/O error at {path}: {message}")]
    SnapshotIo { path: PathBuf, message: String },

    /// Snapshot parse error.
    #[error("Snapshot parse error at {path}: {message}")]
    SnapshotParse { path: PathBuf, message: String },

    /// Persisted snapshot was written for a different store shape.
    #[error("Snapshot incompatible: {reason}")]
    SnapshotIncompatible { reason: String },

    /// Record table and vector index disagree.
    #[error("Store inconsistent: {message}")]
    Inconsistent { message: String },

    // ========================================================================
    // General errors
    // ========================================================================
    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Create a snapshot I/O error.
    pub fn snapshot_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SnapshotIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a snapshot parse error.
    pub fn snapshot_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SnapshotParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an inconsistency error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }
}
