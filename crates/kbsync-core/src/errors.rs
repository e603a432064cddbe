//! Error types for kbsync-core.
//!
//! Every [`KbError`] belongs to one [`ErrorClass`]. Batch operations use the
//! class to decide whether a failure is recorded against one document and the
//! run continues, or whether the run stops.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for kbsync-core operations.
pub type KbResult<T> = Result<T, KbError>;

// ============================================================================
// ErrorClass
// ============================================================================

/// Coarse failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Could not reach a collaborator or the disk. Retryable.
    Transport,
    /// A collaborator answered with a failure or timed out. Retryable.
    Collaborator,
    /// The request itself is wrong: bad id, wrong dimension, bad config.
    Validation,
    /// The thing asked for does not exist.
    NotFound,
    /// The store's record table and index disagree. Fatal to the store instance.
    Consistency,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Collaborator => write!(f, "collaborator"),
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not-found"),
            Self::Consistency => write!(f, "consistency"),
        }
    }
}

// ============================================================================
// KbError
// ============================================================================

/// Domain-specific errors for kbsync operations.
#[derive(Error, Debug)]
pub enum KbError {
    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// A collaborator could not be reached.
    #[error("{collaborator} unreachable: {message}")]
    Transport {
        /// Which collaborator (summarizer, embedder, generator, ...).
        collaborator: String,
        /// Description of the failure.
        message: String,
    },

    /// A collaborator reported a failure.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        /// Which collaborator.
        collaborator: String,
        /// Description of the failure.
        message: String,
        /// Whether repeating the call may succeed.
        retryable: bool,
    },

    /// A collaborator did not answer in time.
    #[error("{collaborator} timed out after {}s", .after.as_secs_f32())]
    CollaboratorTimeout {
        /// Which collaborator.
        collaborator: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// A git command failed.
    #[error("git {command} failed: {message}")]
    Git {
        /// The git subcommand that failed.
        command: String,
        /// stderr or spawn error.
        message: String,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// A vector does not have the store's dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The store dimension.
        expected: usize,
        /// The offending length.
        actual: usize,
    },

    /// A document id is malformed.
    #[error("Invalid document id `{path}@{revision}`: {reason}")]
    InvalidDocumentId {
        /// Path as given.
        path: String,
        /// Revision as given.
        revision: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A file was refused by the content filters (binary, too large).
    #[error("Skipped `{path}`: {reason}")]
    ContentRejected {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// Catch-up was requested for a store that was never fully ingested.
    #[error("No watermark recorded for this store. Run `kbsync ingest` first.")]
    NoWatermark,

    // =========================================================================
    // Not Found Errors
    // =========================================================================
    /// No live record exists for the requested document.
    #[error("Document `{0}` not found.")]
    DocumentNotFound(String),

    /// A source could not provide the requested file.
    #[error("File `{path}` not found at revision `{revision}`.")]
    FileNotFound {
        /// The requested path.
        path: String,
        /// The requested revision.
        revision: String,
    },

    /// A revision is unknown to the source.
    #[error("Revision `{revision}` is unavailable: {reason}")]
    RevisionUnavailable {
        /// The requested revision.
        revision: String,
        /// Why it cannot be served.
        reason: String,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Record table and index disagree.
    #[error("Knowledge store inconsistent: {0}")]
    Inconsistent(String),

    /// The persisted store was written for a different configuration.
    #[error("Knowledge store at `{path}` is incompatible: {reason}")]
    StoreIncompatible {
        /// Store directory.
        path: PathBuf,
        /// Reason for incompatibility.
        reason: String,
    },

    /// Store persistence I/O error.
    #[error("Knowledge store I/O error at `{path}`: {message}")]
    StoreIo {
        /// Path to the store file.
        path: PathBuf,
        /// Description of the I/O error.
        message: String,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl KbError {
    /// Create a collaborator failure.
    pub fn collaborator(
        collaborator: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Create a transport failure.
    pub fn transport(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create an inconsistency error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent(message.into())
    }

    /// Class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport { .. } | Self::Git { .. } | Self::StoreIo { .. } | Self::Io(_) => {
                ErrorClass::Transport
            }
            Self::Collaborator { .. } | Self::CollaboratorTimeout { .. } => {
                ErrorClass::Collaborator
            }
            Self::DimensionMismatch { .. }
            | Self::InvalidDocumentId { .. }
            | Self::ContentRejected { .. }
            | Self::InvalidConfiguration { .. }
            | Self::NoWatermark
            | Self::Json(_)
            | Self::Yaml(_) => ErrorClass::Validation,
            Self::DocumentNotFound(_) | Self::FileNotFound { .. } | Self::RevisionUnavailable { .. } => {
                ErrorClass::NotFound
            }
            Self::Inconsistent(_) | Self::StoreIncompatible { .. } => ErrorClass::Consistency,
        }
    }

    /// Whether repeating the failed operation may succeed.
    ///
    /// Transport and collaborator failures are retryable, except collaborator
    /// failures the collaborator itself marked permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Collaborator { retryable, .. } => *retryable,
            _ => matches!(
                self.class(),
                ErrorClass::Transport | ErrorClass::Collaborator
            ),
        }
    }

    /// Whether the error makes the store instance unusable.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Consistency
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(
            KbError::transport("embedder", "refused").class(),
            ErrorClass::Transport
        );
        assert_eq!(
            KbError::CollaboratorTimeout {
                collaborator: "embedder".into(),
                after: Duration::from_secs(1),
            }
            .class(),
            ErrorClass::Collaborator
        );
        assert_eq!(
            KbError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
            .class(),
            ErrorClass::Validation
        );
        assert_eq!(
            KbError::DocumentNotFound("a.txt@r1".into()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            KbError::inconsistent("slot 3 unowned").class(),
            ErrorClass::Consistency
        );
    }

    #[test]
    fn test_retryable() {
        assert!(KbError::transport("embedder", "refused").is_retryable());
        assert!(KbError::collaborator("embedder", "503", true).is_retryable());
        assert!(!KbError::collaborator("embedder", "400", false).is_retryable());
        assert!(!KbError::NoWatermark.is_retryable());
        assert!(!KbError::inconsistent("x").is_retryable());
    }

    #[test]
    fn test_fatal_only_for_consistency() {
        assert!(KbError::inconsistent("x").is_fatal());
        assert!(!KbError::DocumentNotFound("a".into()).is_fatal());
    }

    #[test]
    fn test_timeout_message() {
        let err = KbError::CollaboratorTimeout {
            collaborator: "summarizer".into(),
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "summarizer timed out after 1.5s");
    }
}
