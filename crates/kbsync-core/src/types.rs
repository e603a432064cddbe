//! Common types used throughout kbsync-core.
//!
//! This module contains the identity, record, outcome, and delta types that
//! flow between the store, the ingestion paths, and retrieval.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kbsync_db::index::VectorSlot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{KbError, KbResult};

// ============================================================================
// DocumentId
// ============================================================================

/// Identity of one file at one revision.
///
/// Ordering is lexical by `(path, revision)` and is the tie-break order for
/// ranking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    path: String,
    revision: String,
}

impl DocumentId {
    /// Create a validated document id.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidDocumentId`] if the path is empty, absolute,
    /// contains `..` components or backslashes, or if the revision is empty
    /// or contains whitespace.
    pub fn new(path: impl Into<String>, revision: impl Into<String>) -> KbResult<Self> {
        let path = path.into();
        let revision = revision.into();

        let reason = if path.is_empty() {
            Some("path is empty")
        } else if path.starts_with('/') {
            Some("path is absolute")
        } else if path.contains('\\') {
            Some("path contains a backslash")
        } else if path.split('/').any(|c| c == "..") {
            Some("path contains a `..` component")
        } else if revision.is_empty() {
            Some("revision is empty")
        } else if revision.chars().any(char::is_whitespace) {
            Some("revision contains whitespace")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(KbError::InvalidDocumentId {
                path,
                revision,
                reason: reason.to_string(),
            }),
            None => Ok(Self { path, revision }),
        }
    }

    /// Repository-relative path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Revision the content belongs to.
    pub fn revision(&self) -> &str {
        &self.revision
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.revision)
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

/// SHA-256 hex digest of raw content.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// DocumentRecord
// ============================================================================

/// One entry of the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub fingerprint: String,
    pub summary: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub updated_at: DateTime<Utc>,
    pub slot: VectorSlot,
    pub alive: bool,
}

/// Shared handle to a record.
///
/// Records are immutable once stored; tombstoning swaps in a new record.
pub type RecordRef = Arc<DocumentRecord>;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsertStatus {
    /// No prior record existed for the path.
    Inserted,
    /// A prior record for the path (or the same id) was superseded.
    Replaced,
    /// The live record already held identical content.
    Unchanged,
}

/// Result of a successful upsert.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: RecordRef,
    pub status: UpsertStatus,
}

// ============================================================================
// Outcome
// ============================================================================

/// Per-document result of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    Indexed,
    Unchanged,
    Removed,
    Failed { reason: String, retryable: bool },
}

impl Outcome {
    /// Build a failed outcome from an error.
    pub fn failed(err: &KbError) -> Self {
        Outcome::Failed {
            reason: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn is_retryable_failure(&self) -> bool {
        matches!(self, Outcome::Failed { retryable: true, .. })
    }
}

/// Tally of outcomes, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Indexed => counts.indexed += 1,
                Outcome::Unchanged => counts.unchanged += 1,
                Outcome::Removed => counts.removed += 1,
                Outcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }
}

// ============================================================================
// Search
// ============================================================================

/// Restricts which live records a search may return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Only paths starting with this prefix.
    pub path_prefix: Option<String>,
    /// Only records at this revision.
    pub revision: Option<String>,
}

impl SearchFilter {
    /// Create an empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to paths under a prefix.
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    /// Restrict to one revision.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Whether a document id passes the filter.
    pub fn matches(&self, id: &DocumentId) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !id.path().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(revision) = &self.revision {
            if id.revision() != revision {
                return false;
            }
        }
        true
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: DocumentId,
    pub distance: f32,
}

// ============================================================================
// CommitDelta
// ============================================================================

/// How a commit touched a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One path touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathChange {
    pub path: String,
    pub kind: ChangeKind,
}

impl PathChange {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// The changed-file list of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDelta {
    /// The commit's revision.
    pub revision: String,
    /// First parent, `None` for a root commit.
    pub parent: Option<String>,
    pub changes: Vec<PathChange>,
}

// ============================================================================
// StoreStats
// ============================================================================

/// Summary of a store's contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub dimension: usize,
    pub live_records: usize,
    pub tombstoned_records: usize,
    pub index_slots: usize,
    pub watermark: Option<String>,
    pub persisted: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_valid() {
        let id = DocumentId::new("src/lib.rs", "abc123").unwrap();
        assert_eq!(id.path(), "src/lib.rs");
        assert_eq!(id.revision(), "abc123");
        assert_eq!(id.to_string(), "src/lib.rs@abc123");
    }

    #[test]
    fn test_document_id_malformed() {
        for (path, rev) in [
            ("", "r1"),
            ("/etc/passwd", "r1"),
            ("src\\lib.rs", "r1"),
            ("../secret", "r1"),
            ("a/../b", "r1"),
            ("a.txt", ""),
            ("a.txt", "r 1"),
        ] {
            let err = DocumentId::new(path, rev).unwrap_err();
            assert!(
                matches!(err, KbError::InvalidDocumentId { .. }),
                "{path}@{rev} should be rejected"
            );
        }
        // `..` only matters as a whole component
        assert!(DocumentId::new("a..b.txt", "r1").is_ok());
    }

    #[test]
    fn test_document_id_ordering() {
        let a1 = DocumentId::new("a.txt", "r1").unwrap();
        let a2 = DocumentId::new("a.txt", "r2").unwrap();
        let b1 = DocumentId::new("b.txt", "r1").unwrap();
        let mut ids = vec![b1.clone(), a2.clone(), a1.clone()];
        ids.sort();
        assert_eq!(ids, vec![a1, a2, b1]);
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(
            fingerprint("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(fingerprint("hello"), fingerprint("hello\n"));
    }

    #[test]
    fn test_search_filter() {
        let id = DocumentId::new("src/store.rs", "r2").unwrap();
        assert!(SearchFilter::new().matches(&id));
        assert!(SearchFilter::new().with_path_prefix("src/").matches(&id));
        assert!(!SearchFilter::new().with_path_prefix("docs/").matches(&id));
        assert!(SearchFilter::new().with_revision("r2").matches(&id));
        assert!(!SearchFilter::new()
            .with_path_prefix("src/")
            .with_revision("r1")
            .matches(&id));
    }

    #[test]
    fn test_outcome_counts() {
        let outcomes = vec![
            Outcome::Indexed,
            Outcome::Indexed,
            Outcome::Unchanged,
            Outcome::Failed {
                reason: "x".into(),
                retryable: true,
            },
        ];
        let counts = OutcomeCounts::tally(&outcomes);
        assert_eq!(counts.indexed, 2);
        assert_eq!(counts.unchanged, 1);
        assert_eq!(counts.failed, 1);
        assert!(outcomes[3].is_retryable_failure());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::Failed {
            reason: "boom".into(),
            retryable: false,
        })
        .unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert!(json.contains("\"retryable\":false"));
    }
}
