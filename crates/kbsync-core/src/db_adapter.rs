//! Adapter layer for kbsync-db infrastructure.
//!
//! This module bridges kbsync-db with kbsync-core's domain types:
//!
//! - Error conversion from `DbError` to `KbError`
//! - Conversion between [`DocumentRecord`] and the persisted `StoredRecord`
//!
//! ## Architecture
//!
//! ```text
//! kbsync-core domain code (store, ingest, reconcile)
//!        ↓
//!   db_adapter (this module) - conversions
//!        ↓
//!     kbsync-db (flat index, snapshot files)
//! ```

use std::path::Path;
use std::sync::Arc;

use kbsync_db::index::{VectorIndexBackend, VectorSlot};
use kbsync_db::snapshot::StoredRecord;
use kbsync_db::{DbError, DbResult};

use crate::errors::{KbError, KbResult};
use crate::types::{DocumentId, DocumentRecord, RecordRef};

// ============================================================================
// Error Conversion
// ============================================================================

/// Convert a kbsync-db error to a kbsync-core error.
///
/// `store_dir` names the store in messages where the db error has no path.
pub fn from_db_error(err: DbError, store_dir: Option<&Path>) -> KbError {
    match err {
        DbError::DimensionMismatch { expected, actual } => {
            KbError::DimensionMismatch { expected, actual }
        }

        // The store only touches slots it owns, so a bad slot is a broken invariant
        DbError::UnknownSlot { slot } => {
            KbError::inconsistent(format!("record references unknown slot {}", slot))
        }
        DbError::SlotAlreadyRetired { slot } => {
            KbError::inconsistent(format!("slot {} was already retired", slot))
        }

        DbError::SnapshotIo { path, message } => KbError::StoreIo { path, message },

        DbError::SnapshotParse { path, message } => KbError::inconsistent(format!(
            "cannot parse {}: {}",
            path.display(),
            message
        )),

        DbError::SnapshotIncompatible { reason } => KbError::StoreIncompatible {
            path: store_dir.map(Path::to_path_buf).unwrap_or_default(),
            reason,
        },

        DbError::Inconsistent { message } => KbError::Inconsistent(message),

        DbError::Io(io_err) => KbError::Io(io_err),

        DbError::Json(json_err) => KbError::Json(json_err),
    }
}

/// Extension trait to convert DbResult to KbResult.
pub trait IntoKbResult<T> {
    /// Convert a DbResult to a KbError result.
    fn into_kb_result(self) -> KbResult<T>;
}

impl<T> IntoKbResult<T> for DbResult<T> {
    fn into_kb_result(self) -> KbResult<T> {
        self.map_err(|e| from_db_error(e, None))
    }
}

// ============================================================================
// Record Conversion
// ============================================================================

/// Persisted form of a record. The vector lives in the index slot.
pub fn to_stored_record(record: &DocumentRecord) -> StoredRecord {
    StoredRecord {
        path: record.id.path().to_string(),
        revision: record.id.revision().to_string(),
        fingerprint: record.fingerprint.clone(),
        summary: record.summary.clone(),
        slot: record.slot.value(),
        updated_at: record.updated_at,
        alive: record.alive,
    }
}

/// Rebuild a record from its persisted row and the restored index.
///
/// # Errors
///
/// A malformed id or a slot missing from the index is an inconsistency.
pub fn from_stored_record(
    stored: StoredRecord,
    index: &dyn VectorIndexBackend,
) -> KbResult<RecordRef> {
    let id = DocumentId::new(stored.path, stored.revision).map_err(|e| {
        KbError::inconsistent(format!("persisted record has an invalid id: {}", e))
    })?;

    let slot = VectorSlot::new(stored.slot);
    let vector = index
        .vector(slot)
        .ok_or_else(|| {
            KbError::inconsistent(format!("record {} references missing slot {}", id, slot))
        })?
        .to_vec();

    Ok(Arc::new(DocumentRecord {
        id,
        fingerprint: stored.fingerprint,
        summary: stored.summary,
        vector,
        updated_at: stored.updated_at,
        slot,
        alive: stored.alive,
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kbsync_db::index::FlatL2Index;

    #[test]
    fn test_error_mapping() {
        let err = from_db_error(
            DbError::DimensionMismatch {
                expected: 4,
                actual: 3,
            },
            None,
        );
        assert!(matches!(
            err,
            KbError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));

        let err = from_db_error(DbError::inconsistent("boom"), None);
        assert!(err.is_fatal());

        let err = from_db_error(
            DbError::SnapshotIncompatible {
                reason: "dim".into(),
            },
            Some(Path::new("/kb")),
        );
        assert!(matches!(err, KbError::StoreIncompatible { .. }));
    }

    #[test]
    fn test_record_round_trip() {
        let mut index = FlatL2Index::new(2);
        let slot = index.insert(vec![1.0, 2.0]).unwrap();

        let record = DocumentRecord {
            id: DocumentId::new("a.txt", "r1").unwrap(),
            fingerprint: "f".into(),
            summary: "s".into(),
            vector: vec![1.0, 2.0],
            updated_at: Utc::now(),
            slot,
            alive: true,
        };

        let restored = from_stored_record(to_stored_record(&record), &index).unwrap();
        assert_eq!(*restored, record);
    }

    #[test]
    fn test_from_stored_record_rejects_bad_id() {
        let index = FlatL2Index::new(1);
        let stored = StoredRecord {
            path: "../x".into(),
            revision: "r1".into(),
            fingerprint: "f".into(),
            summary: "s".into(),
            slot: 0,
            updated_at: Utc::now(),
            alive: true,
        };
        assert!(from_stored_record(stored, &index).unwrap_err().is_fatal());
    }
}
