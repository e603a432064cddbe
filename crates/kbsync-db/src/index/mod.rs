//! Vector index module for kbsync-db.
//!
//! This module defines the index abstraction used by the knowledge store and
//! provides the flat L2 backend.
//!
//! ## Slots and tombstones
//!
//! Every inserted vector occupies a [`VectorSlot`]. Slots are never reused or
//! compacted: retiring a slot keeps the vector on record but excludes it from
//! every scan. This keeps slot numbers stable across the lifetime of a store,
//! so the record table can reference them directly.

mod flat;

use serde::{Deserialize, Serialize};

use crate::error::DbResult;

pub use flat::{euclidean_distance, FlatL2Index};

/// Name of the only distance metric kbsync indexes use.
pub const METRIC_L2: &str = "l2";

// ============================================================================
// VectorSlot
// ============================================================================

/// Stable position of a vector inside an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorSlot(pub u64);

impl VectorSlot {
    /// Create a new slot handle.
    pub fn new(slot: u64) -> Self {
        VectorSlot(slot)
    }

    /// Get the underlying slot number.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for VectorSlot {
    fn from(slot: u64) -> Self {
        VectorSlot(slot)
    }
}

impl std::fmt::Display for VectorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// VectorHit / StoredSlot
// ============================================================================

/// A live slot matched by a scan, with its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    /// Slot of the matched vector.
    pub slot: VectorSlot,

    /// Euclidean distance to the query (lower is closer).
    pub distance: f32,
}

/// Persisted form of one index slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSlot {
    /// Slot number.
    pub slot: u64,

    /// The embedding vector held in this slot.
    pub vector: Vec<f32>,

    /// Whether the slot takes part in search.
    pub live: bool,
}

// ============================================================================
// VectorIndexBackend Trait
// ============================================================================

/// Core trait for vector index backends.
///
/// Unlike a standalone vector database, an index here is always owned by a
/// knowledge store that guards it together with its record table. Mutating
/// methods therefore take `&mut self`; the owner is responsible for locking.
pub trait VectorIndexBackend: Send + Sync {
    /// Append a vector in a fresh slot.
    ///
    /// Fails with `DimensionMismatch` if the vector length differs from
    /// [`dimension`](Self::dimension). A failed insert leaves the index unchanged.
    fn insert(&mut self, vector: Vec<f32>) -> DbResult<VectorSlot>;

    /// Exclude a slot from search without erasing it.
    fn retire(&mut self, slot: VectorSlot) -> DbResult<()>;

    /// Distance from `query` to every live slot accepted by `accept`.
    ///
    /// Results are unordered; ranking belongs to the caller, which knows the
    /// identities behind the slots.
    fn scan(&self, query: &[f32], accept: &dyn Fn(VectorSlot) -> bool)
        -> DbResult<Vec<VectorHit>>;

    /// Vector stored in a slot, live or retired.
    fn vector(&self, slot: VectorSlot) -> Option<&[f32]>;

    /// Whether a slot exists and is live.
    fn is_live(&self, slot: VectorSlot) -> bool;

    /// Number of live slots.
    fn live_len(&self) -> usize;

    /// Number of slots ever allocated, retired ones included.
    fn slot_count(&self) -> usize;

    /// Dimension of vectors in this index.
    fn dimension(&self) -> usize;

    /// Export every slot for persistence, in slot order.
    fn export(&self) -> Vec<StoredSlot>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_slot() {
        let slot = VectorSlot::new(7);
        assert_eq!(slot.value(), 7);
        assert_eq!(slot.to_string(), "7");

        let from_u64: VectorSlot = 9u64.into();
        assert_eq!(from_u64.value(), 9);
    }

    #[test]
    fn test_stored_slot_serialization() {
        let stored = StoredSlot {
            slot: 3,
            vector: vec![0.5, 1.0],
            live: false,
        };
        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("\"slot\":3"));
        assert!(json.contains("\"live\":false"));
    }
}
