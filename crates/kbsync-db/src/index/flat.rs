//! Flat (exhaustive) L2 vector index.
//!
//! Vectors live in a dense slot table and every scan is a linear pass over the
//! live slots. Exact results, no training, no approximation: the right trade
//! for repository-sized corpora.

use tracing::{debug, trace};

use super::{StoredSlot, VectorHit, VectorIndexBackend, VectorSlot};
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone)]
struct Slot {
    vector: Vec<f32>,
    live: bool,
}

/// In-memory flat index with tombstoned slots.
#[derive(Debug, Clone)]
pub struct FlatL2Index {
    /// Dimension of vectors.
    dimension: usize,

    /// Slot table; position is the slot number.
    slots: Vec<Slot>,

    /// Cached count of live slots.
    live: usize,
}

impl FlatL2Index {
    /// Create an empty index for vectors of `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Rebuild an index from persisted slots.
    ///
    /// Slots must be dense (`0..n` with no gaps or duplicates) and every
    /// vector must match `dimension`.
    pub fn from_slots(dimension: usize, mut stored: Vec<StoredSlot>) -> DbResult<Self> {
        stored.sort_by_key(|s| s.slot);

        let mut index = Self::new(dimension);
        for (expected, entry) in stored.into_iter().enumerate() {
            if entry.slot != expected as u64 {
                return Err(DbError::inconsistent(format!(
                    "vector slots are not dense: expected slot {}, found {}",
                    expected, entry.slot
                )));
            }
            if entry.vector.len() != dimension {
                return Err(DbError::inconsistent(format!(
                    "slot {} holds a vector of dimension {}, index dimension is {}",
                    entry.slot,
                    entry.vector.len(),
                    dimension
                )));
            }
            if entry.live {
                index.live += 1;
            }
            index.slots.push(Slot {
                vector: entry.vector,
                live: entry.live,
            });
        }

        debug!(
            "Restored flat index: {} slots, {} live",
            index.slots.len(),
            index.live
        );
        Ok(index)
    }

    fn slot_mut(&mut self, slot: VectorSlot) -> DbResult<&mut Slot> {
        self.slots
            .get_mut(slot.value() as usize)
            .ok_or(DbError::UnknownSlot { slot: slot.value() })
    }
}

impl VectorIndexBackend for FlatL2Index {
    fn insert(&mut self, vector: Vec<f32>) -> DbResult<VectorSlot> {
        if vector.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let slot = VectorSlot::new(self.slots.len() as u64);
        self.slots.push(Slot { vector, live: true });
        self.live += 1;
        trace!("Inserted vector into slot {}", slot);
        Ok(slot)
    }

    fn retire(&mut self, slot: VectorSlot) -> DbResult<()> {
        let entry = self.slot_mut(slot)?;
        if !entry.live {
            return Err(DbError::SlotAlreadyRetired { slot: slot.value() });
        }
        entry.live = false;
        self.live -= 1;
        trace!("Retired slot {}", slot);
        Ok(())
    }

    fn scan(
        &self,
        query: &[f32],
        accept: &dyn Fn(VectorSlot) -> bool,
    ) -> DbResult<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(DbError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let hits: Vec<VectorHit> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.live)
            .map(|(i, s)| (VectorSlot::new(i as u64), s))
            .filter(|(slot, _)| accept(*slot))
            .map(|(slot, s)| VectorHit {
                slot,
                distance: euclidean_distance(query, &s.vector),
            })
            .collect();

        trace!("Scanned {} live slots, {} accepted", self.live, hits.len());
        Ok(hits)
    }

    fn vector(&self, slot: VectorSlot) -> Option<&[f32]> {
        self.slots
            .get(slot.value() as usize)
            .map(|s| s.vector.as_slice())
    }

    fn is_live(&self, slot: VectorSlot) -> bool {
        self.slots
            .get(slot.value() as usize)
            .map(|s| s.live)
            .unwrap_or(false)
    }

    fn live_len(&self) -> usize {
        self.live
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn export(&self) -> Vec<StoredSlot> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| StoredSlot {
                slot: i as u64,
                vector: s.vector.clone(),
                live: s.live,
            })
            .collect()
    }
}

// ============================================================================
// Distance
// ============================================================================

/// Compute Euclidean (L2) distance between two vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

// ============================================================================
// Tests
// ============================================================================
