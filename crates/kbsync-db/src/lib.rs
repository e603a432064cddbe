//! # kbsync-db
//!
//! Storage layer for kbsync - the vector index and the persisted store snapshot.
//!
//! This crate holds the storage mechanics that sit underneath the knowledge
//! store in `kbsync-core`. Keeping them here means:
//!
//! - Domain logic (identity, staleness, reconciliation) stays in `kbsync-core`
//! - Index backends can be swapped without changing domain logic
//! - Snapshot integrity checks are testable without any collaborators
//!
//! ## Architecture
//!
//! ```text
//! kbsync-cli → kbsync-core → (traits)
//!                   ↑
//!              kbsync-db (vector index, record table persistence)
//!              kbsync-model (hosted summarize/embed/generate clients)
//! ```
//!
//! ## Modules
//!
//! - `index`: Vector index backends (flat L2 scan with tombstoned slots)
//! - `snapshot`: Record table + index persistence with consistency checks
//!
//! ## Usage
//!
//! ```ignore
//! use kbsync_db::index::{FlatL2Index, VectorIndexBackend};
//!
//! let mut index = FlatL2Index::new(3);
//! let slot = index.insert(vec![1.0, 0.0, 0.0])?;
//! let hits = index.scan(&[1.0, 0.0, 0.0], &|_| true)?;
//! index.retire(slot)?;
//! ```

pub mod error;
pub mod index;
pub mod snapshot;

pub use error::{DbError, DbResult};
