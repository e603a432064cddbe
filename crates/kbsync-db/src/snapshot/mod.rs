//! Persisted store snapshots.
//!
//! A knowledge store persists as four files in its store directory:
//!
//! | File | Content |
//! |------|---------|
//! | `store.meta.json` | dimension, metric, schema version, counts, timestamps |
//! | `records.jsonl` | one row per document id |
//! | `vectors.jsonl` | one row per index slot |
//! | `WATERMARK` | last fully reconciled revision |
//!
//! Every file is written to a `.tmp` sibling and renamed into place. The meta
//! file is renamed last, so a reader that finds a meta file finds the record
//! and vector files it describes.
//!
//! Loading never repairs anything: [`verify_snapshot`] rejects any snapshot
//! whose record table and index disagree.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{DbError, DbResult};
use crate::index::{StoredSlot, METRIC_L2};

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Filename for the store metadata.
pub const META_FILENAME: &str = "store.meta.json";

/// Filename for the record table.
pub const RECORDS_FILENAME: &str = "records.jsonl";

/// Filename for the vector slots.
pub const VECTORS_FILENAME: &str = "vectors.jsonl";

/// Filename for the reconciliation watermark.
pub const WATERMARK_FILENAME: &str = "WATERMARK";

// ============================================================================
// Persisted types
// ============================================================================

/// Store-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMeta {
    /// On-disk schema version.
    pub schema_version: u32,

    /// Vector dimension fixed at store creation.
    pub dimension: usize,

    /// Distance metric (always `l2`).
    pub metric: String,

    /// Number of rows in the record table, tombstones included.
    pub record_count: usize,

    /// Number of live records.
    pub live_count: usize,

    /// Number of index slots, retired ones included.
    pub slot_count: usize,

    /// When the store was first created.
    pub created_at: DateTime<Utc>,

    /// When the store was last flushed.
    pub updated_at: DateTime<Utc>,
}

impl StoreMeta {
    /// Create metadata for an empty store.
    pub fn new(dimension: usize) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            dimension,
            metric: METRIC_L2.to_string(),
            record_count: 0,
            live_count: 0,
            slot_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One row of the record table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Repository-relative path.
    pub path: String,

    /// Revision the content was read at.
    pub revision: String,

    /// SHA-256 hex of the raw content.
    pub fingerprint: String,

    /// Summary produced for the content.
    pub summary: String,

    /// Index slot holding the embedding.
    pub slot: u64,

    /// When the record was written.
    pub updated_at: DateTime<Utc>,

    /// Whether the record is live.
    pub alive: bool,
}

/// Everything a store persists, apart from the watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub meta: StoreMeta,
    pub records: Vec<StoredRecord>,
    pub slots: Vec<StoredSlot>,
}

// ============================================================================
// Save / Load
// ============================================================================

/// Whether `dir` holds a persisted store.
pub fn snapshot_exists(dir: &Path) -> bool {
    dir.join(META_FILENAME).is_file()
}

/// Write a snapshot to `dir`, creating the directory if needed.
pub fn save_snapshot(dir: &Path, snapshot: &StoreSnapshot) -> DbResult<()> {
    fs::create_dir_all(dir).map_err(|e| DbError::snapshot_io(dir, e.to_string()))?;
    debug!(
        "Saving store snapshot to {:?}: {} records, {} slots",
        dir,
        snapshot.records.len(),
        snapshot.slots.len()
    );

    let vectors_tmp = write_jsonl_tmp(&dir.join(VECTORS_FILENAME), &snapshot.slots)?;
    let records_tmp = write_jsonl_tmp(&dir.join(RECORDS_FILENAME), &snapshot.records)?;

    let meta_path = dir.join(META_FILENAME);
    let meta_tmp = tmp_path(&meta_path);
    let meta_json = serde_json::to_string_pretty(&snapshot.meta)?;
    fs::write(&meta_tmp, meta_json).map_err(|e| DbError::snapshot_io(&meta_tmp, e.to_string()))?;

    commit_tmp(&vectors_tmp, &dir.join(VECTORS_FILENAME))?;
    commit_tmp(&records_tmp, &dir.join(RECORDS_FILENAME))?;
    commit_tmp(&meta_tmp, &meta_path)?;

    trace!("Snapshot committed at {:?}", dir);
    Ok(())
}

/// Load a snapshot from `dir`.
///
/// Returns `Ok(None)` when the directory holds no store. The snapshot is
/// verified against `expected_dimension` before it is returned.
pub fn load_snapshot(dir: &Path, expected_dimension: usize) -> DbResult<Option<StoreSnapshot>> {
    let meta_path = dir.join(META_FILENAME);
    if !meta_path.is_file() {
        debug!("No store snapshot at {:?}", dir);
        return Ok(None);
    }

    let meta_text =
        fs::read_to_string(&meta_path).map_err(|e| DbError::snapshot_io(&meta_path, e.to_string()))?;
    let meta: StoreMeta = serde_json::from_str(&meta_text)
        .map_err(|e| DbError::snapshot_parse(&meta_path, e.to_string()))?;

    if meta.schema_version != SCHEMA_VERSION {
        return Err(DbError::SnapshotIncompatible {
            reason: format!(
                "schema version {} is not supported (expected {})",
                meta.schema_version, SCHEMA_VERSION
            ),
        });
    }
    if meta.metric != METRIC_L2 {
        return Err(DbError::SnapshotIncompatible {
            reason: format!("metric '{}' is not supported", meta.metric),
        });
    }
    if meta.dimension != expected_dimension {
        return Err(DbError::SnapshotIncompatible {
            reason: format!(
                "store dimension is {}, configured dimension is {}",
                meta.dimension, expected_dimension
            ),
        });
    }

    let records: Vec<StoredRecord> = read_jsonl(&dir.join(RECORDS_FILENAME))?;
    let slots: Vec<StoredSlot> = read_jsonl(&dir.join(VECTORS_FILENAME))?;

    let snapshot = StoreSnapshot {
        meta,
        records,
        slots,
    };
    verify_snapshot(&snapshot)?;

    debug!(
        "Loaded store snapshot from {:?}: {} records, {} slots",
        dir,
        snapshot.records.len(),
        snapshot.slots.len()
    );
    Ok(Some(snapshot))
}

/// Check that a snapshot's record table and vector slots agree.
///
/// Any disagreement is reported as [`DbError::Inconsistent`].
pub fn verify_snapshot(snapshot: &StoreSnapshot) -> DbResult<()> {
    let dimension = snapshot.meta.dimension;

    // Slots: dense, correctly sized
    let mut slot_live: Vec<bool> = vec![false; snapshot.slots.len()];
    let mut seen_slots = vec![false; snapshot.slots.len()];
    for slot in &snapshot.slots {
        let idx = slot.slot as usize;
        if idx >= seen_slots.len() || seen_slots[idx] {
            return Err(DbError::inconsistent(format!(
                "vector slot {} is duplicated or out of range",
                slot.slot
            )));
        }
        if slot.vector.len() != dimension {
            return Err(DbError::inconsistent(format!(
                "slot {} has dimension {}, store dimension is {}",
                slot.slot,
                slot.vector.len(),
                dimension
            )));
        }
        seen_slots[idx] = true;
        slot_live[idx] = slot.live;
    }

    // Records: unique ids, one live per path, slots agree with liveness
    let mut ids: HashSet<(&str, &str)> = HashSet::new();
    let mut live_paths: HashSet<&str> = HashSet::new();
    let mut owners: HashMap<u64, (&str, &str)> = HashMap::new();
    for record in &snapshot.records {
        let id = (record.path.as_str(), record.revision.as_str());
        if !ids.insert(id) {
            return Err(DbError::inconsistent(format!(
                "duplicate record for {}@{}",
                record.path, record.revision
            )));
        }

        let slot_idx = record.slot as usize;
        if slot_idx >= slot_live.len() {
            return Err(DbError::inconsistent(format!(
                "record {}@{} references missing slot {}",
                record.path, record.revision, record.slot
            )));
        }

        if record.alive {
            if !slot_live[slot_idx] {
                return Err(DbError::inconsistent(format!(
                    "live record {}@{} references retired slot {}",
                    record.path, record.revision, record.slot
                )));
            }
            if let Some((path, rev)) = owners.insert(record.slot, id) {
                return Err(DbError::inconsistent(format!(
                    "slot {} is shared by {}@{} and {}@{}",
                    record.slot, path, rev, record.path, record.revision
                )));
            }
            if !live_paths.insert(record.path.as_str()) {
                return Err(DbError::inconsistent(format!(
                    "more than one live record for path {}",
                    record.path
                )));
            }
        } else if slot_live[slot_idx] {
            return Err(DbError::inconsistent(format!(
                "tombstoned record {}@{} references live slot {}",
                record.path, record.revision, record.slot
            )));
        }
    }

    // Every live slot must be owned
    for (idx, live) in slot_live.iter().enumerate() {
        if *live && !owners.contains_key(&(idx as u64)) {
            return Err(DbError::inconsistent(format!(
                "live slot {} has no live record",
                idx
            )));
        }
    }

    let meta = &snapshot.meta;
    if meta.record_count != snapshot.records.len()
        || meta.live_count != owners.len()
        || meta.slot_count != snapshot.slots.len()
    {
        return Err(DbError::inconsistent(format!(
            "metadata counts (records {}, live {}, slots {}) do not match contents (records {}, live {}, slots {})",
            meta.record_count,
            meta.live_count,
            meta.slot_count,
            snapshot.records.len(),
            owners.len(),
            snapshot.slots.len()
        )));
    }

    Ok(())
}

// ============================================================================
// Watermark
// ============================================================================

/// Read the persisted watermark, if any.
pub fn read_watermark(dir: &Path) -> DbResult<Option<String>> {
    let path = dir.join(WATERMARK_FILENAME);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).map_err(|e| DbError::snapshot_io(&path, e.to_string()))?;
    let revision = text.trim();
    if revision.is_empty() {
        Ok(None)
    } else {
        Ok(Some(revision.to_string()))
    }
}

/// Persist the watermark.
pub fn write_watermark(dir: &Path, revision: &str) -> DbResult<()> {
    fs::create_dir_all(dir).map_err(|e| DbError::snapshot_io(dir, e.to_string()))?;
    let path = dir.join(WATERMARK_FILENAME);
    let tmp = tmp_path(&path);
    fs::write(&tmp, format!("{}\n", revision))
        .map_err(|e| DbError::snapshot_io(&tmp, e.to_string()))?;
    commit_tmp(&tmp, &path)?;
    trace!("Watermark set to {}", revision);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn commit_tmp(tmp: &Path, target: &Path) -> DbResult<()> {
    fs::rename(tmp, target).map_err(|e| DbError::snapshot_io(target, e.to_string()))
}

fn write_jsonl_tmp<T: Serialize>(target: &Path, rows: &[T]) -> DbResult<PathBuf> {
    let tmp = tmp_path(target);
    let file = File::create(&tmp).map_err(|e| DbError::snapshot_io(&tmp, e.to_string()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let line = serde_json::to_string(row)?;
        writeln!(writer, "{}", line).map_err(|e| DbError::snapshot_io(&tmp, e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| DbError::snapshot_io(&tmp, e.to_string()))?;
    Ok(tmp)
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> DbResult<Vec<T>> {
    if !path.is_file() {
        return Err(DbError::inconsistent(format!(
            "{} is missing",
            path.display()
        )));
    }

    let file = File::open(path).map_err(|e| DbError::snapshot_io(path, e.to_string()))?;
    let reader = BufReader::new(file);

    let mut rows = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| DbError::snapshot_io(path, e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str::<T>(&line).map_err(|e| {
            DbError::snapshot_parse(path, format!("line {}: {}", line_num + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

// ============================================================================
// Tests
// ============================================================================
