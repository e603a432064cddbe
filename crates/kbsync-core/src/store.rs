//! The knowledge store.
//!
//! A [`KnowledgeStore`] maps [`DocumentId`]s to records (fingerprint,
//! summary, vector) and keeps a flat L2 index over the live vectors.
//!
//! ## Invariants
//!
//! - At most one live record per path. Upserting a path at a new revision
//!   supersedes the previous live record, which is tombstoned and kept for
//!   [`KnowledgeStore::history`].
//! - Every live record owns exactly one live index slot and every live slot
//!   has exactly one live owner.
//! - Every vector has the store's dimension.
//!
//! ## Locking
//!
//! Records, slot ownership and the index sit behind one `RwLock`. Mutations
//! happen in a single write-locked section; summarizer and embedder calls
//! happen before the lock is taken, so a slow or failed model call never
//! blocks readers and never leaves a partial mutation behind.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use kbsync_db::index::{FlatL2Index, VectorIndexBackend, VectorSlot};
use kbsync_db::snapshot::{self, StoreMeta, StoreSnapshot};
use tracing::{debug, info, trace, warn};

use crate::collaborators::{Embedder, Summarizer};
use crate::db_adapter::{from_db_error, from_stored_record, to_stored_record};
use crate::errors::{KbError, KbResult};
use crate::policy::CallPolicy;
use crate::types::{
    fingerprint, DocumentId, DocumentRecord, RecordRef, SearchFilter, SearchHit, StoreStats,
    UpsertStatus, Upserted,
};

// ============================================================================
// StoreState
// ============================================================================

struct StoreState {
    records: HashMap<DocumentId, RecordRef>,
    live_by_path: HashMap<String, DocumentId>,
    slot_owner: HashMap<VectorSlot, DocumentId>,
    /// Latest record written for each fingerprint; lets renamed or reverted
    /// content reuse its summary and vector.
    by_fingerprint: HashMap<String, DocumentId>,
    index: Box<dyn VectorIndexBackend>,
    watermark: Option<String>,
    created_at: DateTime<Utc>,
    dirty: bool,
}

impl StoreState {
    fn empty(dimension: usize) -> Self {
        Self {
            records: HashMap::new(),
            live_by_path: HashMap::new(),
            slot_owner: HashMap::new(),
            by_fingerprint: HashMap::new(),
            index: Box::new(FlatL2Index::new(dimension)),
            watermark: None,
            created_at: Utc::now(),
            dirty: false,
        }
    }

    fn from_snapshot(snap: StoreSnapshot, watermark: Option<String>) -> KbResult<Self> {
        let index = FlatL2Index::from_slots(snap.meta.dimension, snap.slots)
            .map_err(|e| from_db_error(e, None))?;

        let mut state = Self {
            index: Box::new(index),
            watermark,
            created_at: snap.meta.created_at,
            ..Self::empty(snap.meta.dimension)
        };

        for stored in snap.records {
            let record = from_stored_record(stored, state.index.as_ref())?;
            if record.alive {
                state
                    .live_by_path
                    .insert(record.id.path().to_string(), record.id.clone());
                state.slot_owner.insert(record.slot, record.id.clone());
            }
            let keep_existing = state
                .by_fingerprint
                .get(&record.fingerprint)
                .and_then(|id| state.records.get(id))
                .map(|r| r.alive || r.updated_at > record.updated_at)
                .unwrap_or(false);
            if !keep_existing {
                state
                    .by_fingerprint
                    .insert(record.fingerprint.clone(), record.id.clone());
            }
            state.records.insert(record.id.clone(), record);
        }

        Ok(state)
    }

    fn live_record_for_path(&self, path: &str) -> Option<&RecordRef> {
        self.live_by_path
            .get(path)
            .and_then(|id| self.records.get(id))
    }

    /// Summary and vector of any record holding `fp`.
    fn cached_by_fingerprint(&self, fp: &str) -> Option<(String, Vec<f32>)> {
        self.by_fingerprint
            .get(fp)
            .and_then(|id| self.records.get(id))
            .filter(|r| r.fingerprint == fp)
            .map(|r| (r.summary.clone(), r.vector.clone()))
    }

    fn live_count(&self) -> usize {
        self.live_by_path.len()
    }

    fn snapshot(&self, dimension: usize) -> StoreSnapshot {
        let mut records: Vec<&RecordRef> = self.records.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let mut meta = StoreMeta::new(dimension);
        meta.created_at = self.created_at;
        meta.record_count = records.len();
        meta.live_count = self.live_count();
        meta.slot_count = self.index.slot_count();

        StoreSnapshot {
            meta,
            records: records.into_iter().map(|r| to_stored_record(r)).collect(),
            slots: self.index.export(),
        }
    }

    /// Retire a live record's slot and swap in its tombstone.
    fn tombstone_live(&mut self, id: &DocumentId) -> KbResult<()> {
        let record = self
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| KbError::inconsistent(format!("live id {} has no record", id)))?;

        self.index
            .retire(record.slot)
            .map_err(|e| from_db_error(e, None))?;

        let tombstone = DocumentRecord {
            alive: false,
            updated_at: Utc::now(),
            ..(*record).clone()
        };
        self.records.insert(id.clone(), Arc::new(tombstone));
        self.slot_owner.remove(&record.slot);
        if self.live_by_path.get(id.path()) == Some(id) {
            self.live_by_path.remove(id.path());
        }
        self.dirty = true;
        Ok(())
    }
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Durable mapping of document ids to summaries and vectors, with a vector
/// index for nearest-neighbor search.
pub struct KnowledgeStore {
    dimension: usize,
    dir: Option<PathBuf>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    policy: CallPolicy,
    state: RwLock<StoreState>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("dimension", &self.dimension)
            .field("dir", &self.dir)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl KnowledgeStore {
    /// Create an empty store that is never persisted.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidConfiguration`] if `dimension` is zero or the
    /// embedder produces vectors of another dimension.
    pub fn in_memory(
        dimension: usize,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
    ) -> KbResult<Self> {
        check_dimension(dimension, embedder.as_ref())?;
        Ok(Self {
            dimension,
            dir: None,
            summarizer,
            embedder,
            policy: CallPolicy::default(),
            state: RwLock::new(StoreState::empty(dimension)),
        })
    }

    /// Open the store persisted in `dir`, or create an empty one there.
    ///
    /// # Errors
    ///
    /// - [`KbError::StoreIncompatible`] if the persisted dimension differs
    /// - [`KbError::Inconsistent`] if the persisted record table and index disagree
    pub fn open(
        dir: &Path,
        dimension: usize,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
    ) -> KbResult<Self> {
        check_dimension(dimension, embedder.as_ref())?;

        let loaded = snapshot::load_snapshot(dir, dimension).map_err(|e| from_db_error(e, Some(dir)))?;
        let watermark = snapshot::read_watermark(dir).map_err(|e| from_db_error(e, Some(dir)))?;

        let state = match loaded {
            Some(snap) => {
                let state = StoreState::from_snapshot(snap, watermark)?;
                info!(
                    "Opened knowledge store at {}: {} live records, {} slots",
                    dir.display(),
                    state.live_count(),
                    state.index.slot_count()
                );
                state
            }
            None => {
                debug!("Creating new knowledge store at {}", dir.display());
                StoreState {
                    watermark,
                    ..StoreState::empty(dimension)
                }
            }
        };

        Ok(Self {
            dimension,
            dir: Some(dir.to_path_buf()),
            summarizer,
            embedder,
            policy: CallPolicy::default(),
            state: RwLock::new(state),
        })
    }

    /// Use a different call policy for summarizer and embedder calls.
    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Store directory, `None` for in-memory stores.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The embedder that produced this store's vectors.
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    fn read_state(&self) -> KbResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|e| KbError::inconsistent(format!("store lock poisoned: {}", e)))
    }

    fn write_state(&self) -> KbResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|e| KbError::inconsistent(format!("store lock poisoned: {}", e)))
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Insert or replace the record for `id`.
    ///
    /// If the live record for the path already holds identical content no
    /// collaborator is called and the status is [`UpsertStatus::Unchanged`].
    /// When that record carries another revision it is re-keyed: a record
    /// under `id` takes over its summary and vector and the old id is
    /// tombstoned. Content seen before under any id reuses that record's
    /// summary and vector. Otherwise the summarizer runs, its summary is
    /// embedded, and the new record replaces the previous live record for the
    /// path in one step.
    ///
    /// # Errors
    ///
    /// - Collaborator failures and timeouts; the store is unchanged
    /// - [`KbError::DimensionMismatch`] if the embedder returns a wrong-sized vector
    pub fn upsert(&self, id: DocumentId, content: &str) -> KbResult<Upserted> {
        let fp = fingerprint(content);

        let cached = {
            let state = self.read_state()?;
            match state.live_record_for_path(id.path()) {
                Some(existing) if existing.fingerprint == fp && existing.id == id => {
                    trace!("{} unchanged (fingerprint match)", id);
                    return Ok(Upserted {
                        record: Arc::clone(existing),
                        status: UpsertStatus::Unchanged,
                    });
                }
                Some(existing) if existing.fingerprint == fp => {
                    Some((existing.summary.clone(), existing.vector.clone()))
                }
                _ => state.cached_by_fingerprint(&fp),
            }
        };

        let (summary, vector) = match cached {
            Some(hit) => {
                debug!("{} reuses summary and vector of identical content", id);
                hit
            }
            None => self.summarize_and_embed(content)?,
        };

        if vector.len() != self.dimension {
            return Err(KbError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut state = self.write_state()?;

        // Another writer may have stored the same content meanwhile
        let mut carried_over = false;
        if let Some(existing) = state.live_record_for_path(id.path()) {
            if existing.fingerprint == fp {
                if existing.id == id {
                    return Ok(Upserted {
                        record: Arc::clone(existing),
                        status: UpsertStatus::Unchanged,
                    });
                }
                carried_over = true;
            }
        }

        let prior_live = state.live_by_path.get(id.path()).cloned();
        let replaces_same_id = state.records.contains_key(&id);

        let slot = state
            .index
            .insert(vector.clone())
            .map_err(|e| from_db_error(e, None))?;

        if let Some(prior) = &prior_live {
            if let Err(err) = state.tombstone_live(prior) {
                // Undo the insert so no live slot is left without an owner
                if let Err(rollback) = state.index.retire(slot) {
                    warn!("Rollback of slot {} failed: {}", slot, rollback);
                }
                return Err(err);
            }
        }

        let record = Arc::new(DocumentRecord {
            id: id.clone(),
            fingerprint: fp.clone(),
            summary,
            vector,
            updated_at: Utc::now(),
            slot,
            alive: true,
        });

        state.records.insert(id.clone(), Arc::clone(&record));
        state.slot_owner.insert(slot, id.clone());
        state.live_by_path.insert(id.path().to_string(), id.clone());
        state.by_fingerprint.insert(fp, id.clone());
        state.dirty = true;

        let status = if carried_over {
            UpsertStatus::Unchanged
        } else if prior_live.is_some() || replaces_same_id {
            UpsertStatus::Replaced
        } else {
            UpsertStatus::Inserted
        };
        debug!("Upserted {} into slot {} ({:?})", id, slot, status);

        Ok(Upserted { record, status })
    }

    fn summarize_and_embed(&self, content: &str) -> KbResult<(String, Vec<f32>)> {
        let summarizer = Arc::clone(&self.summarizer);
        let text = content.to_string();
        let summary = self
            .policy
            .call("summarizer", move || summarizer.summarize(&text))?;

        let embedder = Arc::clone(&self.embedder);
        let to_embed = summary.clone();
        let vector = self
            .policy
            .call("embedder", move || embedder.embed(&to_embed))?;

        Ok((summary, vector))
    }

    /// Mark the live record for `id` dead and retire its index slot.
    ///
    /// # Errors
    ///
    /// [`KbError::DocumentNotFound`] if `id` has no live record.
    pub fn tombstone(&self, id: &DocumentId) -> KbResult<()> {
        let mut state = self.write_state()?;
        let is_live = state.records.get(id).map(|r| r.alive).unwrap_or(false);
        if !is_live {
            return Err(KbError::DocumentNotFound(id.to_string()));
        }
        state.tombstone_live(id)?;
        debug!("Tombstoned {}", id);
        Ok(())
    }

    /// Tombstone whatever record is live for `path`, returning its id.
    ///
    /// # Errors
    ///
    /// [`KbError::DocumentNotFound`] if no record is live for the path.
    pub fn tombstone_path(&self, path: &str) -> KbResult<DocumentId> {
        let mut state = self.write_state()?;
        let id = state
            .live_by_path
            .get(path)
            .cloned()
            .ok_or_else(|| KbError::DocumentNotFound(path.to_string()))?;
        state.tombstone_live(&id)?;
        debug!("Tombstoned {} (path removed)", id);
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Up to `k` live records nearest to `query`.
    ///
    /// Ordered by ascending Euclidean distance, ties by [`DocumentId`]. The
    /// filter is applied before truncation.
    ///
    /// # Errors
    ///
    /// [`KbError::DimensionMismatch`] if `query` does not have the store's dimension.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> KbResult<Vec<SearchHit>> {
        Ok(self
            .search_records(query, k, filter)?
            .into_iter()
            .map(|(record, distance)| SearchHit {
                id: record.id.clone(),
                distance,
            })
            .collect())
    }

    /// Like [`search`](Self::search), returning the records themselves.
    pub fn search_records(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> KbResult<Vec<(RecordRef, f32)>> {
        if query.len() != self.dimension {
            return Err(KbError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.read_state()?;
        let accept = |slot: VectorSlot| match state.slot_owner.get(&slot) {
            Some(id) => filter.map(|f| f.matches(id)).unwrap_or(true),
            None => false,
        };
        let hits = state
            .index
            .scan(query, &accept)
            .map_err(|e| from_db_error(e, None))?;

        let mut ranked = Vec::with_capacity(hits.len());
        for hit in hits {
            let record = state
                .slot_owner
                .get(&hit.slot)
                .and_then(|id| state.records.get(id))
                .ok_or_else(|| {
                    KbError::inconsistent(format!("live slot {} has no record", hit.slot))
                })?;
            ranked.push((Arc::clone(record), hit.distance));
        }

        ranked.sort_by(|(ra, da), (rb, db)| da.total_cmp(db).then_with(|| ra.id.cmp(&rb.id)));
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Record for `id`, live or tombstoned.
    pub fn get(&self, id: &DocumentId) -> KbResult<Option<RecordRef>> {
        Ok(self.read_state()?.records.get(id).cloned())
    }

    /// Id of the live record for `path`.
    pub fn live_id_for_path(&self, path: &str) -> KbResult<Option<DocumentId>> {
        Ok(self.read_state()?.live_by_path.get(path).cloned())
    }

    /// Ids of every live record, sorted.
    pub fn live_ids(&self) -> KbResult<Vec<DocumentId>> {
        let state = self.read_state()?;
        let mut ids: Vec<DocumentId> = state.live_by_path.values().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Every record ever stored for `path`, oldest first.
    pub fn history(&self, path: &str) -> KbResult<Vec<RecordRef>> {
        let state = self.read_state()?;
        let mut records: Vec<RecordRef> = state
            .records
            .values()
            .filter(|r| r.id.path() == path)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.alive
                .cmp(&b.alive)
                .then_with(|| a.updated_at.cmp(&b.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    pub fn stats(&self) -> KbResult<StoreStats> {
        let state = self.read_state()?;
        let live = state.live_count();
        Ok(StoreStats {
            dimension: self.dimension,
            live_records: live,
            tombstoned_records: state.records.len() - live,
            index_slots: state.index.slot_count(),
            watermark: state.watermark.clone(),
            persisted: self.dir.is_some(),
        })
    }

    // ------------------------------------------------------------------------
    // Watermark
    // ------------------------------------------------------------------------

    /// Last fully reconciled revision.
    pub fn watermark(&self) -> KbResult<Option<String>> {
        Ok(self.read_state()?.watermark.clone())
    }

    /// Record `revision` as fully reconciled. Persisted on the next flush.
    pub fn set_watermark(&self, revision: impl Into<String>) -> KbResult<()> {
        let revision = revision.into();
        let mut state = self.write_state()?;
        if state.watermark.as_deref() != Some(revision.as_str()) {
            debug!("Watermark -> {}", revision);
            state.watermark = Some(revision);
            state.dirty = true;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Check that records and index agree.
    pub fn verify(&self) -> KbResult<()> {
        let state = self.read_state()?;
        let snap = state.snapshot(self.dimension);
        snapshot::verify_snapshot(&snap).map_err(|e| from_db_error(e, self.dir.as_deref()))?;

        let live_slots: HashSet<VectorSlot> = state.slot_owner.keys().copied().collect();
        if live_slots.len() != state.index.live_len() {
            return Err(KbError::inconsistent(format!(
                "{} owned slots but {} live slots in the index",
                live_slots.len(),
                state.index.live_len()
            )));
        }
        Ok(())
    }

    /// Persist the store. A no-op for in-memory stores.
    pub fn flush(&self) -> KbResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let mut state = self.write_state()?;
        let snap = state.snapshot(self.dimension);
        snapshot::save_snapshot(dir, &snap).map_err(|e| from_db_error(e, Some(dir)))?;
        if let Some(watermark) = &state.watermark {
            snapshot::write_watermark(dir, watermark).map_err(|e| from_db_error(e, Some(dir)))?;
        }
        state.dirty = false;

        info!(
            "Flushed knowledge store to {}: {} records, {} live",
            dir.display(),
            snap.meta.record_count,
            snap.meta.live_count
        );
        Ok(())
    }
}

impl Drop for KnowledgeStore {
    fn drop(&mut self) {
        let dirty = match self.state.get_mut() {
            Ok(state) => state.dirty,
            Err(_) => false,
        };
        if dirty && self.dir.is_some() {
            if let Err(e) = self.flush() {
                warn!("Failed to flush knowledge store on shutdown: {}", e);
            }
        }
    }
}

fn check_dimension(dimension: usize, embedder: &dyn Embedder) -> KbResult<()> {
    if dimension == 0 {
        return Err(KbError::invalid_config(
            "store dimension cannot be 0",
            "Set store.dimension to the embedding model's output size",
        ));
    }
    if embedder.dimension() != dimension {
        return Err(KbError::invalid_config(
            format!(
                "embedder produces {}-dimensional vectors but the store holds {}",
                embedder.dimension(),
                dimension
            ),
            "Set store.dimension to match the embedding model",
        ));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EchoSummarizer, FailingEmbedder, TableEmbedder};
    use std::time::Duration;
    use tempfile::TempDir;

    fn id(path: &str, rev: &str) -> DocumentId {
        DocumentId::new(path, rev).unwrap()
    }

    fn table() -> Arc<TableEmbedder> {
        Arc::new(
            TableEmbedder::new(2)
                .with("hello", vec![1.0, 0.0])
                .with("world", vec![0.0, 1.0])
                .with("hello again", vec![0.9, 0.1]),
        )
    }

    fn store_with(embedder: Arc<TableEmbedder>) -> (KnowledgeStore, Arc<EchoSummarizer>) {
        let summarizer = Arc::new(EchoSummarizer::new());
        let store = KnowledgeStore::in_memory(2, summarizer.clone(), embedder)
            .unwrap()
            .with_policy(CallPolicy::immediate());
        (store, summarizer)
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let embedder = table();
        let (store, summarizer) = store_with(embedder.clone());

        let first = store.upsert(id("a.txt", "r1"), "hello").unwrap();
        let second = store.upsert(id("a.txt", "r1"), "hello").unwrap();

        assert_eq!(first.status, UpsertStatus::Inserted);
        assert_eq!(second.status, UpsertStatus::Unchanged);
        assert_eq!(summarizer.calls(), 1);
        assert_eq!(embedder.calls(), 1);
        assert_eq!(store.stats().unwrap().index_slots, 1);
    }

    #[test]
    fn test_unchanged_content_at_new_revision_is_rekeyed() {
        let embedder = table();
        let (store, summarizer) = store_with(embedder.clone());

        store.upsert(id("a.txt", "r1"), "hello").unwrap();
        store.upsert(id("b.txt", "r1"), "world").unwrap();
        let a = store.upsert(id("a.txt", "r2"), "hello").unwrap();
        let b = store.upsert(id("b.txt", "r2"), "world").unwrap();

        assert_eq!(a.status, UpsertStatus::Unchanged);
        assert_eq!(b.status, UpsertStatus::Unchanged);
        assert_eq!(a.record.id, id("a.txt", "r2"));
        assert_eq!(summarizer.calls(), 2);
        assert_eq!(embedder.calls(), 2);

        let current = store.get(&id("a.txt", "r2")).unwrap().unwrap();
        assert!(current.alive);
        assert_eq!(current.vector, vec![1.0, 0.0]);
        assert!(!store.get(&id("a.txt", "r1")).unwrap().unwrap().alive);
        assert_eq!(
            store.live_ids().unwrap(),
            vec![id("a.txt", "r2"), id("b.txt", "r2")]
        );

        let at_r2 = SearchFilter::new().with_revision("r2");
        let hits = store.search(&[0.0, 0.0], 10, Some(&at_r2)).unwrap();
        assert_eq!(hits.len(), 2);

        // Same id again is a plain no-op
        let repeat = store.upsert(id("a.txt", "r2"), "hello").unwrap();
        assert_eq!(repeat.status, UpsertStatus::Unchanged);
        assert_eq!(store.history("a.txt").unwrap().len(), 2);
        store.verify().unwrap();
    }

    #[test]
    fn test_new_revision_supersedes_prior_record() {
        let (store, _) = store_with(table());

        store.upsert(id("a.txt", "r1"), "hello").unwrap();
        let replaced = store.upsert(id("a.txt", "r2"), "hello again").unwrap();

        assert_eq!(replaced.status, UpsertStatus::Replaced);
        assert_eq!(store.live_ids().unwrap(), vec![id("a.txt", "r2")]);

        let old = store.get(&id("a.txt", "r1")).unwrap().unwrap();
        assert!(!old.alive);

        let history = store.history("a.txt").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].alive);
        assert!(history[1].alive);

        store.verify().unwrap();
    }

    #[test]
    fn test_uniqueness_of_ids() {
        let (store, _) = store_with(table());
        store.upsert(id("a.txt", "r1"), "hello").unwrap();
        store.upsert(id("a.txt", "r1"), "world").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.live_records, 1);
        assert_eq!(stats.tombstoned_records, 0);
        assert_eq!(stats.index_slots, 2);
        store.verify().unwrap();
    }

    #[test]
    fn test_identical_content_reuses_summary_and_vector() {
        let embedder = table();
        let (store, summarizer) = store_with(embedder.clone());

        store.upsert(id("a.txt", "r1"), "hello").unwrap();
        let renamed = store.upsert(id("b.txt", "r2"), "hello").unwrap();

        assert_eq!(renamed.status, UpsertStatus::Inserted);
        assert_eq!(summarizer.calls(), 1);
        assert_eq!(embedder.calls(), 1);
        assert_eq!(store.live_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_search_equals_live_set() {
        let (store, _) = store_with(table());
        store.upsert(id("a.txt", "r1"), "hello").unwrap();
        store.upsert(id("b.txt", "r1"), "world").unwrap();
        store.upsert(id("a.txt", "r2"), "hello again").unwrap();
        store.tombstone(&id("b.txt", "r1")).unwrap();

        let hits = store.search(&[0.0, 0.0], 100, None).unwrap();
        let found: Vec<DocumentId> = hits.into_iter().map(|h| h.id).collect();
        assert_eq!(found, store.live_ids().unwrap());
        assert_eq!(found, vec![id("a.txt", "r2")]);
        store.verify().unwrap();
    }

    #[test]
    fn test_search_ranking_and_ties() {
        let embedder = Arc::new(
            TableEmbedder::new(2)
                .with("x", vec![1.0, 0.0])
                .with("y", vec![0.0, 1.0])
                .with("z", vec![-1.0, 0.0]),
        );
        let (store, _) = store_with(embedder);
        store.upsert(id("c.txt", "r1"), "x").unwrap();
        store.upsert(id("b.txt", "r1"), "y").unwrap();
        store.upsert(id("a.txt", "r1"), "z").unwrap();

        // All three are at distance 1 from the origin
        let hits = store.search(&[0.0, 0.0], 3, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.path()).collect();
        assert_eq!(ids, vec!["a.txt", "b.txt", "c.txt"]);

        let nearest = store.search(&[1.0, 0.0], 1, None).unwrap();
        assert_eq!(nearest[0].id.path(), "c.txt");
        assert_eq!(nearest[0].distance, 0.0);
    }

    #[test]
    fn test_search_filter_before_truncation() {
        let (store, _) = store_with(table());
        store.upsert(id("src/a.rs", "r1"), "hello").unwrap();
        store.upsert(id("docs/b.md", "r1"), "world").unwrap();

        let filter = SearchFilter::new().with_path_prefix("docs/");
        let hits = store.search(&[1.0, 0.0], 1, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.path(), "docs/b.md");
    }

    #[test]
    fn test_search_dimension_guard() {
        let (store, _) = store_with(table());
        store.upsert(id("a.txt", "r1"), "hello").unwrap();
        let before = store.stats().unwrap();

        let err = store.search(&[1.0, 0.0, 0.0], 1, None).unwrap_err();
        assert!(matches!(
            err,
            KbError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(store.stats().unwrap(), before);
    }

    #[test]
    fn test_wrong_sized_embedding_rejected() {
        let embedder = Arc::new(TableEmbedder::new(2).with("bad", vec![1.0, 2.0, 3.0]));
        let (store, _) = store_with(embedder);

        let err = store.upsert(id("a.txt", "r1"), "bad").unwrap_err();
        assert!(matches!(err, KbError::DimensionMismatch { .. }));
        assert!(store.live_ids().unwrap().is_empty());
        assert_eq!(store.stats().unwrap().index_slots, 0);
    }

    #[test]
    fn test_failed_embedding_leaves_store_unchanged() {
        let summarizer = Arc::new(EchoSummarizer::new());
        let store = KnowledgeStore::in_memory(2, summarizer, Arc::new(FailingEmbedder::new(2)))
            .unwrap()
            .with_policy(CallPolicy::immediate());

        let err = store.upsert(id("a.txt", "r1"), "hello").unwrap_err();
        assert!(err.is_retryable());
        assert!(store.get(&id("a.txt", "r1")).unwrap().is_none());
        assert_eq!(store.stats().unwrap().index_slots, 0);
    }

    #[test]
    fn test_timeout_leaves_store_unchanged() {
        let summarizer = Arc::new(EchoSummarizer::new());
        let embedder = Arc::new(TableEmbedder::new(2).with_delay(Duration::from_millis(300)));
        let store = KnowledgeStore::in_memory(2, summarizer, embedder)
            .unwrap()
            .with_policy(CallPolicy::immediate().with_timeout(Duration::from_millis(20)));

        let err = store.upsert(id("a.txt", "r1"), "hello").unwrap_err();
        assert!(matches!(err, KbError::CollaboratorTimeout { .. }));
        assert!(err.is_retryable());
        assert!(store.live_ids().unwrap().is_empty());
    }

    #[test]
    fn test_tombstone_not_found() {
        let (store, _) = store_with(table());
        let err = store.tombstone(&id("a.txt", "r1")).unwrap_err();
        assert!(matches!(err, KbError::DocumentNotFound(_)));

        store.upsert(id("a.txt", "r1"), "hello").unwrap();
        store.tombstone(&id("a.txt", "r1")).unwrap();
        assert!(matches!(
            store.tombstone(&id("a.txt", "r1")),
            Err(KbError::DocumentNotFound(_))
        ));
    }

    #[test]
    fn test_tombstone_path() {
        let (store, _) = store_with(table());
        store.upsert(id("a.txt", "r1"), "hello").unwrap();

        let removed = store.tombstone_path("a.txt").unwrap();
        assert_eq!(removed, id("a.txt", "r1"));
        assert!(store.live_id_for_path("a.txt").unwrap().is_none());
        assert!(store.get(&removed).unwrap().is_some());
    }

    #[test]
    fn test_embedder_dimension_must_match() {
        let summarizer = Arc::new(EchoSummarizer::new());
        let err = KnowledgeStore::in_memory(3, summarizer, table()).unwrap_err();
        assert!(matches!(err, KbError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let summarizer = Arc::new(EchoSummarizer::new());
        let embedder = table();

        {
            let store = KnowledgeStore::open(dir.path(), 2, summarizer.clone(), embedder.clone())
                .unwrap()
                .with_policy(CallPolicy::immediate());
            store.upsert(id("a.txt", "r1"), "hello").unwrap();
            store.upsert(id("b.txt", "r1"), "world").unwrap();
            store.upsert(id("a.txt", "r2"), "hello again").unwrap();
            store.tombstone_path("b.txt").unwrap();
            store.set_watermark("r2").unwrap();
            store.flush().unwrap();
        }

        let reopened = KnowledgeStore::open(dir.path(), 2, summarizer, embedder).unwrap();
        assert_eq!(reopened.live_ids().unwrap(), vec![id("a.txt", "r2")]);
        assert_eq!(reopened.watermark().unwrap().as_deref(), Some("r2"));
        assert_eq!(reopened.history("a.txt").unwrap().len(), 2);
        assert_eq!(reopened.stats().unwrap().index_slots, 3);
        reopened.verify().unwrap();

        let hits = reopened.search(&[0.9, 0.1], 1, None).unwrap();
        assert_eq!(hits[0].id, id("a.txt", "r2"));
    }

    #[test]
    fn test_drop_flushes_dirty_store() {
        let dir = TempDir::new().unwrap();
        let summarizer = Arc::new(EchoSummarizer::new());
        {
            let store = KnowledgeStore::open(dir.path(), 2, summarizer.clone(), table())
                .unwrap()
                .with_policy(CallPolicy::immediate());
            store.upsert(id("a.txt", "r1"), "hello").unwrap();
        }
        let reopened = KnowledgeStore::open(dir.path(), 2, summarizer, table()).unwrap();
        assert_eq!(reopened.live_ids().unwrap(), vec![id("a.txt", "r1")]);
    }

    #[test]
    fn test_open_rejects_inconsistent_snapshot() {
        let dir = TempDir::new().unwrap();
        let summarizer = Arc::new(EchoSummarizer::new());
        {
            let store = KnowledgeStore::open(dir.path(), 2, summarizer.clone(), table())
                .unwrap()
                .with_policy(CallPolicy::immediate());
            store.upsert(id("a.txt", "r1"), "hello").unwrap();
            store.flush().unwrap();
        }

        // Retire the only slot behind the record table's back
        let vectors = dir.path().join(kbsync_db::snapshot::VECTORS_FILENAME);
        let text = std::fs::read_to_string(&vectors).unwrap();
        std::fs::write(&vectors, text.replace("\"live\":true", "\"live\":false")).unwrap();

        let err = KnowledgeStore::open(dir.path(), 2, summarizer, table()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_open_rejects_dimension_change() {
        let dir = TempDir::new().unwrap();
        let summarizer = Arc::new(EchoSummarizer::new());
        {
            let store = KnowledgeStore::open(dir.path(), 2, summarizer.clone(), table()).unwrap();
            store.flush().unwrap();
        }

        let three = Arc::new(TableEmbedder::new(3));
        let err = KnowledgeStore::open(dir.path(), 3, summarizer, three).unwrap_err();
        assert!(matches!(err, KbError::StoreIncompatible { .. }));
    }

    #[test]
    fn test_concurrent_upserts_keep_invariants() {
        let embedder = Arc::new(TableEmbedder::new(2));
        let (store, _) = store_with(embedder);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let path = format!("f{}.txt", i % 4);
                        let rev = format!("r{}", t);
                        store
                            .upsert(id(&path, &rev), &format!("content {} {}", t, i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        store.verify().unwrap();
        assert_eq!(store.live_ids().unwrap().len(), 4);
    }
}
