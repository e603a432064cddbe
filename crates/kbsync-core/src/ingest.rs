//! Full-snapshot ingestion.
//!
//! The [`Ingestor`] lists every document a [`DocumentSource`] offers, reads
//! and upserts them on a bounded rayon pool, and reports one [`Outcome`] per
//! document. A document that cannot be read, summarized or embedded is
//! reported as failed and the pass continues. Only a store consistency error
//! aborts the pass.
//!
//! ## Pipeline
//!
//! 1. **List phase**: `source.list()` at `source.revision()`
//! 2. **Index phase**: read + upsert in parallel (`performance.maxInFlight` threads)
//! 3. **Prune phase** (optional): tombstone live paths missing from the snapshot
//! 4. **Finalize phase**: set the watermark and flush the store

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborators::DocumentSource;
use crate::config::KbConfig;
use crate::errors::{KbError, KbResult};
use crate::source::check_revision;
use crate::store::KnowledgeStore;
use crate::types::{DocumentId, Outcome, OutcomeCounts, UpsertStatus};

// ============================================================================
// BatchRunner
// ============================================================================

/// Bounded worker pool shared by full and incremental ingestion.
#[derive(Debug)]
pub(crate) struct BatchRunner {
    pool: ThreadPool,
}

impl BatchRunner {
    pub(crate) fn new(max_in_flight: usize, name: &'static str) -> KbResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(max_in_flight.max(1))
            .thread_name(move |i| format!("kbsync-{}-{}", name, i))
            .build()
            .map_err(|e| KbError::Io(std::io::Error::other(e.to_string())))?;
        Ok(Self { pool })
    }

    /// Read and upsert every id, in parallel.
    ///
    /// Outcomes come back in input order. Returns `Err` only for errors that
    /// make the store unusable.
    pub(crate) fn upsert_all<F>(
        &self,
        store: &KnowledgeStore,
        ids: Vec<DocumentId>,
        read: F,
    ) -> KbResult<Vec<(DocumentId, Outcome)>>
    where
        F: Fn(&DocumentId) -> KbResult<String> + Sync,
    {
        let results: Vec<(DocumentId, KbResult<Outcome>)> = self.pool.install(|| {
            ids.into_par_iter()
                .map(|id| {
                    let outcome = upsert_one(store, &id, &read);
                    (id, outcome)
                })
                .collect()
        });

        let mut outcomes = Vec::with_capacity(results.len());
        for (id, result) in results {
            outcomes.push((id, result?));
        }
        Ok(outcomes)
    }
}

fn upsert_one<F>(store: &KnowledgeStore, id: &DocumentId, read: &F) -> KbResult<Outcome>
where
    F: Fn(&DocumentId) -> KbResult<String>,
{
    let content = match read(id) {
        Ok(content) => content,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!("Failed to read {}: {}", id, e);
            if is_gone(&e) {
                retire_path(store, id)?;
            }
            return Ok(Outcome::failed(&e));
        }
    };

    match store.upsert(id.clone(), &content) {
        Ok(upserted) if upserted.status == UpsertStatus::Unchanged => Ok(Outcome::Unchanged),
        Ok(_) => Ok(Outcome::Indexed),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Failed to index {}: {}", id, e);
            Ok(Outcome::failed(&e))
        }
    }
}

/// Read failures that will not go away for this revision.
fn is_gone(err: &KbError) -> bool {
    matches!(
        err,
        KbError::ContentRejected { .. } | KbError::FileNotFound { .. }
    )
}

/// Tombstone the live record for `id`'s path, whatever its revision.
fn retire_path(store: &KnowledgeStore, id: &DocumentId) -> KbResult<()> {
    match store.tombstone_path(id.path()) {
        Ok(prior) => {
            info!("Retired {}: content at {} is not indexable", prior, id);
            Ok(())
        }
        Err(KbError::DocumentNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

// ============================================================================
// IngestReport
// ============================================================================

/// Result of a full-snapshot pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Snapshot revision.
    pub revision: String,
    /// One outcome per listed document, sorted by id.
    pub outcomes: Vec<(DocumentId, Outcome)>,
    /// Every document id the snapshot contained.
    pub manifest: Vec<DocumentId>,
    /// Records tombstoned because their path left the snapshot.
    pub pruned: Vec<(DocumentId, Outcome)>,
    /// Whether the watermark now points at `revision`.
    pub watermark_advanced: bool,
}

impl IngestReport {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(
            self.outcomes
                .iter()
                .chain(self.pruned.iter())
                .map(|(_, outcome)| outcome),
        )
    }

    /// Documents whose failure may go away on a rerun.
    pub fn retryable_failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_retryable_failure())
            .count()
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// Full-snapshot ingestion into a [`KnowledgeStore`].
#[derive(Debug)]
pub struct Ingestor {
    store: Arc<KnowledgeStore>,
    runner: BatchRunner,
    prune_stale: bool,
}

impl Ingestor {
    pub fn new(store: Arc<KnowledgeStore>, config: &KbConfig) -> KbResult<Self> {
        Ok(Self {
            store,
            runner: BatchRunner::new(config.performance.max_in_flight, "ingest")?,
            prune_stale: config.ingest.prune_stale,
        })
    }

    /// Override `ingest.pruneStale`.
    pub fn with_prune_stale(mut self, prune: bool) -> Self {
        self.prune_stale = prune;
        self
    }

    /// Upsert every document of `source` at its revision.
    ///
    /// The watermark moves to the snapshot revision unless some document
    /// failed retryably; a rerun is cheap because unchanged content is skipped.
    ///
    /// # Errors
    ///
    /// Listing failures and store consistency errors. Per-document failures
    /// are reported in [`IngestReport::outcomes`].
    pub fn ingest_all(&self, source: &dyn DocumentSource) -> KbResult<IngestReport> {
        let revision = source.revision()?;
        check_revision(&revision)?;

        let paths = source.list()?;
        info!("Ingesting {} documents at {}", paths.len(), revision);

        let mut manifest = Vec::with_capacity(paths.len());
        for path in paths {
            match DocumentId::new(path, revision.as_str()) {
                Ok(id) => manifest.push(id),
                Err(e) => warn!("Skipping unrepresentable path: {}", e),
            }
        }
        manifest.sort();
        manifest.dedup();

        let outcomes = self
            .runner
            .upsert_all(&self.store, manifest.clone(), |id| source.read(id.path()))?;

        let pruned = if self.prune_stale {
            self.prune_stale(&manifest)?
        } else {
            Vec::new()
        };

        let retryable = outcomes
            .iter()
            .filter(|(_, o)| o.is_retryable_failure())
            .count();
        let watermark_advanced = retryable == 0;
        if watermark_advanced {
            self.store.set_watermark(revision.as_str())?;
        } else {
            warn!(
                "{} documents failed retryably; watermark stays at {:?}",
                retryable,
                self.store.watermark()?
            );
        }

        self.store.flush()?;

        let report = IngestReport {
            revision,
            outcomes,
            manifest,
            pruned,
            watermark_advanced,
        };
        let counts = report.counts();
        info!(
            "Ingest of {} done: {} indexed, {} unchanged, {} removed, {} failed",
            report.revision, counts.indexed, counts.unchanged, counts.removed, counts.failed
        );
        Ok(report)
    }

    /// Tombstone live records whose path is not in `manifest`.
    pub fn prune_stale(&self, manifest: &[DocumentId]) -> KbResult<Vec<(DocumentId, Outcome)>> {
        let keep: HashSet<&str> = manifest.iter().map(DocumentId::path).collect();
        let mut pruned = Vec::new();

        for id in self.store.live_ids()? {
            if keep.contains(id.path()) {
                continue;
            }
            match self.store.tombstone(&id) {
                Ok(()) => {
                    debug!("Pruned {}", id);
                    pruned.push((id, Outcome::Removed));
                }
                // Removed concurrently
                Err(KbError::DocumentNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !pruned.is_empty() {
            info!("Pruned {} stale records", pruned.len());
        }
        Ok(pruned)
    }
}

// ============================================================================
// Tests
// ============================================================================
