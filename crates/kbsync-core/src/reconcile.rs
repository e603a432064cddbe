//! Incremental ingestion from commit deltas.
//!
//! A [`ChangeReconciler`] applies the changed-file list of one commit: added
//! and modified paths are re-read at the commit's revision and upserted,
//! removed paths have their live record tombstoned. Paths the commit did not
//! touch are never read.
//!
//! [`ChangeReconciler::catch_up`] replays every commit after the store's
//! watermark, oldest first. The watermark only moves past a commit once all
//! of its paths were applied or failed permanently, so a commit that hit a
//! transient failure is replayed on the next run.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborators::{CommitFeed, DocumentSource};
use crate::config::KbConfig;
use crate::errors::{KbError, KbResult};
use crate::ingest::BatchRunner;
use crate::store::KnowledgeStore;
use crate::types::{ChangeKind, CommitDelta, DocumentId, Outcome, OutcomeCounts};

/// Outcomes of applying one commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaReport {
    pub revision: String,
    pub outcomes: Vec<(DocumentId, Outcome)>,
    /// Whether the watermark now points at `revision`.
    pub watermark_advanced: bool,
}

impl DeltaReport {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(self.outcomes.iter().map(|(_, o)| o))
    }

    /// True if replaying this commit could change the result.
    pub fn has_retryable_failures(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| o.is_retryable_failure())
    }
}

/// Result of a catch-up run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpReport {
    /// Watermark before the run.
    pub from: String,
    /// Watermark after the run.
    pub watermark: String,
    /// Commits applied, oldest first. The last one may have stalled.
    pub applied: Vec<DeltaReport>,
    /// Commit whose retryable failures stopped the run.
    pub stalled_at: Option<String>,
    /// Commits not attempted because of the stall.
    pub pending: usize,
}

impl CatchUpReport {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(
            self.applied
                .iter()
                .flat_map(|d| d.outcomes.iter().map(|(_, o)| o)),
        )
    }

    pub fn is_complete(&self) -> bool {
        self.stalled_at.is_none()
    }
}

/// Applies commit deltas to a [`KnowledgeStore`].
#[derive(Debug)]
pub struct ChangeReconciler {
    store: Arc<KnowledgeStore>,
    runner: BatchRunner,
}

impl ChangeReconciler {
    pub fn new(store: Arc<KnowledgeStore>, config: &KbConfig) -> KbResult<Self> {
        Ok(Self {
            store,
            runner: BatchRunner::new(config.performance.max_in_flight, "reconcile")?,
        })
    }

    /// Apply one commit's changes. Does not move the watermark.
    ///
    /// Outcomes are sorted by id. A removal of a path with no live record is
    /// reported as [`Outcome::Unchanged`]. An added or modified path whose
    /// content is rejected or missing fails permanently and its previous
    /// live record is tombstoned.
    ///
    /// # Errors
    ///
    /// Only store consistency errors; per-path failures are outcomes.
    pub fn reconcile(
        &self,
        delta: &CommitDelta,
        source: &dyn DocumentSource,
    ) -> KbResult<Vec<(DocumentId, Outcome)>> {
        let mut upserts = Vec::new();
        let mut removals = Vec::new();
        let mut outcomes = Vec::new();

        for change in &delta.changes {
            let id = match DocumentId::new(change.path.as_str(), delta.revision.as_str()) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping unrepresentable path in {}: {}", delta.revision, e);
                    continue;
                }
            };
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => upserts.push(id),
                ChangeKind::Removed => removals.push(id),
            }
        }
        debug!(
            "Reconciling {}: {} upserts, {} removals",
            delta.revision,
            upserts.len(),
            removals.len()
        );

        outcomes.extend(self.runner.upsert_all(&self.store, upserts, |id| {
            source.read_at(id.path(), id.revision())
        })?);

        for id in removals {
            match self.store.tombstone_path(id.path()) {
                Ok(removed) => outcomes.push((removed, Outcome::Removed)),
                Err(KbError::DocumentNotFound(_)) => {
                    debug!("{} removed but was never indexed", id.path());
                    outcomes.push((id, Outcome::Unchanged));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to remove {}: {}", id.path(), e);
                    outcomes.push((id, Outcome::failed(&e)));
                }
            }
        }

        outcomes.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(outcomes)
    }

    /// Apply the most recent commit.
    ///
    /// The watermark moves to it only if the commit's parent is the current
    /// watermark and nothing failed retryably. When commits in between were
    /// never applied the watermark stays put, so [`catch_up`](Self::catch_up)
    /// still replays them.
    pub fn reconcile_latest(
        &self,
        feed: &dyn CommitFeed,
        source: &dyn DocumentSource,
    ) -> KbResult<DeltaReport> {
        let delta = feed.latest_commit_delta()?;
        let watermark = self.store.watermark()?;
        let mut report = self.apply(&delta, source)?;

        let contiguous = delta.parent.as_deref() == watermark.as_deref();
        if !contiguous {
            warn!(
                "Commit {} does not follow watermark {:?}; run catch-up to cover the gap",
                delta.revision, watermark
            );
        } else if !report.has_retryable_failures() {
            self.store.set_watermark(delta.revision.as_str())?;
            report.watermark_advanced = true;
        }
        self.store.flush()?;
        Ok(report)
    }

    /// Apply every commit after the watermark, oldest first.
    ///
    /// Stops at the first commit with retryable failures; that commit and
    /// the ones after it are replayed by the next run.
    ///
    /// # Errors
    ///
    /// - [`KbError::NoWatermark`] if the store was never fully ingested
    /// - Feed errors, e.g. the watermark is no longer in history
    pub fn catch_up(
        &self,
        feed: &dyn CommitFeed,
        source: &dyn DocumentSource,
    ) -> KbResult<CatchUpReport> {
        let from = self.store.watermark()?.ok_or(KbError::NoWatermark)?;
        let deltas = feed.deltas_since(&from)?;
        info!("Catching up {} commits since {}", deltas.len(), from);

        let mut applied = Vec::with_capacity(deltas.len());
        let mut stalled_at = None;
        let mut pending = 0;

        for (i, delta) in deltas.iter().enumerate() {
            let mut report = self.apply(delta, source)?;

            if report.has_retryable_failures() {
                warn!(
                    "Commit {} had retryable failures; stopping catch-up",
                    delta.revision
                );
                applied.push(report);
                stalled_at = Some(delta.revision.clone());
                pending = deltas.len() - i - 1;
                break;
            }

            self.store.set_watermark(delta.revision.as_str())?;
            self.store.flush()?;
            report.watermark_advanced = true;
            applied.push(report);
        }

        // Persist partial progress of a stalled commit too
        self.store.flush()?;

        let watermark = self.store.watermark()?.unwrap_or_else(|| from.clone());
        Ok(CatchUpReport {
            from,
            watermark,
            applied,
            stalled_at,
            pending,
        })
    }

    fn apply(&self, delta: &CommitDelta, source: &dyn DocumentSource) -> KbResult<DeltaReport> {
        let outcomes = self.reconcile(delta, source)?;
        let report = DeltaReport {
            revision: delta.revision.clone(),
            outcomes,
            watermark_advanced: false,
        };
        let counts = report.counts();
        info!(
            "Applied {}: {} indexed, {} unchanged, {} removed, {} failed",
            report.revision, counts.indexed, counts.unchanged, counts.removed, counts.failed
        );
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================
