//! # kbsync-core
//!
//! **Repository knowledge base** – core engine library.
//!
//! This crate keeps a searchable knowledge base over the files of a source
//! repository: every file is summarized, the summary is embedded, and the
//! vector is stored in a flat L2 index. The base is kept in step with the
//! repository one commit at a time and answers nearest-neighbor queries.
//!
//! ## Main Types
//!
//! - [`KbEngine`] – entry point used by the `kbsync` CLI
//! - [`KnowledgeStore`] – records plus vector index, persisted under `.kbsync/store`
//! - [`Ingestor`] – full-snapshot ingestion
//! - [`ChangeReconciler`] – incremental ingestion from commit deltas
//! - [`RetrievalEngine`] – top-k similarity queries
//! - [`IssueResponder`] – retrieval, generation and posting for issues
//! - [`KbError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`collaborators`] – traits for sources, models and the code host
//! - [`config`] – configuration types ([`KbConfig`])
//! - [`source`] / [`git`] – filesystem and git document sources
//! - [`model_adapter`] – kbsync-model clients behind the collaborator traits
//! - [`db_adapter`] – kbsync-db conversions
//!
//! ## Example
//!
//! ```ignore
//! use kbsync_core::{IngestOptions, KbEngine, QueryOptions};
//! use std::path::Path;
//!
//! let engine = KbEngine::open(Path::new("."), None)?;
//! engine.ingest(&IngestOptions::default())?;
//!
//! for hit in engine.query("where is the config parsed?", &QueryOptions::default())? {
//!     println!("{:.3} {}", hit.distance, hit.id);
//! }
//! ```

// Modules
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod db_adapter;
pub mod engine;
pub mod errors;
pub mod git;
pub mod ingest;
pub mod model_adapter;
pub mod policy;
pub mod reconcile;
pub mod responder;
pub mod retrieval;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use collaborators::{
    CodeHost, CommitFeed, DocumentSource, Embedder, Issue, IssueBoard, ResponseGenerator,
    Summarizer,
};
pub use config::{
    CollaboratorsConfig, IngestConfig, KbConfig, PerformanceConfig, RetrievalConfig, StoreConfig,
};
pub use constants::{KBSYNC_DIR, WORKTREE_REVISION};
pub use engine::{IngestOptions, KbEngine, QueryOptions, StatusReport};
pub use errors::{ErrorClass, KbError, KbResult};
pub use git::GitRepository;
pub use ingest::{IngestReport, Ingestor};
pub use policy::CallPolicy;
pub use reconcile::{CatchUpReport, ChangeReconciler, DeltaReport};
pub use responder::{Answer, IssueOutcome, IssueReport, IssueResponder, ResponseStage};
pub use retrieval::{QueryInput, RetrievalEngine, RetrievalHit};
pub use source::{ContentLimits, FsDocumentSource, PathFilter};
pub use store::KnowledgeStore;
pub use types::{
    ChangeKind, CommitDelta, DocumentId, DocumentRecord, Outcome, OutcomeCounts, PathChange,
    RecordRef, SearchFilter, SearchHit, StoreStats, UpsertStatus, Upserted,
};
