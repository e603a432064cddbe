//! kbsync Engine – the orchestrator behind every CLI command.
//!
//! A [`KbEngine`] is bound to one repository root. It loads the
//! configuration, builds the configured collaborators, opens the persisted
//! [`KnowledgeStore`] and wires the ingestor, reconciler, retrieval engine and
//! responder on top of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::collaborators::{DocumentSource, Embedder, ResponseGenerator, Summarizer};
use crate::config::KbConfig;
use crate::constants::WORKTREE_REVISION;
use crate::errors::KbResult;
use crate::git::GitRepository;
use crate::ingest::{IngestReport, Ingestor};
use crate::model_adapter;
use crate::policy::CallPolicy;
use crate::reconcile::{CatchUpReport, ChangeReconciler};
use crate::responder::{Answer, IssueResponder};
use crate::retrieval::{QueryInput, RetrievalEngine, RetrievalHit};
use crate::source::FsDocumentSource;
use crate::store::KnowledgeStore;
use crate::types::{RecordRef, SearchFilter, StoreStats};

// ============================================================================
// Options and reports
// ============================================================================

/// Options for [`KbEngine::ingest`].
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Revision to ingest. For git checkouts, any commit-ish (default HEAD);
    /// for a plain directory, the label given to its documents.
    pub revision: Option<String>,
    /// Tombstone records whose path is gone, regardless of `ingest.pruneStale`.
    pub prune: bool,
    /// Walk the working tree even inside a git checkout.
    pub worktree: bool,
}

/// Options for [`KbEngine::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Number of hits (default `retrieval.topK`).
    pub k: Option<usize>,
    /// Only return paths under this prefix.
    pub path_prefix: Option<String>,
    /// Only return records at this revision.
    pub revision: Option<String>,
}

impl QueryOptions {
    fn filter(&self) -> Option<SearchFilter> {
        if self.path_prefix.is_none() && self.revision.is_none() {
            return None;
        }
        let mut filter = SearchFilter::new();
        if let Some(prefix) = &self.path_prefix {
            filter = filter.with_path_prefix(prefix.as_str());
        }
        if let Some(revision) = &self.revision {
            filter = filter.with_revision(revision.as_str());
        }
        Some(filter)
    }
}

/// Everything `kbsync status` shows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub root: PathBuf,
    pub store_dir: PathBuf,
    pub config_path: Option<PathBuf>,
    /// HEAD of the repository, if it is a git checkout.
    pub head: Option<String>,
    pub stats: StoreStats,
}

impl StatusReport {
    /// Whether the watermark is behind HEAD.
    pub fn is_behind(&self) -> bool {
        match (&self.head, &self.stats.watermark) {
            (Some(head), Some(watermark)) => head != watermark,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

// ============================================================================
// KbEngine
// ============================================================================

/// Knowledge base for one repository.
#[derive(Debug)]
pub struct KbEngine {
    root: PathBuf,
    config: KbConfig,
    config_path: Option<PathBuf>,
    policy: CallPolicy,
    store: Arc<KnowledgeStore>,
}

impl KbEngine {
    /// Open the knowledge base of the repository at `root`.
    ///
    /// Configuration is looked up as described in [`KbConfig::load`];
    /// `config_path` takes precedence over every other location.
    pub fn open(root: &Path, config_path: Option<&Path>) -> KbResult<Self> {
        let (config, loaded_from) = KbConfig::load(root, config_path)?;
        let summarizer = model_adapter::create_summarizer(&config)?;
        let embedder = model_adapter::create_embedder(&config)?;
        Self::with_collaborators(root, config, loaded_from, summarizer, embedder)
    }

    /// Open with explicit collaborators instead of the configured ones.
    pub fn with_collaborators(
        root: &Path,
        config: KbConfig,
        config_path: Option<PathBuf>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
    ) -> KbResult<Self> {
        config.validate()?;
        let policy = CallPolicy::from_config(&config.collaborators);
        let store_dir = config.store_dir(root);
        debug!("Knowledge store directory: {}", store_dir.display());

        let store = KnowledgeStore::open(&store_dir, config.store.dimension, summarizer, embedder)?
            .with_policy(policy.clone());

        Ok(Self {
            root: root.to_path_buf(),
            config,
            config_path,
            policy,
            store: Arc::new(store),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    /// File the configuration was read from, `None` for built-in defaults.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Whether the root is a git checkout.
    pub fn is_git(&self) -> bool {
        GitRepository::is_repository(&self.root)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Ingest a full snapshot of the repository.
    ///
    /// Git checkouts are read from the object database at HEAD (or
    /// `options.revision`); anything else, or `options.worktree`, walks the
    /// directory.
    pub fn ingest(&self, options: &IngestOptions) -> KbResult<IngestReport> {
        let source: Box<dyn DocumentSource> = if options.worktree || !self.is_git() {
            let revision = options.revision.as_deref().unwrap_or(WORKTREE_REVISION);
            info!("Ingesting working tree of {} as {}", self.root.display(), revision);
            Box::new(FsDocumentSource::new(&self.root, revision, &self.config.ingest)?)
        } else {
            let repo = GitRepository::open(&self.root, &self.config.ingest)?;
            match &options.revision {
                Some(revision) => Box::new(repo.at_revision(revision)?),
                None => Box::new(repo),
            }
        };

        let ingestor = Ingestor::new(Arc::clone(&self.store), &self.config)?
            .with_prune_stale(options.prune || self.config.ingest.prune_stale);
        ingestor.ingest_all(source.as_ref())
    }

    /// Apply every commit after the watermark from local git history.
    pub fn sync(&self) -> KbResult<CatchUpReport> {
        let repo = GitRepository::open(&self.root, &self.config.ingest)?;
        let reconciler = ChangeReconciler::new(Arc::clone(&self.store), &self.config)?;
        reconciler.catch_up(&repo, &repo)
    }

    /// Ranked documents for free text.
    pub fn query(&self, text: &str, options: &QueryOptions) -> KbResult<Vec<RetrievalHit>> {
        let retrieval = self.retrieval();
        let k = options.k.unwrap_or_else(|| retrieval.default_k());
        let filter = options.filter();
        retrieval.query(&QueryInput::from(text), k, filter.as_ref())
    }

    /// Answer a question with the configured response generator.
    pub fn answer(&self, question: &str) -> KbResult<Answer> {
        let generator = model_adapter::create_generator(&self.config)?;
        self.answer_with(question, generator)
    }

    /// Answer a question with an explicit generator.
    pub fn answer_with(
        &self,
        question: &str,
        generator: Arc<dyn ResponseGenerator>,
    ) -> KbResult<Answer> {
        IssueResponder::new(self.retrieval(), generator, self.policy.clone()).answer(question)
    }

    pub fn status(&self) -> KbResult<StatusReport> {
        let head = if self.is_git() {
            GitRepository::open(&self.root, &self.config.ingest)
                .and_then(|repo| repo.head())
                .ok()
        } else {
            None
        };

        Ok(StatusReport {
            root: self.root.clone(),
            store_dir: self.config.store_dir(&self.root),
            config_path: self.config_path.clone(),
            head,
            stats: self.store.stats()?,
        })
    }

    /// Every record stored for `path`, oldest first.
    pub fn show(&self, path: &str) -> KbResult<Vec<RecordRef>> {
        self.store.history(path)
    }

    pub fn flush(&self) -> KbResult<()> {
        self.store.flush()
    }

    fn retrieval(&self) -> RetrievalEngine {
        RetrievalEngine::new(Arc::clone(&self.store), &self.config.retrieval)
    }
}

// ============================================================================
// Tests
// ============================================================================
