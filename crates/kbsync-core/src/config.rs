//! Configuration types for kbsync.
//!
//! A [`KbConfig`] is read from YAML with camelCase keys. Every field has a
//! default, so an empty or missing file is a valid configuration. The value
//! is passed explicitly to every component; nothing reads configuration from
//! global state.
//!
//! ## Lookup order
//!
//! 1. An explicit path (`--config`)
//! 2. `$KBSYNC_CONFIG`
//! 3. `<repo>/.kbsync/config.yaml`
//! 4. `~/.kbsync/config.yaml`
//! 5. Built-in defaults
//!
//! ## Example YAML
//!
//! ```yaml
//! store:
//!   path: .kbsync/store
//!   dimension: 768
//! ingest:
//!   exclude: ["*.min.js", "vendor/"]
//!   maxFileSizeBytes: 1000000
//!   maxFileLines: 10000
//!   pruneStale: true
//! performance:
//!   maxInFlight: 4
//! collaborators:
//!   provider: ollama
//!   url: http://localhost:11434
//!   embeddingModel: nomic-embed-text
//!   textModel: llama3.2
//!   timeoutSecs: 60
//!   maxRetries: 3
//!   initialBackoffMs: 500
//!   summaryMaxChars: 1200
//! retrieval:
//!   topK: 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use kbsync_model::{ProviderKind, DEFAULT_EMBEDDING_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_TEXT_MODEL};
use serde::{Deserialize, Serialize};

use crate::constants::{CONFIG_ENV_VAR, CONFIG_FILENAME, DEFAULT_STORE_DIR, KBSYNC_DIR};
use crate::errors::{KbError, KbResult};

// ============================================================================
// Defaults
// ============================================================================

/// Default vector dimension.
pub const DEFAULT_DIMENSION: usize = 768;

/// Default maximum file size in bytes (1 MB).
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 1_000_000;

/// Default maximum number of lines per file.
pub const DEFAULT_MAX_FILE_LINES: usize = 10_000;

/// Default number of documents processed concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Default collaborator timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default number of retries for retryable collaborator failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;

/// Default summary length bound in characters.
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 1200;

/// Default number of retrieval hits.
pub const DEFAULT_TOP_K: usize = 5;

// ============================================================================
// KbConfig
// ============================================================================

/// Complete kbsync configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KbConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl KbConfig {
    /// Resolve and load the configuration for a repository.
    ///
    /// Returns the config and the file it came from (`None` for defaults).
    ///
    /// # Errors
    ///
    /// An explicit path (argument or `$KBSYNC_CONFIG`) that does not exist is
    /// an error; missing default locations are skipped.
    pub fn load(repo_root: &Path, explicit: Option<&Path>) -> KbResult<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Self::from_required_path(path).map(|c| (c, Some(path.to_path_buf())));
        }

        if let Some(env_path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
            let path = PathBuf::from(env_path);
            return Self::from_required_path(&path).map(|c| (c, Some(path)));
        }

        let candidates = [Some(Self::repo_path(repo_root)), Self::user_path()];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                return Self::from_path(&path).map(|c| (c, Some(path)));
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok((Self::default(), None))
    }

    /// Load the configuration from a file that must exist.
    fn from_required_path(path: &Path) -> KbResult<Self> {
        if !path.is_file() {
            return Err(KbError::invalid_config(
                format!("config file {} does not exist", path.display()),
                format!("Create it or unset ${}", CONFIG_ENV_VAR),
            ));
        }
        Self::from_path(path)
    }

    /// Load the configuration from a specific path.
    ///
    /// If the file does not exist, returns the defaults.
    pub fn from_path(path: &Path) -> KbResult<Self> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            KbError::Yaml(err) => KbError::invalid_config(
                format!("failed to parse {}: {}", path.display(), err),
                "Check the YAML syntax and key names (camelCase)",
            ),
            other => other,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document, logging warnings.
    pub fn from_yaml(content: &str) -> KbResult<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let warnings = config.validate()?;
        for warning in warnings {
            tracing::warn!("Config warning: {}", warning);
        }
        Ok(config)
    }

    /// `<repo>/.kbsync/config.yaml`
    pub fn repo_path(repo_root: &Path) -> PathBuf {
        repo_root.join(KBSYNC_DIR).join(CONFIG_FILENAME)
    }

    /// `~/.kbsync/config.yaml`
    pub fn user_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(KBSYNC_DIR).join(CONFIG_FILENAME))
    }

    /// Store directory, resolved against the repository root when relative.
    pub fn store_dir(&self, repo_root: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            repo_root.join(&self.store.path)
        }
    }

    /// Validate all sections.
    ///
    /// Returns the first fatal problem as [`KbError::InvalidConfiguration`];
    /// non-fatal issues are returned as warnings.
    pub fn validate(&self) -> KbResult<Vec<String>> {
        let mut warnings = Vec::new();
        warnings.extend(self.store.validate()?);
        warnings.extend(self.ingest.validate()?);
        warnings.extend(self.performance.validate()?);
        warnings.extend(self.collaborators.validate()?);
        warnings.extend(self.retrieval.validate()?);
        Ok(warnings)
    }
}

// ============================================================================
// StoreConfig
// ============================================================================

/// Where the knowledge store lives and what it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Store directory (relative paths resolve against the repository root).
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Vector dimension, fixed when the store is created.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}
fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> KbResult<Vec<String>> {
        if self.dimension == 0 {
            return Err(KbError::invalid_config(
                "store.dimension cannot be 0",
                "Set dimension to the embedding model's output size (e.g. 768)",
            ));
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// IngestConfig
// ============================================================================

/// Which files a snapshot walk takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    /// Gitignore-style globs; when non-empty only matching files are taken.
    #[serde(default)]
    pub include: Vec<String>,

    /// Gitignore-style globs of files to skip.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// Files with more lines than this are skipped.
    #[serde(default = "default_max_file_lines")]
    pub max_file_lines: usize,

    /// Tombstone live records whose path is gone after a full ingest.
    #[serde(default)]
    pub prune_stale: bool,
}

fn default_max_file_size_bytes() -> u64 {
    DEFAULT_MAX_FILE_SIZE_BYTES
}
fn default_max_file_lines() -> usize {
    DEFAULT_MAX_FILE_LINES
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_file_lines: DEFAULT_MAX_FILE_LINES,
            prune_stale: false,
        }
    }
}

impl IngestConfig {
    /// # Warnings
    /// - `max_file_size_bytes < 1024`: most files will be skipped
    /// - `max_file_lines < 10`: most files will be skipped
    pub fn validate(&self) -> KbResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.max_file_size_bytes == 0 || self.max_file_lines == 0 {
            return Err(KbError::invalid_config(
                "ingest.maxFileSizeBytes and ingest.maxFileLines must be positive",
                "Remove them to use the defaults (1000000 bytes, 10000 lines)",
            ));
        }

        if self.max_file_size_bytes < 1024 {
            warnings.push(format!(
                "ingest.maxFileSizeBytes={} bytes is very restrictive; most source files will be skipped",
                self.max_file_size_bytes
            ));
        }

        if self.max_file_lines < 10 {
            warnings.push(format!(
                "ingest.maxFileLines={} is very restrictive; most source files will be skipped",
                self.max_file_lines
            ));
        }

        Ok(warnings)
    }
}

// ============================================================================
// PerformanceConfig
// ============================================================================

/// Concurrency limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceConfig {
    /// Documents summarized and embedded concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl PerformanceConfig {
    pub fn validate(&self) -> KbResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.max_in_flight == 0 {
            return Err(KbError::invalid_config(
                "performance.maxInFlight cannot be 0",
                "Set maxInFlight to at least 1 (recommended: 4-16)",
            ));
        }

        if self.max_in_flight > 64 {
            warnings.push(format!(
                "performance.maxInFlight={} is very large; model servers may throttle",
                self.max_in_flight
            ));
        }

        Ok(warnings)
    }
}

// ============================================================================
// CollaboratorsConfig
// ============================================================================

/// Model collaborators and how calls to them are bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorsConfig {
    /// Summary provider.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model server URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Model used for embeddings.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Model used for summaries and answers.
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Per-call timeout in seconds (0 disables it).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles each retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on summary length in characters.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

fn default_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_text_model() -> String {
    DEFAULT_TEXT_MODEL.to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_initial_backoff_ms() -> u64 {
    DEFAULT_INITIAL_BACKOFF_MS
}
fn default_summary_max_chars() -> usize {
    DEFAULT_SUMMARY_MAX_CHARS
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            url: default_url(),
            embedding_model: default_embedding_model(),
            text_model: default_text_model(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
        }
    }
}

impl CollaboratorsConfig {
    pub fn validate(&self) -> KbResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.summary_max_chars == 0 {
            return Err(KbError::invalid_config(
                "collaborators.summaryMaxChars cannot be 0",
                "Set summaryMaxChars to at least 100 (default: 1200)",
            ));
        }

        if self.timeout_secs == 0 {
            warnings.push(
                "collaborators.timeoutSecs=0 disables timeouts; a hung model server will stall ingestion"
                    .to_string(),
            );
        }

        if self.max_retries > 10 {
            warnings.push(format!(
                "collaborators.maxRetries={} is very large; failing documents will retry for a long time",
                self.max_retries
            ));
        }

        Ok(warnings)
    }
}

// ============================================================================
// RetrievalConfig
// ============================================================================

/// Query defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    /// Hits returned when the caller does not say.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> KbResult<Vec<String>> {
        if self.top_k == 0 {
            return Err(KbError::invalid_config(
                "retrieval.topK cannot be 0",
                "Set topK to at least 1 (default: 5)",
            ));
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// Tests
// ============================================================================
