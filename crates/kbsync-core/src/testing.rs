//! Deterministic collaborator doubles for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::collaborators::{
    CommitFeed, DocumentSource, Embedder, Issue, IssueBoard, ResponseGenerator, Summarizer,
};
use crate::errors::{KbError, KbResult};
use crate::types::{ChangeKind, CommitDelta, PathChange};

// ============================================================================
// Models
// ============================================================================

/// Summarizer that returns its input unchanged and counts calls.
#[derive(Debug, Default)]
pub struct EchoSummarizer {
    calls: AtomicUsize,
}

impl EchoSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Summarizer for EchoSummarizer {
    fn summarize(&self, text: &str) -> KbResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.to_string())
    }
}

/// Embedder with fixed vectors for known texts and a hash for the rest.
#[derive(Debug)]
pub struct TableEmbedder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl TableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            table: HashMap::new(),
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts embedded so far, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        (0..self.dimension)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) as f32 / (u32::MAX as f32 / 2.0)) - 1.0
            })
            .collect()
    }
}

impl Embedder for TableEmbedder {
    fn embed(&self, text: &str) -> KbResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(text.to_string());
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self
            .table
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hash_to_embedding(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder whose server is always unreachable.
#[derive(Debug)]
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> KbResult<Vec<f32>> {
        Err(KbError::transport("embedder", "connection refused"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Generator that echoes the question and the number of context entries.
#[derive(Debug, Default)]
pub struct CannedGenerator {
    fail_on: Option<String>,
    contexts: Mutex<Vec<Vec<String>>>,
}

impl CannedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail for any issue text containing `needle`.
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_string()),
            ..Self::default()
        }
    }

    /// Context passed to each call, in call order.
    pub fn contexts(&self) -> Vec<Vec<String>> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ResponseGenerator for CannedGenerator {
    fn generate(&self, issue_text: &str, context: &[String]) -> KbResult<String> {
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(context.to_vec());
        }
        if let Some(needle) = &self.fail_on {
            if issue_text.contains(needle.as_str()) {
                return Err(KbError::collaborator("generator", "model refused", false));
            }
        }
        Ok(format!("Re: {} ({} sources)", issue_text, context.len()))
    }
}

// ============================================================================
// MemorySource
// ============================================================================

/// In-memory repository with a linear commit history.
#[derive(Debug)]
pub struct MemorySource {
    /// revision -> (path -> content)
    trees: BTreeMap<String, BTreeMap<String, String>>,
    head: String,
    unreadable: HashSet<String>,
    rejected: HashSet<(String, String)>,
}

impl MemorySource {
    /// A repository whose first revision is `revision` with no files.
    pub fn new(revision: &str) -> Self {
        let mut trees = BTreeMap::new();
        trees.insert(revision.to_string(), BTreeMap::new());
        Self {
            trees,
            head: revision.to_string(),
            unreadable: HashSet::new(),
            rejected: HashSet::new(),
        }
    }

    /// Add a file to the head revision.
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        if let Some(tree) = self.trees.get_mut(&self.head) {
            tree.insert(path.to_string(), content.to_string());
        }
        self
    }

    /// Make reads of `path` fail with a transport error.
    pub fn with_unreadable(mut self, path: &str) -> Self {
        self.unreadable.insert(path.to_string());
        self
    }

    /// Make `path` at `revision` unindexable, as binary content would be.
    pub fn reject_at(&mut self, path: &str, revision: &str) {
        self.rejected
            .insert((path.to_string(), revision.to_string()));
    }

    /// Apply a commit on top of head and return its delta.
    ///
    /// `changes` maps paths to new content, `None` for removal.
    pub fn commit(&mut self, revision: &str, changes: &[(&str, Option<&str>)]) -> CommitDelta {
        let parent = self.head.clone();
        let mut tree = self.trees.get(&parent).cloned().unwrap_or_default();
        let mut delta = Vec::new();

        for (path, content) in changes {
            let kind = match content {
                Some(text) => {
                    let existed = tree.insert(path.to_string(), text.to_string()).is_some();
                    if existed {
                        ChangeKind::Modified
                    } else {
                        ChangeKind::Added
                    }
                }
                None => {
                    tree.remove(*path);
                    ChangeKind::Removed
                }
            };
            delta.push(PathChange::new(*path, kind));
        }

        self.trees.insert(revision.to_string(), tree);
        self.head = revision.to_string();

        CommitDelta {
            revision: revision.to_string(),
            parent: Some(parent),
            changes: delta,
        }
    }
}

impl DocumentSource for MemorySource {
    fn revision(&self) -> KbResult<String> {
        Ok(self.head.clone())
    }

    fn list(&self) -> KbResult<Vec<String>> {
        Ok(self
            .trees
            .get(&self.head)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn read(&self, path: &str) -> KbResult<String> {
        self.read_at(path, &self.head)
    }

    fn read_at(&self, path: &str, revision: &str) -> KbResult<String> {
        if self.unreadable.contains(path) {
            return Err(KbError::transport("source", format!("cannot read {}", path)));
        }
        if self
            .rejected
            .contains(&(path.to_string(), revision.to_string()))
        {
            return Err(KbError::ContentRejected {
                path: path.to_string(),
                reason: "binary content".to_string(),
            });
        }
        let tree = self
            .trees
            .get(revision)
            .ok_or_else(|| KbError::RevisionUnavailable {
                revision: revision.to_string(),
                reason: "unknown revision".to_string(),
            })?;
        tree.get(path).cloned().ok_or_else(|| KbError::FileNotFound {
            path: path.to_string(),
            revision: revision.to_string(),
        })
    }
}

// ============================================================================
// MemoryCodeHost
// ============================================================================

/// In-memory code host: a list of deltas after a base revision, and issues.
#[derive(Debug, Default)]
pub struct MemoryCodeHost {
    base: String,
    deltas: Vec<CommitDelta>,
    issues: Vec<Issue>,
    failing_posts: HashSet<u64>,
    comments: Mutex<Vec<(u64, String)>>,
}

impl MemoryCodeHost {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            ..Self::default()
        }
    }

    pub fn push_delta(&mut self, delta: CommitDelta) {
        self.deltas.push(delta);
    }

    pub fn with_issue(mut self, id: u64, title: &str, body: &str) -> Self {
        self.issues.push(Issue {
            id,
            title: title.to_string(),
            body: body.to_string(),
        });
        self
    }

    /// Make posting to `issue_id` fail.
    pub fn with_failing_post(mut self, issue_id: u64) -> Self {
        self.failing_posts.insert(issue_id);
        self
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommitFeed for MemoryCodeHost {
    fn latest_commit_delta(&self) -> KbResult<CommitDelta> {
        self.deltas
            .last()
            .cloned()
            .ok_or_else(|| KbError::RevisionUnavailable {
                revision: "HEAD".to_string(),
                reason: "no commits after base".to_string(),
            })
    }

    fn deltas_since(&self, watermark: &str) -> KbResult<Vec<CommitDelta>> {
        if watermark == self.base {
            return Ok(self.deltas.clone());
        }
        match self.deltas.iter().position(|d| d.revision == watermark) {
            Some(pos) => Ok(self.deltas[pos + 1..].to_vec()),
            None => Err(KbError::RevisionUnavailable {
                revision: watermark.to_string(),
                reason: "not in history".to_string(),
            }),
        }
    }
}

impl IssueBoard for MemoryCodeHost {
    fn open_issues(&self) -> KbResult<Vec<Issue>> {
        Ok(self.issues.clone())
    }

    fn post_comment(&self, issue_id: u64, text: &str) -> KbResult<()> {
        if self.failing_posts.contains(&issue_id) {
            return Err(KbError::transport("code host", "HTTP 502"));
        }
        if let Ok(mut comments) = self.comments.lock() {
            comments.push((issue_id, text.to_string()));
        }
        Ok(())
    }
}
