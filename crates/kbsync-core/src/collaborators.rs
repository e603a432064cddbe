//! Collaborator contracts.
//!
//! The core never fetches repositories, calls models, or talks to a code host
//! itself. It depends on these traits; concrete implementations live in
//! [`crate::source`], [`crate::git`] and [`crate::model_adapter`], and test
//! doubles in `crate::testing`.
//!
//! All collaborators are `Send + Sync`: they are shared across the ingestion
//! thread pool and, for model calls, moved onto timeout threads behind an `Arc`.

use serde::{Deserialize, Serialize};

use crate::errors::KbResult;
use crate::types::CommitDelta;

// ============================================================================
// Models
// ============================================================================

/// Produces a short natural-language summary of a file's text.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, text: &str) -> KbResult<String>;
}

/// Maps text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> KbResult<Vec<f32>>;

    /// Length of every vector [`embed`](Self::embed) returns.
    fn dimension(&self) -> usize;
}

/// Writes an answer to an issue given retrieved context.
pub trait ResponseGenerator: Send + Sync {
    fn generate(&self, issue_text: &str, context: &[String]) -> KbResult<String>;
}

// ============================================================================
// Repository access
// ============================================================================

/// Provides file contents of a repository.
pub trait DocumentSource: Send + Sync {
    /// Revision that [`list`](Self::list) and [`read`](Self::read) describe.
    fn revision(&self) -> KbResult<String>;

    /// Repository-relative paths of every document in the snapshot.
    fn list(&self) -> KbResult<Vec<String>>;

    /// Current text of a file.
    fn read(&self, path: &str) -> KbResult<String>;

    /// Text of a file at a specific revision.
    fn read_at(&self, path: &str, revision: &str) -> KbResult<String>;
}

/// Reports what commits changed.
pub trait CommitFeed: Send + Sync {
    /// Delta of the most recent commit.
    fn latest_commit_delta(&self) -> KbResult<CommitDelta>;

    /// Deltas of every commit after `watermark`, oldest first.
    fn deltas_since(&self, watermark: &str) -> KbResult<Vec<CommitDelta>>;
}

/// An issue on the code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub title: String,
    pub body: String,
}

impl Issue {
    /// Title and body as one question.
    pub fn text(&self) -> String {
        match (self.title.trim(), self.body.trim()) {
            (title, "") => title.to_string(),
            ("", body) => body.to_string(),
            (title, body) => format!("{}\n\n{}", title, body),
        }
    }
}

/// Reads open issues and posts comments on them.
pub trait IssueBoard: Send + Sync {
    fn open_issues(&self) -> KbResult<Vec<Issue>>;

    fn post_comment(&self, issue_id: u64, text: &str) -> KbResult<()>;
}

/// A code host that serves both commit deltas and issues.
pub trait CodeHost: CommitFeed + IssueBoard {}

impl<T: CommitFeed + IssueBoard> CodeHost for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_text() {
        let issue = Issue {
            id: 1,
            title: "Crash on start".into(),
            body: "It panics.".into(),
        };
        assert_eq!(issue.text(), "Crash on start\n\nIt panics.");

        let no_body = Issue {
            body: "  ".into(),
            ..issue.clone()
        };
        assert_eq!(no_body.text(), "Crash on start");
    }
}
