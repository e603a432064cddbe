//! Issue answering: retrieval, then generation, then posting.
//!
//! Each stage can fail on its own. A failure skips that issue with a
//! [`IssueOutcome::Skipped`] naming the stage and the batch moves on.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collaborators::{Issue, IssueBoard, ResponseGenerator};
use crate::errors::KbResult;
use crate::policy::CallPolicy;
use crate::retrieval::{RetrievalEngine, RetrievalHit};

/// Where answering an issue stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStage {
    Retrieval,
    Generation,
    Posting,
}

impl std::fmt::Display for ResponseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResponseStage::Retrieval => "retrieval",
            ResponseStage::Generation => "generation",
            ResponseStage::Posting => "posting",
        };
        f.write_str(name)
    }
}

/// What happened to one issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum IssueOutcome {
    Answered { comment: String },
    Skipped { stage: ResponseStage, reason: String },
}

/// Outcome for a specific issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReport {
    pub issue_id: u64,
    pub outcome: IssueOutcome,
}

/// A generated answer and the documents it drew on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievalHit>,
}

/// Answers issues with context from the knowledge store.
#[derive(Clone)]
pub struct IssueResponder {
    retrieval: RetrievalEngine,
    generator: Arc<dyn ResponseGenerator>,
    policy: CallPolicy,
}

impl std::fmt::Debug for IssueResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueResponder")
            .field("retrieval", &self.retrieval)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl IssueResponder {
    pub fn new(
        retrieval: RetrievalEngine,
        generator: Arc<dyn ResponseGenerator>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            retrieval,
            generator,
            policy,
        }
    }

    /// Retrieve context for `question` and generate an answer.
    pub fn answer(&self, question: &str) -> KbResult<Answer> {
        let sources = self.retrieval.query_text(question)?;
        let text = self.generate(question, &sources)?;
        Ok(Answer { text, sources })
    }

    /// Answer one issue and post the answer as a comment.
    pub fn respond(&self, issue: &Issue, board: &Arc<dyn IssueBoard>) -> IssueOutcome {
        let question = issue.text();

        let sources = match self.retrieval.query_text(&question) {
            Ok(sources) => sources,
            Err(e) => return skip(issue, ResponseStage::Retrieval, e.to_string()),
        };
        debug!("Issue #{}: {} context documents", issue.id, sources.len());

        let comment = match self.generate(&question, &sources) {
            Ok(text) => text,
            Err(e) => return skip(issue, ResponseStage::Generation, e.to_string()),
        };

        // Posting is not idempotent: one attempt only
        let post_policy = CallPolicy {
            max_retries: 0,
            ..self.policy.clone()
        };
        let poster = Arc::clone(board);
        let (issue_id, body) = (issue.id, comment.clone());
        if let Err(e) = post_policy.call("code host", move || poster.post_comment(issue_id, &body)) {
            return skip(issue, ResponseStage::Posting, e.to_string());
        }

        info!("Answered issue #{}", issue.id);
        IssueOutcome::Answered { comment }
    }

    /// Answer each issue in turn. Failures never stop the batch.
    pub fn respond_all(&self, issues: &[Issue], board: &Arc<dyn IssueBoard>) -> Vec<IssueReport> {
        issues
            .iter()
            .map(|issue| IssueReport {
                issue_id: issue.id,
                outcome: self.respond(issue, board),
            })
            .collect()
    }

    /// Answer every open issue on `board`.
    ///
    /// # Errors
    ///
    /// Only if the open issues cannot be listed.
    pub fn respond_open_issues(&self, board: &Arc<dyn IssueBoard>) -> KbResult<Vec<IssueReport>> {
        let issues = board.open_issues()?;
        info!("Responding to {} open issues", issues.len());
        Ok(self.respond_all(&issues, board))
    }

    fn generate(&self, question: &str, sources: &[RetrievalHit]) -> KbResult<String> {
        let context: Vec<String> = sources.iter().map(RetrievalHit::context_line).collect();
        let generator = Arc::clone(&self.generator);
        let question = question.to_string();
        self.policy
            .call("generator", move || generator.generate(&question, &context))
    }
}

fn skip(issue: &Issue, stage: ResponseStage, reason: String) -> IssueOutcome {
    warn!("Skipping issue #{} at {}: {}", issue.id, stage, reason);
    IssueOutcome::Skipped { stage, reason }
}

// ============================================================================
// Tests
// ============================================================================
