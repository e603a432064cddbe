//! Local git repository as a document source and commit feed.
//!
//! Shells out to the `git` binary. Every read goes through the object
//! database, so the working tree state never leaks into a revision's content.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use crate::collaborators::{CommitFeed, DocumentSource};
use crate::config::IngestConfig;
use crate::errors::{KbError, KbResult};
use crate::source::{check_relative_path, check_revision, ContentLimits, PathFilter};
use crate::types::{ChangeKind, CommitDelta, PathChange};

/// A git checkout, optionally pinned to one revision.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
    pinned: Option<String>,
    limits: ContentLimits,
    filter: PathFilter,
}

impl GitRepository {
    /// Open the repository containing `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Git`] if `path` is not inside a git work tree.
    pub fn open(path: &Path, config: &IngestConfig) -> KbResult<Self> {
        let toplevel = run_git(path, &["rev-parse", "--show-toplevel"])?;
        let root = PathBuf::from(String::from_utf8_lossy(&toplevel).trim());
        debug!("Opened git repository at {}", root.display());
        Ok(Self {
            root,
            pinned: None,
            limits: ContentLimits::from_config(config),
            filter: PathFilter::from_config(config)?,
        })
    }

    /// Whether `path` is inside a git work tree.
    pub fn is_repository(path: &Path) -> bool {
        run_git(path, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| String::from_utf8_lossy(&out).trim() == "true")
            .unwrap_or(false)
    }

    /// Serve `list`/`read` from `revision` instead of HEAD.
    pub fn at_revision(mut self, revision: &str) -> KbResult<Self> {
        check_revision(revision)?;
        let resolved = self.resolve(revision)?;
        self.pinned = Some(resolved);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full hash of HEAD.
    pub fn head(&self) -> KbResult<String> {
        self.resolve("HEAD")
    }

    /// Full commit hash of `revision`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::RevisionUnavailable`] if it names no commit.
    pub fn resolve(&self, revision: &str) -> KbResult<String> {
        let spec = format!("{}^{{commit}}", revision);
        match self.git(&["rev-parse", "--verify", "--quiet", &spec]) {
            Ok(out) => Ok(String::from_utf8_lossy(&out).trim().to_string()),
            Err(KbError::Git { .. }) => Err(KbError::RevisionUnavailable {
                revision: revision.to_string(),
                reason: "not a commit in this repository".to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Changed files of `commit` against its first parent.
    pub fn delta_for(&self, commit: &str) -> KbResult<CommitDelta> {
        let revision = self.resolve(commit)?;
        let parent = self.resolve(&format!("{}^", revision)).ok();

        let raw = match &parent {
            Some(parent) => self.git(&[
                "diff-tree",
                "-r",
                "--name-status",
                "--no-renames",
                "-z",
                parent,
                &revision,
            ])?,
            None => self.git(&[
                "diff-tree",
                "-r",
                "--root",
                "--no-commit-id",
                "--name-status",
                "--no-renames",
                "-z",
                &revision,
            ])?,
        };

        let changes = parse_name_status_z(&raw);
        trace!("{} touches {} paths", revision, changes.len());
        Ok(CommitDelta {
            revision,
            parent,
            changes,
        })
    }

    fn current(&self) -> KbResult<String> {
        match &self.pinned {
            Some(rev) => Ok(rev.clone()),
            None => self.head(),
        }
    }

    fn git(&self, args: &[&str]) -> KbResult<Vec<u8>> {
        run_git(&self.root, args)
    }
}

fn run_git(dir: &Path, args: &[&str]) -> KbResult<Vec<u8>> {
    let command = args.first().copied().unwrap_or_default().to_string();
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|e| KbError::Git {
            command: command.clone(),
            message: format!("cannot run git: {}", e),
        })?;

    if !output.status.success() {
        return Err(KbError::Git {
            command,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

impl DocumentSource for GitRepository {
    fn revision(&self) -> KbResult<String> {
        self.current()
    }

    fn list(&self) -> KbResult<Vec<String>> {
        let revision = self.current()?;
        let raw = self.git(&["ls-tree", "-r", "-l", "-z", "--full-tree", &revision])?;

        let mut paths: Vec<String> = parse_ls_tree_z(&raw)
            .into_iter()
            .filter(|entry| {
                if !self.filter.allows(&entry.path) {
                    trace!("Filtered {}", entry.path);
                    return false;
                }
                if entry.size > self.limits.max_file_size_bytes {
                    debug!("Skipping {} ({} bytes)", entry.path, entry.size);
                    return false;
                }
                true
            })
            .map(|entry| entry.path)
            .collect();

        paths.sort();
        debug!("Listed {} files at {}", paths.len(), revision);
        Ok(paths)
    }

    fn read(&self, path: &str) -> KbResult<String> {
        let revision = self.current()?;
        self.read_at(path, &revision)
    }

    fn read_at(&self, path: &str, revision: &str) -> KbResult<String> {
        check_relative_path(path)?;
        if !self.filter.allows(path) {
            return Err(KbError::ContentRejected {
                path: path.to_string(),
                reason: "excluded by ingest filters".to_string(),
            });
        }

        let resolved = self.resolve(revision)?;
        let object = format!("{}:{}", resolved, path);
        let bytes = match self.git(&["cat-file", "blob", &object]) {
            Ok(bytes) => bytes,
            Err(KbError::Git { .. }) => {
                return Err(KbError::FileNotFound {
                    path: path.to_string(),
                    revision: revision.to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        self.limits.decode(path, bytes)
    }
}

impl CommitFeed for GitRepository {
    fn latest_commit_delta(&self) -> KbResult<CommitDelta> {
        self.delta_for("HEAD")
    }

    fn deltas_since(&self, watermark: &str) -> KbResult<Vec<CommitDelta>> {
        let base = self.resolve(watermark)?;
        let head = self.head()?;

        if let Err(KbError::Git { .. }) =
            self.git(&["merge-base", "--is-ancestor", &base, &head])
        {
            return Err(KbError::RevisionUnavailable {
                revision: watermark.to_string(),
                reason: "not an ancestor of HEAD (history was rewritten?)".to_string(),
            });
        }

        let range = format!("{}..{}", base, head);
        let raw = self.git(&["rev-list", "--reverse", "--first-parent", &range])?;
        let commits: Vec<String> = String::from_utf8_lossy(&raw)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        debug!("{} commits since {}", commits.len(), watermark);
        commits.iter().map(|c| self.delta_for(c)).collect()
    }
}

// ============================================================================
// Output parsing
// ============================================================================

/// One blob from `git ls-tree -r -l -z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TreeEntry {
    pub path: String,
    pub size: u64,
}

/// Parse `git ls-tree -r -l -z` output, keeping blobs only.
pub(crate) fn parse_ls_tree_z(raw: &[u8]) -> Vec<TreeEntry> {
    raw.split(|b| *b == 0)
        .filter(|rec| !rec.is_empty())
        .filter_map(|rec| {
            let rec = std::str::from_utf8(rec).ok()?;
            let (meta, path) = rec.split_once('\t')?;
            let mut fields = meta.split_whitespace();
            let _mode = fields.next()?;
            let kind = fields.next()?;
            let _object = fields.next()?;
            let size = fields.next()?.parse().ok()?;
            (kind == "blob").then(|| TreeEntry {
                path: path.to_string(),
                size,
            })
        })
        .collect()
}

/// Parse `git diff-tree --name-status --no-renames -z` output.
pub(crate) fn parse_name_status_z(raw: &[u8]) -> Vec<PathChange> {
    let mut fields = raw.split(|b| *b == 0).filter(|f| !f.is_empty());
    let mut changes = Vec::new();

    while let (Some(status), Some(path)) = (fields.next(), fields.next()) {
        let Ok(path) = std::str::from_utf8(path) else {
            debug!("Skipping non UTF-8 path in diff");
            continue;
        };
        let kind = match status.first() {
            Some(b'A') | Some(b'C') => ChangeKind::Added,
            Some(b'M') | Some(b'T') => ChangeKind::Modified,
            Some(b'D') => ChangeKind::Removed,
            _ => {
                debug!(
                    "Skipping {} with status {}",
                    path,
                    String::from_utf8_lossy(status)
                );
                continue;
            }
        };
        changes.push(PathChange::new(path, kind));
    }
    changes
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_name_status() {
        let raw = b"M\0src/a.rs\0A\0new.txt\0D\0old.txt\0T\0link\0U\0conflict\0";
        let changes = parse_name_status_z(raw);
        assert_eq!(
            changes,
            vec![
                PathChange::new("src/a.rs", ChangeKind::Modified),
                PathChange::new("new.txt", ChangeKind::Added),
                PathChange::new("old.txt", ChangeKind::Removed),
                PathChange::new("link", ChangeKind::Modified),
            ]
        );
        assert!(parse_name_status_z(b"").is_empty());
    }

    #[test]
    fn test_parse_ls_tree() {
        let raw = b"100644 blob 1111111111111111111111111111111111111111      12\tREADME.md\0\
160000 commit 2222222222222222222222222222222222222222       -\tvendor/sub\0\
100644 blob 3333333333333333333333333333333333333333    4096\tsrc/with space.rs\0";
        let entries = parse_ls_tree_z(raw);
        assert_eq!(
            entries,
            vec![
                TreeEntry {
                    path: "README.md".into(),
                    size: 12
                },
                TreeEntry {
                    path: "src/with space.rs".into(),
                    size: 4096
                },
            ]
        );
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args([
                "-c",
                "user.name=Test",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    fn commit_all(dir: &Path, message: &str) {
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", message]);
    }

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q"]);
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::write(dir.path().join("b.txt"), "world").unwrap();
        fs::write(dir.path().join("logo.png"), "PNG").unwrap();
        commit_all(dir.path(), "first");
        dir
    }

    #[test]
    fn test_list_and_read_at_head() {
        if !git_available() {
            return;
        }
        let dir = init_repo();
        let repo = GitRepository::open(dir.path(), &IngestConfig::default()).unwrap();
        assert!(GitRepository::is_repository(dir.path()));

        assert_eq!(repo.list().unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(repo.read("a.txt").unwrap(), "hello");
        assert_eq!(repo.revision().unwrap(), repo.head().unwrap());

        // Uncommitted edits are invisible
        fs::write(dir.path().join("a.txt"), "dirty").unwrap();
        assert_eq!(repo.read("a.txt").unwrap(), "hello");
    }

    #[test]
    fn test_deltas_since() {
        if !git_available() {
            return;
        }
        let dir = init_repo();
        let repo = GitRepository::open(dir.path(), &IngestConfig::default()).unwrap();
        let first = repo.head().unwrap();

        fs::write(dir.path().join("a.txt"), "hello again").unwrap();
        commit_all(dir.path(), "second");
        fs::remove_file(dir.path().join("b.txt")).unwrap();
        fs::write(dir.path().join("c.txt"), "new").unwrap();
        commit_all(dir.path(), "third");

        let deltas = repo.deltas_since(&first).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].parent.as_deref(), Some(first.as_str()));
        assert_eq!(
            deltas[0].changes,
            vec![PathChange::new("a.txt", ChangeKind::Modified)]
        );
        assert!(deltas[1]
            .changes
            .contains(&PathChange::new("b.txt", ChangeKind::Removed)));
        assert!(deltas[1]
            .changes
            .contains(&PathChange::new("c.txt", ChangeKind::Added)));

        assert_eq!(repo.latest_commit_delta().unwrap(), deltas[1]);
        assert_eq!(
            repo.read_at("a.txt", &deltas[0].revision).unwrap(),
            "hello again"
        );
        assert_eq!(repo.read_at("a.txt", &first).unwrap(), "hello");
        assert!(repo.deltas_since(&repo.head().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_root_commit_delta() {
        if !git_available() {
            return;
        }
        let dir = init_repo();
        let repo = GitRepository::open(dir.path(), &IngestConfig::default()).unwrap();
        let delta = repo.latest_commit_delta().unwrap();
        assert_eq!(delta.parent, None);
        assert_eq!(delta.changes.len(), 3);
        assert!(delta.changes.iter().all(|c| c.kind == ChangeKind::Added));
    }

    #[test]
    fn test_not_found_errors() {
        if !git_available() {
            return;
        }
        let dir = init_repo();
        let repo = GitRepository::open(dir.path(), &IngestConfig::default()).unwrap();
        let head = repo.head().unwrap();

        assert!(matches!(
            repo.read_at("missing.txt", &head),
            Err(KbError::FileNotFound { .. })
        ));
        assert!(matches!(
            repo.read_at("a.txt", "no-such-branch"),
            Err(KbError::RevisionUnavailable { .. })
        ));
        assert!(matches!(
            repo.deltas_since("0000000000000000000000000000000000000000"),
            Err(KbError::RevisionUnavailable { .. })
        ));
        assert!(matches!(
            repo.read_at("logo.png", &head),
            Err(KbError::ContentRejected { .. })
        ));
    }

    #[test]
    fn test_at_revision_pins_snapshot() {
        if !git_available() {
            return;
        }
        let dir = init_repo();
        let first = GitRepository::open(dir.path(), &IngestConfig::default())
            .unwrap()
            .head()
            .unwrap();
        fs::write(dir.path().join("a.txt"), "changed").unwrap();
        commit_all(dir.path(), "second");

        let pinned = GitRepository::open(dir.path(), &IngestConfig::default())
            .unwrap()
            .at_revision(&first)
            .unwrap();
        assert_eq!(pinned.revision().unwrap(), first);
        assert_eq!(pinned.read("a.txt").unwrap(), "hello");
    }

    #[test]
    fn test_open_outside_repository() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        assert!(!GitRepository::is_repository(dir.path()));
        assert!(GitRepository::open(dir.path(), &IngestConfig::default()).is_err());
    }
}
