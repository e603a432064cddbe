//! Filesystem document source and the content filters shared by all sources.
//!
//! [`FsDocumentSource`] walks a directory with the `ignore` crate, so
//! `.gitignore`, `.git/info/exclude` and the global gitignore are honored.
//! Build and VCS directories in [`ALWAYS_IGNORED_DIRS`](crate::constants::ALWAYS_IGNORED_DIRS)
//! are skipped even without an ignore file.
//!
//! Cheap checks (path rules, extension, size on disk) happen in `list`; checks
//! that need the bytes (UTF-8, NUL, line count) happen in `read`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use tracing::{debug, trace};

use crate::collaborators::DocumentSource;
use crate::config::IngestConfig;
use crate::constants::{has_binary_extension, should_ignore_dir};
use crate::errors::{KbError, KbResult};

// ============================================================================
// PathFilter
// ============================================================================

/// Include/exclude rules for repository-relative paths.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<Gitignore>,
    exclude: Gitignore,
}

impl PathFilter {
    /// Build from the `ingest` config section.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidConfiguration`] for an unparsable glob.
    pub fn from_config(config: &IngestConfig) -> KbResult<Self> {
        let include = if config.include.is_empty() {
            None
        } else {
            Some(build_globs(&config.include, "ingest.include")?)
        };
        let exclude = build_globs(&config.exclude, "ingest.exclude")?;
        Ok(Self { include, exclude })
    }

    /// A filter that only applies the built-in rules.
    pub fn permissive() -> Self {
        Self {
            include: None,
            exclude: Gitignore::empty(),
        }
    }

    /// Whether a repository-relative path may be indexed.
    pub fn allows(&self, path: &str) -> bool {
        let mut parts: Vec<&str> = path.split('/').collect();
        parts.pop();
        if parts.iter().any(|dir| should_ignore_dir(dir)) {
            return false;
        }
        if has_binary_extension(path) {
            return false;
        }
        if self
            .exclude
            .matched_path_or_any_parents(path, false)
            .is_ignore()
        {
            return false;
        }
        match &self.include {
            Some(include) => include.matched_path_or_any_parents(path, false).is_ignore(),
            None => true,
        }
    }
}

fn build_globs(globs: &[String], key: &str) -> KbResult<Gitignore> {
    let mut builder = GitignoreBuilder::new("");
    for glob in globs {
        builder.add_line(None, glob).map_err(|e| {
            KbError::invalid_config(
                format!("{} has an invalid pattern `{}`: {}", key, glob, e),
                "Use gitignore syntax, e.g. `*.min.js` or `vendor/`",
            )
        })?;
    }
    builder.build().map_err(|e| {
        KbError::invalid_config(
            format!("{} could not be compiled: {}", key, e),
            "Use gitignore syntax, e.g. `*.min.js` or `vendor/`",
        )
    })
}

// ============================================================================
// ContentLimits
// ============================================================================

/// Size and shape limits applied to file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLimits {
    pub max_file_size_bytes: u64,
    pub max_file_lines: usize,
}

impl ContentLimits {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_file_size_bytes: config.max_file_size_bytes,
            max_file_lines: config.max_file_lines,
        }
    }

    /// Turn raw bytes into indexable text, or reject them.
    pub fn decode(&self, path: &str, bytes: Vec<u8>) -> KbResult<String> {
        let reject = |reason: String| KbError::ContentRejected {
            path: path.to_string(),
            reason,
        };

        if bytes.len() as u64 > self.max_file_size_bytes {
            return Err(reject(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_file_size_bytes
            )));
        }
        if bytes.contains(&0) {
            return Err(reject("binary content".to_string()));
        }
        let text = String::from_utf8(bytes).map_err(|_| reject("not valid UTF-8".to_string()))?;

        let lines = text.lines().count();
        if lines > self.max_file_lines {
            return Err(reject(format!(
                "{} lines exceeds the {} line limit",
                lines, self.max_file_lines
            )));
        }
        Ok(text)
    }
}

/// Reject paths that could escape the repository root.
pub(crate) fn check_relative_path(path: &str) -> KbResult<()> {
    let p = Path::new(path);
    let escapes = path.is_empty()
        || path.contains('\\')
        || p.components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(KbError::ContentRejected {
            path: path.to_string(),
            reason: "not a repository-relative path".to_string(),
        });
    }
    Ok(())
}

/// Check that a revision label can be part of a document id.
pub(crate) fn check_revision(revision: &str) -> KbResult<()> {
    if revision.is_empty() || revision.chars().any(char::is_whitespace) {
        return Err(KbError::invalid_config(
            format!("`{}` is not a usable revision label", revision),
            "Revisions must be non-empty and contain no whitespace",
        ));
    }
    Ok(())
}

// ============================================================================
// FsDocumentSource
// ============================================================================

/// Snapshot of a directory tree, labeled with a single revision.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
    revision: String,
    limits: ContentLimits,
    filter: PathFilter,
}

impl FsDocumentSource {
    /// Create a source for `root`, labeling every document with `revision`.
    pub fn new(root: impl Into<PathBuf>, revision: impl Into<String>, config: &IngestConfig) -> KbResult<Self> {
        let root = root.into();
        let revision = revision.into();
        check_revision(&revision)?;
        if !root.is_dir() {
            return Err(KbError::invalid_config(
                format!("{} is not a directory", root.display()),
                "Point kbsync at the repository root",
            ));
        }
        Ok(Self {
            root,
            revision,
            limits: ContentLimits::from_config(config),
            filter: PathFilter::from_config(config)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        Some(parts.join("/"))
    }
}

impl DocumentSource for FsDocumentSource {
    fn revision(&self) -> KbResult<String> {
        Ok(self.revision.clone())
    }

    fn list(&self) -> KbResult<Vec<String>> {
        let walker = WalkBuilder::new(&self.root)
            .hidden(true) // Skip hidden files
            .git_ignore(true) // Respect .gitignore
            .git_global(true) // Respect global gitignore
            .git_exclude(true) // Respect .git/info/exclude
            .require_git(false) // Honor .gitignore outside a git checkout too
            .follow_links(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !should_ignore_dir(&name)
            })
            .build();

        let mut paths = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(e) => e,
                Err(e) => {
                    if let Some(io_err) = e.io_error() {
                        if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                            debug!("Skipping entry due to permission denied: {}", e);
                            continue;
                        }
                    }
                    return Err(KbError::StoreIo {
                        path: self.root.clone(),
                        message: format!("failed to walk directory: {}", e),
                    });
                }
            };

            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let Some(rel) = self.relative(entry.path()) else {
                debug!("Skipping non UTF-8 path {:?}", entry.path());
                continue;
            };
            if !self.filter.allows(&rel) {
                trace!("Filtered {}", rel);
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.limits.max_file_size_bytes {
                debug!("Skipping {} ({} bytes)", rel, size);
                continue;
            }

            paths.push(rel);
        }

        paths.sort();
        debug!("Listed {} files under {}", paths.len(), self.root.display());
        Ok(paths)
    }

    fn read(&self, path: &str) -> KbResult<String> {
        check_relative_path(path)?;
        let full = self.root.join(path);
        let bytes = fs::read(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KbError::FileNotFound {
                    path: path.to_string(),
                    revision: self.revision.clone(),
                }
            } else {
                KbError::Io(e)
            }
        })?;
        self.limits.decode(path, bytes)
    }

    fn read_at(&self, path: &str, revision: &str) -> KbResult<String> {
        if revision != self.revision {
            return Err(KbError::RevisionUnavailable {
                revision: revision.to_string(),
                reason: format!(
                    "a directory snapshot only serves its own revision `{}`",
                    self.revision
                ),
            });
        }
        self.read(path)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", b"hello");
        write(dir.path(), "src/lib.rs", b"pub fn f() {}\n");
        write(dir.path(), "logo.png", b"\x89PNG");
        write(dir.path(), "target/debug/out.txt", b"built");
        write(dir.path(), ".kbsync/store/records.jsonl", b"{}");
        write(dir.path(), "gen/big.js", b"var x;");
        write(dir.path(), ".gitignore", b"gen/\n");
        dir
    }

    #[test]
    fn test_list_applies_builtin_rules_and_gitignore() {
        let dir = repo();
        let source = FsDocumentSource::new(dir.path(), "r1", &IngestConfig::default()).unwrap();
        assert_eq!(source.list().unwrap(), vec!["a.txt", "src/lib.rs"]);
    }

    #[test]
    fn test_list_applies_exclude_and_include() {
        let dir = repo();
        let config = IngestConfig {
            exclude: vec!["*.txt".to_string()],
            ..Default::default()
        };
        let source = FsDocumentSource::new(dir.path(), "r1", &config).unwrap();
        assert_eq!(source.list().unwrap(), vec!["src/lib.rs"]);

        let config = IngestConfig {
            include: vec!["src/".to_string()],
            ..Default::default()
        };
        let source = FsDocumentSource::new(dir.path(), "r1", &config).unwrap();
        assert_eq!(source.list().unwrap(), vec!["src/lib.rs"]);
    }

    #[test]
    fn test_list_skips_oversized() {
        let dir = repo();
        write(dir.path(), "huge.txt", &vec![b'x'; 4096]);
        let config = IngestConfig {
            max_file_size_bytes: 2048,
            ..Default::default()
        };
        let source = FsDocumentSource::new(dir.path(), "r1", &config).unwrap();
        assert!(!source.list().unwrap().contains(&"huge.txt".to_string()));
    }

    #[test]
    fn test_read() {
        let dir = repo();
        let source = FsDocumentSource::new(dir.path(), "r1", &IngestConfig::default()).unwrap();
        assert_eq!(source.read("a.txt").unwrap(), "hello");
        assert!(matches!(
            source.read("missing.txt"),
            Err(KbError::FileNotFound { .. })
        ));
        assert!(matches!(
            source.read("../etc/passwd"),
            Err(KbError::ContentRejected { .. })
        ));
    }

    #[test]
    fn test_read_at_only_own_revision() {
        let dir = repo();
        let source = FsDocumentSource::new(dir.path(), "r1", &IngestConfig::default()).unwrap();
        assert_eq!(source.read_at("a.txt", "r1").unwrap(), "hello");
        assert!(matches!(
            source.read_at("a.txt", "r0"),
            Err(KbError::RevisionUnavailable { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_revision_label() {
        let dir = repo();
        assert!(FsDocumentSource::new(dir.path(), "two words", &IngestConfig::default()).is_err());
    }

    #[test]
    fn test_content_limits() {
        let limits = ContentLimits {
            max_file_size_bytes: 100,
            max_file_lines: 2,
        };
        assert_eq!(limits.decode("a", b"one\ntwo\n".to_vec()).unwrap(), "one\ntwo\n");
        assert!(limits.decode("a", b"1\n2\n3\n".to_vec()).is_err());
        assert!(limits.decode("a", b"bin\0ary".to_vec()).is_err());
        assert!(limits.decode("a", vec![0xff, 0xfe]).is_err());
        assert!(limits.decode("a", vec![b'x'; 101]).is_err());
    }

    #[test]
    fn test_path_filter() {
        let filter = PathFilter::permissive();
        assert!(filter.allows("src/main.rs"));
        assert!(!filter.allows("node_modules/x/index.js"));
        assert!(!filter.allows("img/a.PNG"));

        let config = IngestConfig {
            exclude: vec!["docs/".to_string()],
            ..Default::default()
        };
        let filter = PathFilter::from_config(&config).unwrap();
        assert!(!filter.allows("docs/guide.md"));
        assert!(filter.allows("README.md"));
    }
}
