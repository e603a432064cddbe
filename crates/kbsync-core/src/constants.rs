//! Common constants used throughout kbsync-core.

// ============================================================================
// Directory Names
// ============================================================================

/// The name of the kbsync metadata directory within a repository.
///
/// Config and the default store live under `.kbsync/` at the repository root.
pub const KBSYNC_DIR: &str = ".kbsync";

/// Default store directory, relative to the repository root.
pub const DEFAULT_STORE_DIR: &str = ".kbsync/store";

/// The name of the kbsync configuration file.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "KBSYNC_CONFIG";

/// Revision label used for a plain directory walk outside of git.
pub const WORKTREE_REVISION: &str = "worktree";

// ============================================================================
// Ignored Directories
// ============================================================================

/// Directories that are always skipped during a snapshot walk, with or
/// without a `.gitignore` saying so.
pub const ALWAYS_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".kbsync",
    "target",
    "node_modules",
    ".next",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".mypy_cache",
    ".pytest_cache",
];

/// Check if a directory name should always be ignored.
#[inline]
pub fn should_ignore_dir(name: &str) -> bool {
    ALWAYS_IGNORED_DIRS.contains(&name)
}

// ============================================================================
// Binary File Extensions
// ============================================================================

/// File extensions that indicate binary (non-text) content.
pub const BINARY_EXTENSIONS: &[&str] = &[
    // Images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "tif",
    // Audio/Video
    "mp3", "mp4", "wav", "avi", "mov", "mkv", "flac", "ogg", "webm", // Archives
    "zip", "tar", "gz", "rar", "7z", "bz2", "xz", // Binaries/Executables
    "exe", "dll", "so", "dylib", "bin", "o", "a", "lib", "obj", // Documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", // Fonts
    "ttf", "otf", "woff", "woff2", "eot", // Database
    "db", "sqlite", "sqlite3", // Other binary/generated formats
    "pyc", "pyo", "class", "jar", "war", "wasm",
];

/// Check if a file extension indicates binary content.
#[inline]
pub fn is_binary_extension(ext: &str) -> bool {
    BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Check a repository-relative path against [`BINARY_EXTENSIONS`].
pub fn has_binary_extension(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(is_binary_extension)
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
