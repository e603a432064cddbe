//! Shared test utilities for kbsync-cli integration tests.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

/// Get a Command for the kbsync binary, isolated from the user's config.
///
/// # Panics
///
/// Panics if the kbsync binary cannot be found.
#[allow(deprecated)]
pub fn kbsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kbsync").expect("kbsync binary should exist");
    cmd.env("HOME", home)
        .env("NO_COLOR", "1")
        .env_remove("KBSYNC_CONFIG")
        .env_remove("KBSYNC_ROOT")
        .env_remove("KBSYNC_VERBOSE");
    cmd
}

/// Write `<root>/.kbsync/config.yaml`.
pub fn write_config(root: &Path, yaml: &str) {
    let dir = root.join(".kbsync");
    fs::create_dir_all(&dir).expect("create .kbsync dir");
    fs::write(dir.join("config.yaml"), yaml).expect("write config");
}

/// A config whose model server refuses connections immediately.
#[allow(dead_code)]
pub const UNREACHABLE_CONFIG: &str = r#"
store:
  dimension: 4
collaborators:
  provider: excerpt
  url: http://127.0.0.1:9
  timeoutSecs: 5
  maxRetries: 0
"#;
