use std::path::{Path, PathBuf};
use std::process::Command;

/// Embeds `KBSYNC_COMMIT` for `kbsync --version`.
///
/// Set `KBSYNC_COMMIT` in the environment to override, e.g. when building
/// from a source archive without `.git`.
fn main() {
    println!("cargo:rerun-if-env-changed=KBSYNC_COMMIT");

    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default());

    let commit = std::env::var("KBSYNC_COMMIT")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| git(&manifest_dir, &["describe", "--always", "--dirty", "--abbrev=10"]))
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=KBSYNC_COMMIT={}", commit);

    // The crate sits two levels below the checkout, so ask git where HEAD lives
    if let Some(git_dir) = git(&manifest_dir, &["rev-parse", "--absolute-git-dir"]) {
        let git_dir = Path::new(&git_dir);
        println!("cargo:rerun-if-changed={}", git_dir.join("HEAD").display());
        println!("cargo:rerun-if-changed={}", git_dir.join("index").display());
    }
}

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").arg("-C").arg(dir).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
