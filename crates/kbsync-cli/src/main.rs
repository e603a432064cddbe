//! # kbsync CLI
//!
//! Command-line interface for the repository knowledge base.
//!
//! This binary exposes `kbsync-core` as a handful of commands: ingest a
//! snapshot, sync from git history, query, answer, and inspect the store.
//! Run `kbsync --help` for usage information.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
