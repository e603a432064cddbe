//! CLI definition and command dispatch for kbsync.
//!
//! This module defines the command-line interface using `clap` and provides
//! the `run()` function that opens a [`KbEngine`] and dispatches to it.
//!
//! ## Configuration Precedence
//!
//! 1. `--config` (or `KBSYNC_CONFIG`)
//! 2. `<root>/.kbsync/config.yaml`
//! 3. `~/.kbsync/config.yaml`
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::ui::{format, table, ColorMode, MessageType, Progress, ProgressMode, Style};

use kbsync_core::{
    DocumentRecord, IngestOptions, KbEngine, KbError, QueryOptions, WORKTREE_REVISION,
};

// ============================================================================
// CLI Definition
// ============================================================================

/// Package version plus the `git describe` of the build
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("KBSYNC_COMMIT"), ")");

/// Repository knowledge base: summarize, embed, sync and search your code
#[derive(Parser, Debug)]
#[command(name = "kbsync")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "KBSYNC_VERBOSE")]
    pub verbose: bool,

    /// Suppress progress and informational messages
    #[arg(short, long, global = true, env = "KBSYNC_QUIET")]
    pub quiet: bool,

    /// Path to configuration file (default: <root>/.kbsync/config.yaml)
    #[arg(long, global = true, env = "KBSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repository root (default: current directory)
    #[arg(short = 'C', long, global = true, env = "KBSYNC_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// When to color output
    #[arg(long, global = true, env = "KBSYNC_COLOR", value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest a full snapshot of the repository
    #[command(after_help = r#"EXAMPLES:
    # Ingest HEAD of the current git checkout
    kbsync ingest

    # Ingest a tag and drop records for files that no longer exist
    kbsync ingest --revision v1.2.0 --prune

    # Ingest the working tree (uncommitted edits included)
    kbsync ingest --worktree
"#)]
    Ingest {
        /// Revision to ingest (git: any commit-ish; plain directory: a label)
        #[arg(long)]
        revision: Option<String>,

        /// Tombstone records whose path is not in the snapshot
        #[arg(long)]
        prune: bool,

        /// Walk the working tree even inside a git checkout
        #[arg(long)]
        worktree: bool,
    },

    /// Apply every commit since the last ingest or sync
    #[command(after_help = r#"EXAMPLES:
    # Catch up after pulling
    git pull && kbsync sync

    # Machine-readable per-commit outcomes
    kbsync sync --json
"#)]
    Sync,

    /// Find the documents most similar to a piece of text
    #[command(after_help = r#"EXAMPLES:
    # Top results for a question
    kbsync query "where is the config file parsed?"

    # Ten results, only under src/
    kbsync query "retry backoff" -k 10 --prefix src/

    # Pipe paths to another tool
    kbsync query "http client" --json | jq -r '.[].id.path'
"#)]
    Query {
        /// Free-text query
        text: String,

        /// Number of results (default: retrieval.topK)
        #[arg(short, long)]
        k: Option<usize>,

        /// Only return paths starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Only return documents recorded at this revision
        #[arg(long)]
        revision: Option<String>,
    },

    /// Answer a question using the knowledge base as context
    #[command(after_help = r#"EXAMPLES:
    kbsync answer "How do I add a new configuration option?"
"#)]
    Answer {
        /// The question
        text: String,
    },

    /// Show store statistics and the watermark
    #[command(after_help = r#"EXAMPLES:
    kbsync status

    # Is the knowledge base behind HEAD?
    kbsync status --json | jq '.stats.watermark'
"#)]
    Status,

    /// Show every record stored for a path
    #[command(after_help = r#"EXAMPLES:
    kbsync show src/main.rs
"#)]
    Show {
        /// Repository-relative path
        path: String,
    },
}

// ============================================================================
// Entry point
// ============================================================================

/// Log directives for kbsync's crates: warnings by default, debug with
/// `--verbose`, errors only with `--quiet`.
fn default_log_directives(verbose: bool, quiet: bool) -> String {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    ["kbsync_core", "kbsync_db", "kbsync_model", "kbsync_cli"]
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse arguments, run the command and map the result to an exit code.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG, when set, replaces the flag-derived levels
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_directives(cli.verbose, cli.quiet)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let style = Style::new(cli.color);

    let root = resolve_root(cli.root.as_deref());
    let engine = match KbEngine::open(&root, cli.config.as_deref()) {
        Ok(engine) => engine,
        Err(e) => {
            let hint = hint_for(&e, None).unwrap_or_else(|| match &cli.config {
                Some(path) => format!("Check your config at {}", path.display()),
                None => format!(
                    "Check {}",
                    kbsync_core::KbConfig::repo_path(&root).display()
                ),
            });
            eprintln!(
                "{}",
                style.error_with_context(
                    "Failed to open knowledge base",
                    Some(&e.to_string()),
                    Some(&hint),
                )
            );
            return ExitCode::FAILURE;
        }
    };

    if !cli.quiet && !cli.json {
        if let Ok(warnings) = engine.config().validate() {
            for warning in warnings {
                eprintln!("{}", style.message(MessageType::Warn, &warning));
            }
        }
    }

    let out = Output {
        style,
        json: cli.json,
        verbose: cli.verbose,
        progress: ProgressMode::detect(cli.quiet, cli.json),
    };

    let result = match cli.command {
        Command::Ingest {
            revision,
            prune,
            worktree,
        } => handle_ingest(
            &out,
            &engine,
            IngestOptions {
                revision,
                prune,
                worktree,
            },
        ),
        Command::Sync => handle_sync(&out, &engine),
        Command::Query {
            text,
            k,
            prefix,
            revision,
        } => handle_query(
            &out,
            &engine,
            &text,
            QueryOptions {
                k,
                path_prefix: prefix,
                revision,
            },
        ),
        Command::Answer { text } => handle_answer(&out, &engine, &text),
        Command::Status => handle_status(&out, &engine),
        Command::Show { path } => handle_show(&out, &engine, &path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kb_error = e.downcast_ref::<KbError>();
            let hint = kb_error.and_then(|err| hint_for(err, Some(&engine)));
            let cause = e.chain().nth(1).map(|c| c.to_string());
            eprintln!(
                "{}",
                style.error_with_context(&e.to_string(), cause.as_deref(), hint.as_deref())
            );
            ExitCode::FAILURE
        }
    }
}

/// Flags shared by every handler.
struct Output {
    style: Style,
    json: bool,
    verbose: bool,
    progress: ProgressMode,
}

impl Output {
    fn print(&self, msg_type: MessageType, text: &str) {
        if !self.json {
            println!("{}", self.style.message(msg_type, text));
        }
    }
}

fn resolve_root(root: Option<&Path>) -> PathBuf {
    let root = root.unwrap_or_else(|| Path::new("."));
    std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Suggest a next step for errors users can act on.
fn hint_for(err: &KbError, engine: Option<&KbEngine>) -> Option<String> {
    match err {
        KbError::Transport { .. } | KbError::CollaboratorTimeout { .. } => {
            let url = engine
                .map(|e| e.config().collaborators.url.clone())
                .unwrap_or_else(|| "collaborators.url".to_string());
            Some(format!("Is the model server running at {}?", url))
        }
        KbError::NoWatermark => Some("Run `kbsync ingest` first".to_string()),
        KbError::RevisionUnavailable { .. } => {
            Some("Run `kbsync ingest` to rebuild from a full snapshot".to_string())
        }
        KbError::Git { .. } => Some(
            "Is this a git checkout? Use `kbsync ingest --worktree` for plain directories"
                .to_string(),
        ),
        KbError::DimensionMismatch { .. } | KbError::StoreIncompatible { .. } => Some(
            "Set store.dimension to the embedding model's dimension, or remove the store and re-ingest"
                .to_string(),
        ),
        KbError::Inconsistent(_) => {
            Some("Remove the store directory and run `kbsync ingest`".to_string())
        }
        _ => None,
    }
}

// ============================================================================
// Command handlers
// ============================================================================

fn handle_ingest(out: &Output, engine: &KbEngine, options: IngestOptions) -> Result<()> {
    let source = if options.worktree || !engine.is_git() {
        "working tree"
    } else {
        "git snapshot"
    };
    let progress = Progress::spinner(&format!("Ingesting {}...", source), out.progress);
    let report = engine.ingest(&options).context("Ingest failed")?;
    progress.finish();

    if out.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let style = &out.style;
    let counts = report.counts();
    out.print(
        MessageType::Ok,
        &format!(
            "Ingested {} documents at {}",
            report.manifest.len(),
            style.revision(&report.revision)
        ),
    );
    println!("{}", style.message_detail("Indexed", &counts.indexed.to_string()));
    println!("{}", style.message_detail("Unchanged", &counts.unchanged.to_string()));
    if !report.pruned.is_empty() {
        println!("{}", style.message_detail("Pruned", &counts.removed.to_string()));
    }
    if counts.failed > 0 {
        println!("{}", style.message_detail("Failed", &counts.failed.to_string()));
    }

    let outcomes = table::render_outcomes_table(style, &report.outcomes, !out.verbose);
    if !outcomes.is_empty() {
        println!();
        println!("{}", outcomes);
    }

    if !report.watermark_advanced {
        out.print(
            MessageType::Warn,
            &format!(
                "Watermark not advanced: {} documents failed with retryable errors",
                report.retryable_failures()
            ),
        );
        out.print(
            MessageType::Hint,
            "Re-run `kbsync ingest` once the model server is reachable",
        );
    } else if report.revision == WORKTREE_REVISION {
        out.print(
            MessageType::Hint,
            "Working-tree snapshots cannot be synced; use `kbsync ingest` again after edits",
        );
    }

    Ok(())
}

fn handle_sync(out: &Output, engine: &KbEngine) -> Result<()> {
    let progress = Progress::spinner("Syncing commits...", out.progress);
    let report = engine.sync().context("Sync failed")?;
    progress.finish();

    if out.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let style = &out.style;
    if report.applied.is_empty() {
        out.print(
            MessageType::Ok,
            &format!("Already up to date at {}", style.revision(&report.watermark)),
        );
        return Ok(());
    }

    for delta in &report.applied {
        let counts = delta.counts();
        println!(
            "  {}  +{} ={} -{} !{}",
            style.revision(&delta.revision),
            counts.indexed,
            counts.unchanged,
            counts.removed,
            counts.failed
        );
        let outcomes = table::render_outcomes_table(style, &delta.outcomes, !out.verbose);
        if !outcomes.is_empty() {
            println!("{}", outcomes);
        }
    }

    match &report.stalled_at {
        None => out.print(
            MessageType::Ok,
            &format!(
                "Synced {} commits: {} -> {}",
                report.applied.len(),
                style.revision(&report.from),
                style.revision(&report.watermark)
            ),
        ),
        Some(stalled) => {
            out.print(
                MessageType::Warn,
                &format!(
                    "Stopped at {} with retryable failures; {} later commits pending",
                    style.revision(stalled),
                    report.pending
                ),
            );
            out.print(
                MessageType::Hint,
                &format!(
                    "Watermark stays at {}; re-run `kbsync sync` to retry",
                    style.revision(&report.watermark)
                ),
            );
        }
    }

    Ok(())
}

fn handle_query(out: &Output, engine: &KbEngine, text: &str, options: QueryOptions) -> Result<()> {
    let hits = engine.query(text, &options).context("Query failed")?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        out.print(MessageType::Info, "No matching documents");
        if engine.store().stats()?.live_records == 0 {
            out.print(
                MessageType::Hint,
                "The knowledge base is empty; run `kbsync ingest`",
            );
        }
        return Ok(());
    }

    println!("{}", table::render_hits_table(&hits));
    Ok(())
}

fn handle_answer(out: &Output, engine: &KbEngine, question: &str) -> Result<()> {
    let progress = Progress::spinner("Thinking...", out.progress);
    let answer = engine.answer(question).context("Answer failed")?;
    progress.finish();

    if out.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    let style = &out.style;
    println!("{}", answer.text.trim());

    if !answer.sources.is_empty() {
        println!();
        println!("{}", style.section("SOURCES"));
        for (rank, hit) in answer.sources.iter().enumerate() {
            println!(
                "  {}. {} ({})",
                rank + 1,
                style.file_path(hit.id.path()),
                format::format_distance(hit.distance)
            );
        }
    }

    Ok(())
}

fn handle_status(out: &Output, engine: &KbEngine) -> Result<()> {
    let status = engine.status()?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let style = &out.style;
    let stats = &status.stats;
    let config = status
        .config_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());

    println!("{}", style.section("STATUS"));
    println!();
    println!("  {}", style.key_value("Root", &status.root.display().to_string()));
    println!("  {}", style.key_value("Config", &config));
    println!("  {}", style.key_value("Store", &status.store_dir.display().to_string()));
    println!("  {}", style.key_value("Dimension", &stats.dimension.to_string()));
    println!(
        "  {}",
        style.key_value(
            "Records",
            &format!(
                "{} live, {} tombstoned",
                stats.live_records, stats.tombstoned_records
            )
        )
    );
    println!("  {}", style.key_value("Index slots", &stats.index_slots.to_string()));
    println!(
        "  {}",
        style.key_value(
            "Watermark",
            &stats
                .watermark
                .as_deref()
                .map(|w| style.revision(w))
                .unwrap_or_else(|| "(none)".to_string())
        )
    );
    if let Some(head) = &status.head {
        println!("  {}", style.key_value("HEAD", &style.revision(head)));
    }

    if stats.watermark.is_none() {
        println!();
        out.print(MessageType::Hint, "Run `kbsync ingest` to build the knowledge base");
    } else if status.is_behind() {
        println!();
        out.print(MessageType::Hint, "Watermark is behind HEAD; run `kbsync sync`");
    }

    Ok(())
}

fn handle_show(out: &Output, engine: &KbEngine, path: &str) -> Result<()> {
    let history = engine.show(path)?;
    if history.is_empty() {
        return Err(KbError::DocumentNotFound(path.to_string()).into());
    }
    let records: Vec<&DocumentRecord> = history.iter().map(|r| r.as_ref()).collect();

    if out.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let style = &out.style;
    println!("{}", style.section(&style.file_path(path)));
    println!();
    println!("{}", table::render_history_table(style, &records));

    if let Some(live) = records.iter().rev().find(|r| r.alive) {
        println!();
        println!("{}", style.section("SUMMARY"));
        println!("{}", live.summary.trim());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_flags() {
        let cli = Cli::try_parse_from([
            "kbsync", "query", "retry", "-k", "3", "--prefix", "src/", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Query { text, k, prefix, .. } => {
                assert_eq!(text, "retry");
                assert_eq!(k, Some(3));
                assert_eq!(prefix.as_deref(), Some("src/"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_log_directives() {
        assert_eq!(
            default_log_directives(false, false),
            "kbsync_core=warn,kbsync_db=warn,kbsync_model=warn,kbsync_cli=warn"
        );
        assert!(default_log_directives(true, true).contains("kbsync_core=debug"));
        assert!(default_log_directives(false, true).contains("kbsync_cli=error"));
    }

    #[test]
    fn test_color_flag_parses_to_mode() {
        let cli = Cli::try_parse_from(["kbsync", "--color", "never", "status"]).unwrap();
        assert_eq!(cli.color, ColorMode::Never);
        assert!(Cli::try_parse_from(["kbsync", "--color", "loud", "status"]).is_err());
    }

    #[test]
    fn test_hints() {
        assert!(hint_for(&KbError::NoWatermark, None)
            .unwrap()
            .contains("kbsync ingest"));
        assert!(hint_for(&KbError::transport("embedder", "refused"), None).is_some());
        assert!(hint_for(&KbError::DocumentNotFound("a".into()), None).is_none());
    }
}
