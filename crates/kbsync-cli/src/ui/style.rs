//! Message styling for CLI output.
//!
//! ## Message Types
//!
//! | Prefix | Meaning | Color |
//! |--------|---------|-------|
//! | `[ok]` | Success | Green |
//! | `[err]` | Error | Red |
//! | `[warn]` | Warning | Yellow |
//! | `[info]` | Information | Blue |
//! | `[hint]` | Suggestion | Cyan |
//! | `[skip]` | Skipped | Dim |

use owo_colors::OwoColorize;

use kbsync_core::Outcome;

use super::color::ColorMode;

/// Message severity/type for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Operation completed successfully
    Ok,
    /// Operation failed, cannot continue
    Err,
    /// Operation succeeded with caveats
    Warn,
    /// Neutral status
    Info,
    /// Actionable next step
    Hint,
    /// Item was not processed
    Skip,
}

impl MessageType {
    /// Returns the prefix text for this message type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ok => "[ok]",
            Self::Err => "[err]",
            Self::Warn => "[warn]",
            Self::Info => "[info]",
            Self::Hint => "[hint]",
            Self::Skip => "[skip]",
        }
    }
}

/// Styling interface for CLI output.
///
/// Every method returns a `String`; callers decide between stdout and stderr.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    colors: bool,
}

impl Style {
    /// Resolve `color_mode` once for the whole run.
    pub fn new(color_mode: ColorMode) -> Self {
        Self {
            colors: color_mode.is_enabled(),
        }
    }

    pub fn colors_enabled(&self) -> bool {
        self.colors
    }

    /// Format a message with its type prefix.
    ///
    /// ```text
    /// [ok] Ingested 42 documents at 1a2b3c4d
    /// ```
    pub fn message(&self, msg_type: MessageType, text: &str) -> String {
        let prefix = msg_type.prefix();
        if !self.colors_enabled() {
            return format!("{} {}", prefix, text);
        }
        let styled = match msg_type {
            MessageType::Ok => prefix.green().to_string(),
            MessageType::Err => prefix.red().bold().to_string(),
            MessageType::Warn => prefix.yellow().to_string(),
            MessageType::Info => prefix.blue().to_string(),
            MessageType::Hint => prefix.cyan().to_string(),
            MessageType::Skip => prefix.dimmed().to_string(),
        };
        format!("{} {}", styled, text)
    }

    /// Indented detail line under a message.
    pub fn message_detail(&self, label: &str, value: &str) -> String {
        format!("     {}: {}", label, value)
    }

    /// Section header, bold when colors are on.
    pub fn section(&self, title: &str) -> String {
        if self.colors_enabled() {
            title.bold().to_string()
        } else {
            title.to_string()
        }
    }

    /// Error with optional cause and hint lines.
    ///
    /// ```text
    /// [err] Failed to open knowledge base
    ///       Cause: embedder unreachable: connection refused
    ///       Hint: Is the model server running at http://localhost:11434?
    /// ```
    pub fn error_with_context(&self, msg: &str, cause: Option<&str>, hint: Option<&str>) -> String {
        let mut output = self.message(MessageType::Err, msg);

        if let Some(cause_text) = cause {
            output.push('\n');
            output.push_str(&format!("      Cause: {}", cause_text));
        }

        if let Some(hint_text) = hint {
            output.push('\n');
            output.push_str(&format!("      Hint: {}", hint_text));
        }

        output
    }

    pub fn key_value(&self, key: &str, value: &str) -> String {
        if self.colors_enabled() {
            format!("{}: {}", key.dimmed(), value)
        } else {
            format!("{}: {}", key, value)
        }
    }

    /// Short form of a revision (first 8 chars, yellow).
    pub fn revision(&self, rev: &str) -> String {
        let short = rev.get(..8).unwrap_or(rev);
        if self.colors_enabled() {
            short.yellow().to_string()
        } else {
            short.to_string()
        }
    }

    /// File path (cyan).
    pub fn file_path(&self, path: &str) -> String {
        if self.colors_enabled() {
            path.cyan().to_string()
        } else {
            path.to_string()
        }
    }

    /// Label for a batch outcome, colored by kind.
    pub fn outcome(&self, outcome: &Outcome) -> String {
        let label = match outcome {
            Outcome::Indexed => "indexed",
            Outcome::Unchanged => "unchanged",
            Outcome::Removed => "removed",
            Outcome::Failed { retryable: true, .. } => "failed (retryable)",
            Outcome::Failed { .. } => "failed",
        };
        if !self.colors_enabled() {
            return label.to_string();
        }
        match outcome {
            Outcome::Indexed => label.green().to_string(),
            Outcome::Unchanged => label.dimmed().to_string(),
            Outcome::Removed => label.yellow().to_string(),
            Outcome::Failed { .. } => label.red().to_string(),
        }
    }
}
