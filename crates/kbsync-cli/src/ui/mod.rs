//! # CLI UI Module
//!
//! Styling and formatting layer for kbsync output.
//!
//! Human output uses bracketed prefixes (`[ok]`, `[err]`, ...) and plain
//! tables so it stays readable without colors. `NO_COLOR` is honored and
//! every command has a `--json` form for scripts.
//!
//! ## Module Structure
//!
//! - `color`: `--color` modes and `NO_COLOR`
//! - `style`: Message types, prefixes, and styling functions
//! - `format`: Utility formatters (time, distances, truncation)
//! - `table`: Table rendering with comfy-table
//! - `progress`: Spinner for long operations

pub mod color;
pub mod format;
pub mod progress;
pub mod style;
pub mod table;

pub use color::ColorMode;
pub use progress::{Progress, ProgressMode};
pub use style::{MessageType, Style};
