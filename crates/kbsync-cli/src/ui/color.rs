//! `--color` handling.
//!
//! `auto` colors only when stdout is a terminal and `NO_COLOR` is unset or
//! empty (https://no-color.org/). `always` and `never` ignore both.

use std::io::IsTerminal;

use clap::ValueEnum;

/// Value of `--color` / `KBSYNC_COLOR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    Always,
    Never,
    #[default]
    Auto,
}

impl ColorMode {
    /// Decide for this process's stdout.
    pub fn is_enabled(self) -> bool {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        self.resolve(no_color, std::io::stdout().is_terminal())
    }

    pub fn resolve(self, no_color: bool, stdout_is_tty: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => stdout_is_tty && !no_color,
        }
    }
}
