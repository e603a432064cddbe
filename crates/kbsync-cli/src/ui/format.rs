//! Formatting utilities for CLI output.

use chrono::{DateTime, Utc};

/// Truncate a string to `max_len` characters, ending in `...` when cut.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{}...", kept)
}

/// First line of a summary, for single-row display.
pub fn first_line(s: &str) -> &str {
    s.lines().find(|l| !l.trim().is_empty()).map(str::trim).unwrap_or("")
}

/// Relative time ("5 mins ago", "3h ago", "2d ago"), or a date past a week.
pub fn format_relative_time(timestamp: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(timestamp);

    if duration.num_seconds() < 0 {
        return timestamp.format("%Y-%m-%d").to_string();
    }

    if duration.num_minutes() < 1 {
        "just now".to_string()
    } else if duration.num_hours() < 1 {
        format!("{} mins ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        timestamp.format("%Y-%m-%d").to_string()
    }
}

/// L2 distance with three decimals.
pub fn format_distance(distance: f32) -> String {
    format!("{:.3}", distance)
}
