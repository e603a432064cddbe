//! Table rendering for CLI output using comfy-table.
//!
//! | Command | Table Function |
//! |---------|----------------|
//! | `kbsync query` | `render_hits_table()` |
//! | `kbsync ingest` / `kbsync sync` | `render_outcomes_table()` |
//! | `kbsync show` | `render_history_table()` |

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ColumnConstraint, Table, Width};

use kbsync_core::{DocumentId, DocumentRecord, Outcome, RetrievalHit};

use super::format::{first_line, format_distance, format_relative_time, truncate_str};
use super::style::Style;

/// Width for tables: the terminal's, at least 40, 100 when not a terminal.
fn table_width(terminal: Option<u16>) -> u16 {
    terminal.unwrap_or(100).max(40)
}

fn plain_table(headers: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    let detected = terminal_size::terminal_size().map(|(w, _)| w.0);
    table.set_width(table_width(detected));
    table.set_header(headers);
    table
}

/// Query results.
///
/// ```text
/// RANK   DISTANCE   PATH                 SUMMARY
///    1      0.412   src/config.rs        Loads YAML configuration...
/// ```
pub fn render_hits_table(hits: &[RetrievalHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut table = plain_table(vec![
        Cell::new("RANK").set_alignment(CellAlignment::Right),
        Cell::new("DISTANCE").set_alignment(CellAlignment::Right),
        Cell::new("PATH"),
        Cell::new("SUMMARY"),
    ]);
    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(4)),
        ColumnConstraint::LowerBoundary(Width::Fixed(8)),
        ColumnConstraint::LowerBoundary(Width::Fixed(12)),
        ColumnConstraint::LowerBoundary(Width::Fixed(20)),
    ]);

    for (rank, hit) in hits.iter().enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1).set_alignment(CellAlignment::Right),
            Cell::new(format_distance(hit.distance)).set_alignment(CellAlignment::Right),
            Cell::new(hit.id.path()),
            Cell::new(truncate_str(first_line(&hit.summary), 80)),
        ]);
    }

    table.to_string()
}

/// Per-document outcomes of an ingest or delta.
///
/// Only failures carry a reason; pass `failures_only` to hide the rest.
pub fn render_outcomes_table(
    style: &Style,
    outcomes: &[(DocumentId, Outcome)],
    failures_only: bool,
) -> String {
    let rows: Vec<&(DocumentId, Outcome)> = outcomes
        .iter()
        .filter(|(_, o)| !failures_only || o.is_failed())
        .collect();
    if rows.is_empty() {
        return String::new();
    }

    let mut table = plain_table(vec![Cell::new("PATH"), Cell::new("OUTCOME"), Cell::new("REASON")]);
    for (id, outcome) in rows {
        let reason = match outcome {
            Outcome::Failed { reason, .. } => truncate_str(reason, 100),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(id.path()),
            Cell::new(style.outcome(outcome)),
            Cell::new(reason),
        ]);
    }

    table.to_string()
}

/// Every record stored for one path, oldest first.
pub fn render_history_table(style: &Style, records: &[&DocumentRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }

    let mut table = plain_table(vec![
        Cell::new("REVISION"),
        Cell::new("STATE"),
        Cell::new("SLOT").set_alignment(CellAlignment::Right),
        Cell::new("UPDATED"),
        Cell::new("SUMMARY"),
    ]);

    for record in records {
        let state = if record.alive { "live" } else { "tombstoned" };
        table.add_row(vec![
            Cell::new(style.revision(record.id.revision())),
            Cell::new(state),
            Cell::new(record.slot).set_alignment(CellAlignment::Right),
            Cell::new(format_relative_time(record.updated_at)),
            Cell::new(truncate_str(first_line(&record.summary), 60)),
        ]);
    }

    table.to_string()
}
