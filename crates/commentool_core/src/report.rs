//! Console and artifact output helpers shared by the migration commands.

use std::fmt::Write as _;

use similar::{ChangeTag, TextDiff};

/// Quote one CSV field per RFC 4180: wrap in double quotes when needed and
/// double any embedded quotes.
pub fn csv_field(value: &str) -> String {
    if value.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render one CSV record (no trailing newline).
pub fn csv_row(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",")
}

/// Unified-diff preview of a content rewrite, for dry-run output. Context
/// lines are elided so only the changed lines print.
pub fn unified_preview(original: &str, updated: &str) -> String {
    let diff = TextDiff::from_lines(original, updated);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        let _ = write!(out, "  {sign} {}", change);
        if !change.value().ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Truncate for single-line console previews, char-boundary safe.
pub fn truncate_for_display(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let cut: String = flattened.chars().take(max_chars).collect();
    format!("{cut}...")
}
