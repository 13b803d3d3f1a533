//! Locating and decomposing `INSERT` statements inside a SQL dump file.
//!
//! Dumps produced by WordPress export tools put one enormous multi-row
//! `INSERT` per table, sometimes wrapped across lines mid-string. The
//! scanner here stitches statements back together with the same quote and
//! parenthesis tracking the extractor uses, and [`parse_insert`] splits a
//! statement into table name, optional column list, and the raw `VALUES`
//! text for [`crate::extract::extract_rows`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::extract::extract_rows;

/// One `INSERT INTO ... VALUES ...;` statement, decomposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    /// Column list from the statement header, identifier quoting stripped.
    /// Empty when the header carries no explicit columns; callers then fall
    /// back to a known positional schema.
    pub columns: Vec<String>,
    /// Everything after the `VALUES` keyword, trailing `;` removed.
    pub values: String,
}

/// Decompose a complete `INSERT` statement. Returns `None` when the text is
/// not an insert or has no `VALUES` clause.
pub fn parse_insert(statement: &str) -> Option<InsertStatement> {
    let insert_at = find_keyword(statement, "INSERT INTO")?;
    let rest = statement[insert_at + "INSERT INTO".len()..].trim_start();

    let (table, rest) = parse_table_name(rest)?;
    let rest = rest.trim_start();

    let (columns, rest) = if rest.starts_with('(') {
        let close = matching_paren(rest)?;
        (split_identifiers(&rest[1..close]), &rest[close + 1..])
    } else {
        (Vec::new(), rest)
    };

    let values_at = find_keyword(rest, "VALUES")?;
    let mut values = rest[values_at + "VALUES".len()..].trim();
    values = values.strip_suffix(';').unwrap_or(values).trim_end();

    Some(InsertStatement {
        table,
        columns,
        values: values.to_string(),
    })
}

// Byte offset of an ASCII keyword, matched case-insensitively. Searching on
// bytes keeps the offset valid in the original string even when surrounding
// text is multibyte (an uppercased copy can have different byte lengths).
fn find_keyword(haystack: &str, keyword: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(keyword.len())
        .position(|window| window.eq_ignore_ascii_case(keyword.as_bytes()))
}

fn parse_table_name(rest: &str) -> Option<(String, &str)> {
    let bytes = rest.as_bytes();
    match bytes.first()? {
        b'`' => {
            let end = rest[1..].find('`')? + 1;
            Some((rest[1..end].to_string(), &rest[end + 1..]))
        }
        b'[' => {
            let end = rest.find(']')?;
            Some((rest[1..end].to_string(), &rest[end + 1..]))
        }
        _ => {
            let end = rest
                .find(|c: char| c == '(' || c.is_whitespace())
                .unwrap_or(rest.len());
            if end == 0 {
                return None;
            }
            Some((rest[..end].to_string(), &rest[end..]))
        }
    }
}

// Byte offset of the parenthesis closing the one at offset 0.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// Split a column list on commas and strip identifier quoting (backticks,
// double quotes, brackets). Identifier quotes are stripped, not unescaped.
fn split_identifiers(list: &str) -> Vec<String> {
    list.split(',')
        .map(|part| {
            part.trim()
                .trim_matches(|c| c == '`' || c == '"' || c == '[' || c == ']')
                .to_string()
        })
        .filter(|part| !part.is_empty())
        .collect()
}

/// Accumulates dump lines into complete `INSERT` statements.
///
/// A statement is complete when a line ends with `;` while no string literal
/// is open and parenthesis depth is back to zero. Anything still buffered at
/// end of file is flushed as-is (best effort).
#[derive(Debug, Default)]
pub struct StatementScanner {
    buffer: String,
    in_statement: bool,
    quote: Option<char>,
    escape_next: bool,
    depth: i32,
    pub statements_seen: usize,
}

impl StatementScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a complete statement when this line closes one.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if !self.in_statement {
            if !line.to_uppercase().contains("INSERT INTO") {
                return None;
            }
            self.buffer.clear();
            self.quote = None;
            self.escape_next = false;
            self.depth = 0;
            self.in_statement = true;
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');
        self.track(line);

        if self.quote.is_none() && self.depth == 0 && line.trim_end().ends_with(';') {
            self.in_statement = false;
            self.statements_seen += 1;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Flush a partially accumulated statement at end of input.
    pub fn finish(&mut self) -> Option<String> {
        if self.in_statement && !self.buffer.trim().is_empty() {
            self.in_statement = false;
            self.statements_seen += 1;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    fn track(&mut self, line: &str) {
        for c in line.chars() {
            if self.escape_next {
                self.escape_next = false;
                continue;
            }
            if c == '\\' {
                self.escape_next = true;
                continue;
            }
            match self.quote {
                Some(q) => {
                    if c == q {
                        self.quote = None;
                    }
                }
                None => match c {
                    '\'' | '"' => self.quote = Some(c),
                    '(' => self.depth += 1,
                    ')' => self.depth -= 1,
                    _ => {}
                },
            }
        }
    }
}

/// Read a dump file and collect the insert statements whose table name
/// contains `table_filter` (all inserts when the filter is `None`).
pub fn scan_dump(path: &Path, table_filter: Option<&str>) -> Result<Vec<InsertStatement>> {
    let file =
        File::open(path).with_context(|| format!("failed to open dump {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut scanner = StatementScanner::new();
    let mut statements = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        if let Some(statement) = scanner.push_line(line.trim_end_matches(['\n', '\r'])) {
            collect_statement(&statement, table_filter, &mut statements);
        }
    }
    if let Some(statement) = scanner.finish() {
        collect_statement(&statement, table_filter, &mut statements);
    }

    Ok(statements)
}

fn collect_statement(
    statement: &str,
    table_filter: Option<&str>,
    out: &mut Vec<InsertStatement>,
) {
    if let Some(parsed) = parse_insert(statement) {
        let keep = match table_filter {
            Some(filter) => parsed.table.to_lowercase().contains(&filter.to_lowercase()),
            None => true,
        };
        if keep {
            out.push(parsed);
        }
    }
}

/// Inventory of one table's inserts inside a dump.
#[derive(Debug, Clone, Serialize)]
pub struct TableInserts {
    pub table: String,
    pub columns: Vec<String>,
    pub statements: usize,
    pub rows: usize,
    pub skipped: usize,
}

/// Structure report for a whole dump file.
#[derive(Debug, Clone, Serialize)]
pub struct DumpReport {
    pub size_bytes: u64,
    pub tables: Vec<TableInserts>,
}

/// Walk every insert in the dump and count recoverable rows per table.
pub fn analyze_dump(path: &Path) -> Result<DumpReport> {
    let size_bytes = std::fs::metadata(path)
        .with_context(|| format!("failed to inspect {}", path.display()))?
        .len();
    let statements = scan_dump(path, None)?;

    let mut tables: Vec<TableInserts> = Vec::new();
    for statement in statements {
        let extraction = extract_rows(&statement.values);
        match tables.iter_mut().find(|t| t.table == statement.table) {
            Some(entry) => {
                entry.statements += 1;
                entry.rows += extraction.rows.len();
                entry.skipped += extraction.skipped;
                if entry.columns.is_empty() {
                    entry.columns = statement.columns;
                }
            }
            None => tables.push(TableInserts {
                table: statement.table,
                columns: statement.columns,
                statements: 1,
                rows: extraction.rows.len(),
                skipped: extraction.skipped,
            }),
        }
    }

    Ok(DumpReport { size_bytes, tables })
}

/// First `max_bytes` of the dump, for eyeballing its structure.
pub fn head_of_dump(path: &Path, max_bytes: usize) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("failed to open dump {}", path.display()))?;
    let mut buffer = Vec::with_capacity(max_bytes);
    file.take(max_bytes as u64)
        .read_to_end(&mut buffer)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn parse_insert_with_backticked_table_and_columns() {
        let parsed = parse_insert(
            "INSERT INTO `wp_comments` (`comment_ID`, `comment_author`) VALUES (1, 'mi');",
        )
        .expect("parse");
        assert_eq!(parsed.table, "wp_comments");
        assert_eq!(parsed.columns, vec!["comment_ID", "comment_author"]);
        assert_eq!(parsed.values, "(1, 'mi')");
    }

    #[test]
    fn parse_insert_without_column_list() {
        let parsed =
            parse_insert("INSERT INTO wp_comments VALUES (1, 'a'), (2, 'b');").expect("parse");
        assert_eq!(parsed.table, "wp_comments");
        assert!(parsed.columns.is_empty());
        assert_eq!(parsed.values, "(1, 'a'), (2, 'b')");
    }

    #[test]
    fn parse_insert_ignores_non_inserts() {
        assert!(parse_insert("CREATE TABLE wp_comments (id INTEGER);").is_none());
        assert!(parse_insert("INSERT INTO wp_comments SELECT * FROM other;").is_none());
    }

    #[test]
    fn scanner_joins_multi_line_statements() {
        let mut scanner = StatementScanner::new();
        assert!(scanner
            .push_line("INSERT INTO `wp_comments` VALUES (1, 'line one")
            .is_none());
        // The semicolon here is inside the still-open string literal.
        assert!(scanner.push_line("still inside; the string").is_none());
        let statement = scanner
            .push_line("done'), (2, 'short');")
            .expect("complete statement");
        let parsed = parse_insert(&statement).expect("parse");
        let extraction = extract_rows(&parsed.values);
        assert_eq!(extraction.rows.len(), 2);
        assert_eq!(
            extraction.rows[0][1].as_text(),
            Some("line one\nstill inside; the string\ndone")
        );
    }

    #[test]
    fn scanner_flushes_partial_statement_at_eof() {
        let mut scanner = StatementScanner::new();
        assert!(scanner
            .push_line("INSERT INTO t VALUES (1, 'trunc")
            .is_none());
        let flushed = scanner.finish().expect("flushed");
        assert!(flushed.contains("trunc"));
        assert!(scanner.finish().is_none());
    }

    #[test]
    fn scan_dump_filters_by_table() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(file, "-- dump header").expect("write");
        writeln!(file, "INSERT INTO `wp_posts` VALUES (1, 'post');").expect("write");
        writeln!(
            file,
            "INSERT INTO `wp_comments` VALUES (1, 5, 'mi'), (2, 5, 'o''brien');"
        )
        .expect("write");

        let statements = scan_dump(file.path(), Some("comments")).expect("scan");
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].table, "wp_comments");
        let extraction = extract_rows(&statements[0].values);
        assert_eq!(extraction.rows.len(), 2);
        assert_eq!(extraction.rows[1][2].as_text(), Some("o'brien"));
    }

    #[test]
    fn analyze_dump_counts_rows_per_table() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "INSERT INTO `wp_comments` (`comment_ID`) VALUES (1), (2), (3);"
        )
        .expect("write");
        writeln!(file, "INSERT INTO `wp_posts` VALUES (9);").expect("write");

        let report = analyze_dump(file.path()).expect("analyze");
        assert_eq!(report.tables.len(), 2);
        let comments = report
            .tables
            .iter()
            .find(|t| t.table == "wp_comments")
            .expect("comments entry");
        assert_eq!(comments.rows, 3);
        assert_eq!(comments.columns, vec!["comment_ID"]);
        assert_eq!(comments.skipped, 0);
    }
}
