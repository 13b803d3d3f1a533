//! Typed views over rows recovered from a WordPress database dump, and the
//! comment-agent recovery pass that rebuilds `user_agent` values lost by the
//! original comment import.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::dump::InsertStatement;
use crate::extract::{extract_rows, Field, Row};
use crate::report::csv_row;

/// Default column order of the `wp_comments` table. Some dumps omit the
/// column list from the `INSERT` header entirely, so extraction stays
/// positional against this schema.
pub const WP_COMMENTS_COLUMNS: [&str; 15] = [
    "comment_ID",
    "comment_post_ID",
    "comment_author",
    "comment_author_email",
    "comment_author_url",
    "comment_author_IP",
    "comment_date",
    "comment_date_gmt",
    "comment_content",
    "comment_karma",
    "comment_approved",
    "comment_agent",
    "comment_type",
    "comment_parent",
    "user_id",
];

const AGENT_INDEX: usize = 11;

/// One `wp_comments` row, decoded positionally. Trailing columns past
/// `comment_agent` are optional because short rows do occur in practice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyComment {
    pub id: i64,
    pub post_id: Option<i64>,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub author_url: Option<String>,
    pub author_ip: Option<String>,
    pub date: Option<String>,
    pub date_gmt: Option<String>,
    pub content: Option<String>,
    pub approved: Option<String>,
    pub agent: Option<String>,
    pub comment_type: Option<String>,
    pub parent: Option<i64>,
    pub user_id: Option<i64>,
}

impl LegacyComment {
    /// Decode a positional row. Returns `None` when the row is too short to
    /// reach `comment_agent` or carries no usable comment id.
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.len() <= AGENT_INDEX {
            return None;
        }
        Some(Self {
            id: int_at(row, 0)?,
            post_id: int_at(row, 1),
            author: text_at(row, 2),
            author_email: text_at(row, 3),
            author_url: text_at(row, 4),
            author_ip: text_at(row, 5),
            date: text_at(row, 6),
            date_gmt: text_at(row, 7),
            content: text_at(row, 8),
            approved: text_at(row, 10),
            agent: text_at(row, AGENT_INDEX),
            comment_type: text_at(row, 12),
            parent: int_at(row, 13),
            user_id: int_at(row, 14),
        })
    }
}

fn text_at(row: &Row, index: usize) -> Option<String> {
    row.get(index).and_then(Field::to_nullable_string)
}

fn int_at(row: &Row, index: usize) -> Option<i64> {
    match row.get(index)? {
        Field::Integer { value, .. } => Some(*value),
        Field::Text(text) => text.trim().parse().ok(),
        Field::Null => None,
    }
}

/// The slice of a legacy comment the agent-recovery artifacts carry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentRecord {
    pub comment_id: i64,
    pub comment_author: Option<String>,
    pub comment_author_email: Option<String>,
    pub comment_agent: Option<String>,
}

impl AgentRecord {
    fn from_comment(comment: &LegacyComment) -> Self {
        Self {
            comment_id: comment.id,
            comment_author: comment.author.clone(),
            comment_author_email: comment.author_email.clone(),
            comment_agent: comment.agent.clone(),
        }
    }

    fn has_agent(&self) -> bool {
        self.comment_agent
            .as_deref()
            .is_some_and(|agent| !agent.is_empty())
    }
}

/// Outcome of the agent-recovery pass over a dump's comment inserts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentRecovery {
    pub records: Vec<AgentRecord>,
    pub rows_seen: usize,
    /// Rows too short to reach the agent column, or with no usable id.
    pub short_rows: usize,
    /// Unterminated tuples discarded by the extractor.
    pub skipped_tuples: usize,
}

impl AgentRecovery {
    pub fn with_agent(&self) -> usize {
        self.records.iter().filter(|r| r.has_agent()).count()
    }

    pub fn browser_agents(&self) -> usize {
        self.records
            .iter()
            .filter(|r| {
                r.comment_agent
                    .as_deref()
                    .is_some_and(|agent| agent.contains("Mozilla"))
            })
            .count()
    }
}

/// Run the extractor over comment-table inserts and pull out the agent slice
/// of every recoverable row.
pub fn recover_agents(statements: &[InsertStatement]) -> AgentRecovery {
    let mut recovery = AgentRecovery::default();
    for statement in statements {
        let extraction = extract_rows(&statement.values);
        recovery.skipped_tuples += extraction.skipped;
        for row in &extraction.rows {
            recovery.rows_seen += 1;
            match LegacyComment::from_row(row) {
                Some(comment) => recovery.records.push(AgentRecord::from_comment(&comment)),
                None => recovery.short_rows += 1,
            }
        }
    }
    recovery
}

/// `UPDATE comments SET user_agent = ... WHERE legacy_id = ...;` statements
/// for every record that has an agent, one per line.
pub fn update_agent_sql(recovery: &AgentRecovery) -> String {
    let mut out = String::new();
    for record in &recovery.records {
        if let Some(agent) = record.comment_agent.as_deref() {
            if agent.is_empty() {
                continue;
            }
            out.push_str(&format!(
                "UPDATE comments SET user_agent = {} WHERE legacy_id = {};\n",
                quote_sqlite_str(agent),
                record.comment_id
            ));
        }
    }
    out
}

// SQLite string literal: only the quote needs doubling, a backslash is an
// ordinary character there.
fn quote_sqlite_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn agents_csv(recovery: &AgentRecovery) -> String {
    let mut out = String::from("comment_id,comment_agent\n");
    for record in &recovery.records {
        out.push_str(&csv_row(&[
            &record.comment_id.to_string(),
            record.comment_agent.as_deref().unwrap_or(""),
        ]));
        out.push('\n');
    }
    out
}

fn verify_csv(recovery: &AgentRecovery) -> String {
    let mut out = String::from("comment_id,comment_author,comment_author_email,comment_agent\n");
    for record in &recovery.records {
        out.push_str(&csv_row(&[
            &record.comment_id.to_string(),
            record.comment_author.as_deref().unwrap_or(""),
            record.comment_author_email.as_deref().unwrap_or(""),
            record.comment_agent.as_deref().unwrap_or(""),
        ]));
        out.push('\n');
    }
    out
}

/// Write the JSON, CSV, verify-CSV and update-SQL artifacts into `data_dir`.
/// Returns the paths written, in order.
pub fn write_agent_artifacts(data_dir: &Path, recovery: &AgentRecovery) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let artifacts = [
        (
            "comment-agents.json",
            serde_json::to_string_pretty(&recovery.records)
                .context("failed to serialize agent records")?,
        ),
        ("comment-agents.csv", agents_csv(recovery)),
        ("comment-agents-verify.csv", verify_csv(recovery)),
        ("comment-agents-update.sql", update_agent_sql(recovery)),
    ];

    let mut written = Vec::with_capacity(artifacts.len());
    for (name, content) in artifacts {
        let path = data_dir.join(name);
        fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::parse_insert;

    fn comment_tuple(id: i64, author: &str, agent: &str) -> String {
        format!(
            "({id}, 5, '{author}', 'a@example.com', '', '127.0.0.1', \
             '2009-03-01 10:00:00', '2009-03-01 02:00:00', 'hello', 0, '1', \
             '{agent}', '', 0, 0)"
        )
    }

    #[test]
    fn legacy_comment_decodes_positionally() {
        let values = comment_tuple(12, "mi", "Mozilla/5.0");
        let extraction = extract_rows(&values);
        let comment = LegacyComment::from_row(&extraction.rows[0]).expect("decode");
        assert_eq!(comment.id, 12);
        assert_eq!(comment.post_id, Some(5));
        assert_eq!(comment.author.as_deref(), Some("mi"));
        assert_eq!(comment.agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(comment.approved.as_deref(), Some("1"));
        assert_eq!(comment.parent, Some(0));
    }

    #[test]
    fn short_rows_are_rejected_not_fatal() {
        let extraction = extract_rows("(1, 2, 'too short')");
        assert!(LegacyComment::from_row(&extraction.rows[0]).is_none());
    }

    #[test]
    fn recover_agents_counts_and_extracts() {
        let statement = parse_insert(&format!(
            "INSERT INTO `wp_comments` VALUES {}, {}, (7, 'short row');",
            comment_tuple(1, "mi", "Mozilla/5.0 (Windows NT)"),
            comment_tuple(2, "anon", ""),
        ))
        .expect("parse");

        let recovery = recover_agents(&[statement]);
        assert_eq!(recovery.rows_seen, 3);
        assert_eq!(recovery.records.len(), 2);
        assert_eq!(recovery.short_rows, 1);
        assert_eq!(recovery.with_agent(), 1);
        assert_eq!(recovery.browser_agents(), 1);
    }

    #[test]
    fn null_agent_becomes_none() {
        let values =
            "(3, 5, 'mi', NULL, NULL, NULL, NULL, NULL, 'hi', 0, '1', NULL, NULL, 0, 0)";
        let extraction = extract_rows(values);
        let comment = LegacyComment::from_row(&extraction.rows[0]).expect("decode");
        assert!(comment.agent.is_none());
        assert!(comment.author_email.is_none());
    }

    #[test]
    fn update_sql_escapes_quotes_and_skips_empty() {
        let recovery = AgentRecovery {
            records: vec![
                AgentRecord {
                    comment_id: 1,
                    comment_author: None,
                    comment_author_email: None,
                    comment_agent: Some("it's a UA".to_string()),
                },
                AgentRecord {
                    comment_id: 2,
                    comment_author: None,
                    comment_author_email: None,
                    comment_agent: Some(String::new()),
                },
            ],
            rows_seen: 2,
            ..Default::default()
        };
        let sql = update_agent_sql(&recovery);
        assert_eq!(
            sql,
            "UPDATE comments SET user_agent = 'it''s a UA' WHERE legacy_id = 1;\n"
        );
    }

    #[test]
    fn update_sql_keeps_backslashes_literal() {
        let recovery = AgentRecovery {
            records: vec![AgentRecord {
                comment_id: 9,
                comment_author: None,
                comment_author_email: None,
                comment_agent: Some(r"Mozilla\4.0 (compatible; MSIE 6.0)".to_string()),
            }],
            rows_seen: 1,
            ..Default::default()
        };
        let sql = update_agent_sql(&recovery);
        assert_eq!(
            sql,
            "UPDATE comments SET user_agent = 'Mozilla\\4.0 (compatible; MSIE 6.0)' \
             WHERE legacy_id = 9;\n"
        );
    }

    #[test]
    fn artifacts_written_to_data_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let recovery = recover_agents(&[
            parse_insert(&format!(
                "INSERT INTO wp_comments VALUES {};",
                comment_tuple(4, "someone", "Denglu")
            ))
            .expect("parse"),
        ]);
        let written = write_agent_artifacts(temp.path(), &recovery).expect("write");
        assert_eq!(written.len(), 4);
        let csv = fs::read_to_string(&written[1]).expect("read csv");
        assert!(csv.starts_with("comment_id,comment_agent\n"));
        assert!(csv.contains("4,Denglu"));
        let sql = fs::read_to_string(&written[3]).expect("read sql");
        assert!(sql.contains("WHERE legacy_id = 4;"));
    }
}
