//! The new relational comment store (local SQLite) and the drivers that
//! read, preview, and rewrite comment bodies in it.
//!
//! The original migration drove Cloudflare D1 through an external CLI; here
//! the store is a plain SQLite file opened directly.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::cleanup::{MatchSnippet, search_matches};
use crate::markdown::has_html_tags;
use crate::report::unified_preview;
use crate::wp::AgentRecovery;
use crate::wxr::{ImportedComment, sort_for_insert};

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "comments",
    sql: include_str!("migrations/v001_comments.sql"),
}];

/// Report returned after running migrations.
#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

/// Counters from importing WXR comments.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped_existing: usize,
    pub parents_linked: usize,
    pub parents_missing: usize,
}

/// Counters plus dry-run previews from a content rewrite pass.
#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    pub examined: usize,
    pub changed: usize,
    pub written: usize,
    /// `(comment id, unified diff)` for the changed comments, capped by the
    /// caller's limit.
    pub previews: Vec<(i64, String)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub with_agent: usize,
    pub with_parent: usize,
}

#[derive(Debug, Clone)]
pub struct CommentBody {
    pub id: i64,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: i64,
    pub snippets: Vec<MatchSnippet>,
}

/// Agent write-back counters.
#[derive(Debug, Clone, Default)]
pub struct AgentApply {
    pub updated: usize,
    pub missing_legacy: usize,
}

pub struct CommentStore {
    connection: Connection,
}

impl CommentStore {
    /// Open (creating parent directories and the file as needed).
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        configure(&connection)?;
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().context("failed to open in-memory db")?;
        configure(&connection)?;
        Ok(Self { connection })
    }

    /// Apply pending migrations. Versions are tracked in a
    /// `schema_migrations` table and each migration runs inside a savepoint.
    pub fn migrate(&self) -> Result<MigrateReport> {
        ensure_schema_migrations_table(&self.connection)?;
        let current = current_version(&self.connection)?;
        let mut applied = Vec::new();

        for migration in MIGRATIONS {
            if migration.version <= current {
                continue;
            }
            apply_migration(&self.connection, migration).with_context(|| {
                format!(
                    "failed to apply migration v{:03}_{}",
                    migration.version, migration.name
                )
            })?;
            applied.push(AppliedMigration {
                version: migration.version,
                name: migration.name.to_string(),
            });
        }

        Ok(MigrateReport {
            applied,
            current_version: current_version(&self.connection)?,
        })
    }

    pub fn pending_migrations(&self) -> Result<usize> {
        ensure_schema_migrations_table(&self.connection)?;
        let current = current_version(&self.connection)?;
        Ok(MIGRATIONS.iter().filter(|m| m.version > current).count())
    }

    /// Insert imported comments, parents before children, resolving
    /// `parent_id` through the legacy id mapping. Re-running is safe: rows
    /// whose `legacy_id` already exists are skipped.
    pub fn insert_comments(&mut self, comments: &[ImportedComment]) -> Result<ImportReport> {
        let ordered = sort_for_insert(comments);
        let mut report = ImportReport::default();
        let mut id_by_legacy: HashMap<i64, i64> = HashMap::new();

        let transaction = self
            .connection
            .transaction()
            .context("failed to start import transaction")?;
        {
            let mut insert = transaction
                .prepare(
                    "INSERT OR IGNORE INTO comments (
                        post_slug, author, author_email, author_url, author_ip,
                        content, created_at, status, parent_id, legacy_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .context("failed to prepare comment insert")?;

            for comment in &ordered {
                let parent_id = if comment.legacy_parent_id > 0 {
                    let known = id_by_legacy.get(&comment.legacy_parent_id).copied();
                    let resolved = match known {
                        Some(id) => Some(id),
                        None => id_for_legacy(&transaction, comment.legacy_parent_id)?,
                    };
                    if resolved.is_some() {
                        report.parents_linked += 1;
                    } else {
                        report.parents_missing += 1;
                    }
                    resolved
                } else {
                    None
                };

                let changed = insert
                    .execute(params![
                        comment.post_slug,
                        comment.author,
                        comment.author_email,
                        comment.author_url,
                        comment.author_ip,
                        comment.content,
                        comment.created_at,
                        comment.status,
                        parent_id,
                        comment.legacy_id,
                    ])
                    .with_context(|| {
                        format!("failed to insert comment legacy_id={}", comment.legacy_id)
                    })?;

                if changed == 0 {
                    report.skipped_existing += 1;
                    if let Some(existing) = id_for_legacy(&transaction, comment.legacy_id)? {
                        id_by_legacy.insert(comment.legacy_id, existing);
                    }
                } else {
                    report.inserted += 1;
                    id_by_legacy.insert(comment.legacy_id, transaction.last_insert_rowid());
                }
            }
        }
        transaction
            .commit()
            .context("failed to commit import transaction")?;
        Ok(report)
    }

    pub fn comment_bodies(&self) -> Result<Vec<CommentBody>> {
        let mut statement = self
            .connection
            .prepare("SELECT id, content FROM comments ORDER BY id")
            .context("failed to prepare body query")?;
        let bodies = statement
            .query_map([], |row| {
                Ok(CommentBody {
                    id: row.get(0)?,
                    content: row.get(1)?,
                })
            })
            .context("failed to query comment bodies")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read comment bodies")?;
        Ok(bodies)
    }

    /// Run a rewrite pass over every comment body. Dry-run unless `apply`;
    /// `limit` caps how many changed comments are acted on (and previewed).
    pub fn rewrite<F>(&mut self, pass: F, apply: bool, limit: Option<usize>) -> Result<RewriteReport>
    where
        F: Fn(&str) -> String,
    {
        let bodies = self.comment_bodies()?;
        let mut report = RewriteReport::default();

        let transaction = self
            .connection
            .transaction()
            .context("failed to start rewrite transaction")?;
        for body in &bodies {
            report.examined += 1;
            let updated = pass(&body.content);
            if updated == body.content {
                continue;
            }
            if let Some(limit) = limit {
                if report.changed >= limit {
                    continue;
                }
            }
            report.changed += 1;
            report
                .previews
                .push((body.id, unified_preview(&body.content, &updated)));
            if apply {
                transaction
                    .execute(
                        "UPDATE comments SET content = ?1 WHERE id = ?2",
                        params![updated, body.id],
                    )
                    .with_context(|| format!("failed to update comment {}", body.id))?;
                report.written += 1;
            }
        }
        transaction
            .commit()
            .context("failed to commit rewrite transaction")?;
        Ok(report)
    }

    /// Regex search over bodies with context snippets.
    pub fn search(
        &self,
        pattern: &Regex,
        context: usize,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for body in self.comment_bodies()? {
            let snippets = search_matches(&body.content, pattern, context);
            if snippets.is_empty() {
                continue;
            }
            hits.push(SearchHit {
                id: body.id,
                snippets,
            });
            if limit.is_some_and(|l| hits.len() >= l) {
                break;
            }
        }
        Ok(hits)
    }

    /// Comments that still contain recognizable HTML after the Markdown
    /// conversion passes.
    pub fn unconverted_html(&self) -> Result<Vec<CommentBody>> {
        Ok(self
            .comment_bodies()?
            .into_iter()
            .filter(|body| has_html_tags(&body.content))
            .collect())
    }

    /// Write recovered user agents back by legacy id.
    pub fn apply_agents(&mut self, recovery: &AgentRecovery) -> Result<AgentApply> {
        let mut outcome = AgentApply::default();
        let transaction = self
            .connection
            .transaction()
            .context("failed to start agent transaction")?;
        for record in &recovery.records {
            let Some(agent) = record.comment_agent.as_deref() else {
                continue;
            };
            if agent.is_empty() {
                continue;
            }
            let changed = transaction
                .execute(
                    "UPDATE comments SET user_agent = ?1 WHERE legacy_id = ?2",
                    params![agent, record.comment_id],
                )
                .with_context(|| {
                    format!("failed to update agent for legacy_id={}", record.comment_id)
                })?;
            if changed > 0 {
                outcome.updated += 1;
            } else {
                outcome.missing_legacy += 1;
            }
        }
        transaction
            .commit()
            .context("failed to commit agent transaction")?;
        Ok(outcome)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        stats.total = self.count("SELECT COUNT(*) FROM comments")?;
        stats.with_agent = self.count(
            "SELECT COUNT(*) FROM comments WHERE user_agent IS NOT NULL AND user_agent != ''",
        )?;
        stats.with_parent = self.count("SELECT COUNT(*) FROM comments WHERE parent_id IS NOT NULL")?;

        let mut statement = self
            .connection
            .prepare("SELECT status, COUNT(*) FROM comments GROUP BY status")
            .context("failed to prepare status query")?;
        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("failed to query status counts")?;
        for row in rows {
            let (status, count) = row.context("failed to read status count")?;
            stats.by_status.insert(status, count as usize);
        }
        Ok(stats)
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let value: i64 = self
            .connection
            .query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("count query failed: {sql}"))?;
        Ok(value as usize)
    }
}

fn configure(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(())
}

fn id_for_legacy(connection: &Connection, legacy_id: i64) -> Result<Option<i64>> {
    connection
        .query_row(
            "SELECT id FROM comments WHERE legacy_id = ?1",
            params![legacy_id],
            |row| row.get(0),
        )
        .optional()
        .context("failed to look up legacy id")
}

fn ensure_schema_migrations_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at_unix INTEGER NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")
}

fn current_version(connection: &Connection) -> Result<u32> {
    let version: i64 = connection
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("failed to read current migration version")?;
    u32::try_from(version).context("migration version does not fit into u32")
}

fn apply_migration(connection: &Connection, migration: &Migration) -> Result<()> {
    connection
        .execute_batch("SAVEPOINT migration_apply")
        .context("failed to create savepoint")?;

    let result = (|| -> Result<()> {
        connection
            .execute_batch(migration.sql)
            .with_context(|| format!("SQL execution failed for v{:03}", migration.version))?;

        let now_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock error")?
            .as_secs();

        connection
            .execute(
                "INSERT INTO schema_migrations (version, name, applied_at_unix) VALUES (?1, ?2, ?3)",
                params![
                    i64::from(migration.version),
                    migration.name,
                    i64::try_from(now_unix).context("timestamp does not fit into i64")?,
                ],
            )
            .context("failed to record migration")?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            connection
                .execute_batch("RELEASE SAVEPOINT migration_apply")
                .context("failed to release savepoint")?;
            Ok(())
        }
        Err(err) => {
            let _ = connection.execute_batch("ROLLBACK TO SAVEPOINT migration_apply");
            let _ = connection.execute_batch("RELEASE SAVEPOINT migration_apply");
            Err(err)
        }
    }
}
