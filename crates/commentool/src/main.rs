use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use commentool_core::cleanup::{
    flatten_mention_links, literal_replace, prefix_image_paths, regex_replace, replace_nbsp,
    replace_smilies,
};
use commentool_core::dump::{analyze_dump, head_of_dump, scan_dump};
use commentool_core::markdown::html_to_markdown;
use commentool_core::report::truncate_for_display;
use commentool_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, inspect_runtime, resolve_paths,
};
use commentool_core::store::{CommentStore, RewriteReport};
use commentool_core::wp::{recover_agents, write_agent_artifacts};
use commentool_core::wxr::load_wxr;

#[derive(Debug, Parser)]
#[command(
    name = "commentool",
    version,
    about = "One-shot WordPress comment migration and cleanup utilities"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Comments database file")]
    db: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    db: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            db: cli.db.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Db(DbArgs),
    Sql(SqlArgs),
    Agents(AgentsArgs),
    Import(ImportArgs),
    Comments(CommentsArgs),
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct SqlArgs {
    #[command(subcommand)]
    command: SqlSubcommand,
}

#[derive(Debug, Subcommand)]
enum SqlSubcommand {
    #[command(about = "Inventory the INSERT statements in a dump")]
    Analyze {
        dump: Option<PathBuf>,
        #[arg(long, help = "Emit the report as JSON")]
        json: bool,
    },
    #[command(about = "Print the head of a dump file")]
    View {
        dump: Option<PathBuf>,
        #[arg(long, default_value_t = 2000)]
        bytes: usize,
    },
}

#[derive(Debug, Args)]
struct AgentsArgs {
    #[command(subcommand)]
    command: AgentsSubcommand,
}

#[derive(Debug, Subcommand)]
enum AgentsSubcommand {
    #[command(about = "Recover comment_agent values from a raw SQL dump")]
    Extract {
        dump: Option<PathBuf>,
        #[arg(long, value_name = "NAME", help = "Comments table name filter")]
        table: Option<String>,
        #[arg(long, help = "Also write recovered agents into the database")]
        apply: bool,
    },
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(subcommand)]
    command: ImportSubcommand,
}

#[derive(Debug, Subcommand)]
enum ImportSubcommand {
    #[command(about = "Import comments from a WordPress WXR export")]
    Wxr {
        file: Option<PathBuf>,
        #[arg(long, help = "Write to the database (default is dry-run)")]
        apply: bool,
        #[arg(long, value_name = "N", help = "Preview at most N comments")]
        limit: Option<usize>,
    },
}

#[derive(Debug, Args)]
struct CommentsArgs {
    #[command(subcommand)]
    command: CommentsSubcommand,
}

#[derive(Debug, Args)]
struct PassArgs {
    #[arg(long, help = "Write changes back (default is dry-run preview)")]
    apply: bool,
    #[arg(long, value_name = "N", help = "Rewrite at most N changed comments")]
    limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum CommentsSubcommand {
    #[command(name = "convert-html", about = "Convert legacy HTML bodies to Markdown")]
    ConvertHtml(PassArgs),
    #[command(about = "Replace smiley images with emoji")]
    Emoji(PassArgs),
    #[command(about = "Replace non-breaking spaces with plain spaces")]
    Nbsp(PassArgs),
    #[command(about = "Flatten dead [@name](#comment-N) mention links")]
    Links(PassArgs),
    #[command(name = "image-paths", about = "Prefix root-relative image paths with /assets")]
    ImagePaths(PassArgs),
    #[command(about = "Literal or regex replacement over comment bodies")]
    Replace {
        pattern: String,
        replacement: String,
        #[arg(long, help = "Treat the pattern as a regular expression")]
        regex: bool,
        #[command(flatten)]
        pass: PassArgs,
    },
    #[command(about = "Regex search over comment bodies")]
    Search {
        pattern: String,
        #[arg(long, default_value_t = 40, value_name = "CHARS")]
        context: usize,
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },
    #[command(about = "List comments that still contain HTML")]
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
        },
        Some(Commands::Sql(SqlArgs { command })) => match command {
            SqlSubcommand::Analyze { dump, json } => run_sql_analyze(&runtime, dump, json),
            SqlSubcommand::View { dump, bytes } => run_sql_view(&runtime, dump, bytes),
        },
        Some(Commands::Agents(AgentsArgs { command })) => match command {
            AgentsSubcommand::Extract { dump, table, apply } => {
                run_agents_extract(&runtime, dump, table, apply)
            }
        },
        Some(Commands::Import(ImportArgs { command })) => match command {
            ImportSubcommand::Wxr { file, apply, limit } => {
                run_import_wxr(&runtime, file, apply, limit)
            }
        },
        Some(Commands::Comments(CommentsArgs { command })) => run_comments(&runtime, command),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let store = CommentStore::open(&paths.db_path)?;
    let report = store.migrate()?;

    println!("db migrate");
    println!("db_path: {}", display_path(&paths.db_path));
    println!("applied: {}", report.applied.len());
    for migration in &report.applied {
        println!("applied.migration: v{:03}_{}", migration.version, migration.name);
    }
    println!("current_version: {}", report.current_version);
    finish(runtime, &paths)
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("db_path: {}", display_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));

    if status.db_exists {
        let store = CommentStore::open(&paths.db_path)?;
        if store.pending_migrations()? > 0 {
            println!("comments: <schema not migrated> (run `commentool db migrate`)");
        } else {
            let stats = store.stats()?;
            println!("comments.total: {}", stats.total);
            for (db_status, count) in &stats.by_status {
                println!("comments.status.{db_status}: {count}");
            }
            println!("comments.with_agent: {}", stats.with_agent);
            println!("comments.with_parent: {}", stats.with_parent);
        }
    }
    finish(runtime, &paths)
}

fn run_sql_analyze(runtime: &RuntimeOptions, dump: Option<PathBuf>, json: bool) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let dump = resolve_dump_path(&paths, dump)?;
    let report = analyze_dump(&dump)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("sql analyze");
    println!("dump: {}", display_path(&dump));
    println!("size_bytes: {}", report.size_bytes);
    println!("tables: {}", report.tables.len());
    for table in &report.tables {
        println!("table.{}: {} rows ({} statements)", table.table, table.rows, table.statements);
        if !table.columns.is_empty() {
            println!("table.{}.columns: {}", table.table, table.columns.join(", "));
        }
        if table.skipped > 0 {
            println!("table.{}.skipped_tuples: {}", table.table, table.skipped);
        }
    }
    finish(runtime, &paths)
}

fn run_sql_view(runtime: &RuntimeOptions, dump: Option<PathBuf>, bytes: usize) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let dump = resolve_dump_path(&paths, dump)?;
    let head = head_of_dump(&dump, bytes)?;

    println!("sql view");
    println!("dump: {}", display_path(&dump));
    println!("bytes: {bytes}");
    println!("--");
    println!("{head}");
    finish(runtime, &paths)
}

fn run_agents_extract(
    runtime: &RuntimeOptions,
    dump: Option<PathBuf>,
    table: Option<String>,
    apply: bool,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let dump = resolve_dump_path(&paths, dump)?;
    let table = table.unwrap_or_else(|| paths.config.comments_table());

    let statements = scan_dump(&dump, Some(&table))?;
    if statements.is_empty() {
        bail!(
            "no INSERT statements for table `{table}` found in {}",
            dump.display()
        );
    }
    let recovery = recover_agents(&statements);

    println!("agents extract");
    println!("dump: {}", display_path(&dump));
    println!("table_filter: {table}");
    println!("statements: {}", statements.len());
    println!("rows_seen: {}", recovery.rows_seen);
    println!("records: {}", recovery.records.len());
    println!("with_agent: {}", recovery.with_agent());
    println!("browser_agents: {}", recovery.browser_agents());
    println!("short_rows: {}", recovery.short_rows);
    println!("skipped_tuples: {}", recovery.skipped_tuples);

    let written = write_agent_artifacts(&paths.data_dir, &recovery)?;
    for path in &written {
        println!("wrote: {}", display_path(path));
    }

    if apply {
        let mut store = CommentStore::open(&paths.db_path)?;
        ensure_migrated(&store)?;
        let outcome = store.apply_agents(&recovery)?;
        println!("db.updated: {}", outcome.updated);
        println!("db.missing_legacy: {}", outcome.missing_legacy);
    } else {
        println!("mode: dry-run (pass --apply to update the database)");
    }
    finish(runtime, &paths)
}

fn run_import_wxr(
    runtime: &RuntimeOptions,
    file: Option<PathBuf>,
    apply: bool,
    limit: Option<usize>,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let file = match file {
        Some(file) => file,
        None => match &paths.config.migration.wxr_path {
            Some(configured) => join_root(&paths, configured),
            None => bail!("no WXR file given (pass <FILE> or set migration.wxr_path)"),
        },
    };

    let import = load_wxr(&file)?;
    println!("import wxr");
    println!("file: {}", display_path(&file));
    println!("items_seen: {}", import.items_seen);
    println!("skipped_items: {}", import.skipped_items);
    println!("missing_slug: {}", import.missing_slug);
    println!("skipped_non_comments: {}", import.skipped_non_comments);
    println!("comments: {}", import.comments.len());

    let preview_count = limit.unwrap_or(10).min(import.comments.len());
    for comment in import.comments.iter().take(preview_count) {
        println!(
            "preview: legacy_id={} post={} author={} content={}",
            comment.legacy_id,
            comment.post_slug,
            comment.author,
            truncate_for_display(&comment.content, 60)
        );
    }

    if apply {
        let mut store = CommentStore::open(&paths.db_path)?;
        ensure_migrated(&store)?;
        let report = store.insert_comments(&import.comments)?;
        println!("inserted: {}", report.inserted);
        println!("skipped_existing: {}", report.skipped_existing);
        println!("parents_linked: {}", report.parents_linked);
        println!("parents_missing: {}", report.parents_missing);
    } else {
        println!("mode: dry-run (pass --apply to write to the database)");
    }
    finish(runtime, &paths)
}

fn run_comments(runtime: &RuntimeOptions, command: CommentsSubcommand) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let mut store = CommentStore::open(&paths.db_path)?;
    ensure_migrated(&store)?;

    match command {
        CommentsSubcommand::ConvertHtml(pass) => {
            run_pass(runtime, &paths, &mut store, "convert-html", pass, |c| {
                html_to_markdown(c)
            })
        }
        CommentsSubcommand::Emoji(pass) => {
            run_pass(runtime, &paths, &mut store, "emoji", pass, |c| {
                replace_smilies(c)
            })
        }
        CommentsSubcommand::Nbsp(pass) => {
            run_pass(runtime, &paths, &mut store, "nbsp", pass, |c| replace_nbsp(c))
        }
        CommentsSubcommand::Links(pass) => {
            run_pass(runtime, &paths, &mut store, "links", pass, |c| {
                flatten_mention_links(c)
            })
        }
        CommentsSubcommand::ImagePaths(pass) => {
            run_pass(runtime, &paths, &mut store, "image-paths", pass, |c| {
                prefix_image_paths(c)
            })
        }
        CommentsSubcommand::Replace {
            pattern,
            replacement,
            regex,
            pass,
        } => {
            if regex {
                let compiled = regex::Regex::new(&pattern)
                    .with_context(|| format!("invalid regex: {pattern}"))?;
                run_pass(runtime, &paths, &mut store, "replace (regex)", pass, move |c| {
                    regex_replace(c, &compiled, &replacement).0
                })
            } else {
                run_pass(runtime, &paths, &mut store, "replace", pass, move |c| {
                    literal_replace(c, &pattern, &replacement).0
                })
            }
        }
        CommentsSubcommand::Search {
            pattern,
            context,
            limit,
        } => {
            let compiled = regex::Regex::new(&pattern)
                .with_context(|| format!("invalid regex: {pattern}"))?;
            let hits = store.search(&compiled, context, limit)?;
            println!("comments search");
            println!("pattern: {pattern}");
            println!("hits: {}", hits.len());
            for hit in &hits {
                for snippet in &hit.snippets {
                    println!(
                        "hit: id={} ...{}...",
                        hit.id,
                        truncate_for_display(&snippet.snippet, 120)
                    );
                }
            }
            finish(runtime, &paths)
        }
        CommentsSubcommand::Check => {
            let unconverted = store.unconverted_html()?;
            println!("comments check");
            println!("unconverted: {}", unconverted.len());
            for body in &unconverted {
                println!(
                    "unconverted: id={} content={}",
                    body.id,
                    truncate_for_display(&body.content, 100)
                );
            }
            finish(runtime, &paths)
        }
    }
}

fn run_pass<F>(
    runtime: &RuntimeOptions,
    paths: &ResolvedPaths,
    store: &mut CommentStore,
    name: &str,
    pass_args: PassArgs,
    pass: F,
) -> Result<()>
where
    F: Fn(&str) -> String,
{
    let report = store.rewrite(pass, pass_args.apply, pass_args.limit)?;
    print_rewrite_report(name, pass_args.apply, &report);
    finish(runtime, paths)
}

fn print_rewrite_report(name: &str, apply: bool, report: &RewriteReport) {
    println!("comments {name}");
    println!(
        "mode: {}",
        if apply { "apply" } else { "dry-run (pass --apply to write)" }
    );
    println!("examined: {}", report.examined);
    println!("changed: {}", report.changed);
    println!("written: {}", report.written);
    for (id, preview) in &report.previews {
        println!("comment id={id}:");
        print!("{preview}");
    }
}

fn ensure_migrated(store: &CommentStore) -> Result<()> {
    if store.pending_migrations()? > 0 {
        bail!("database schema is not up to date; run `commentool db migrate` first");
    }
    Ok(())
}

fn resolve_dump_path(paths: &ResolvedPaths, dump: Option<PathBuf>) -> Result<PathBuf> {
    match dump {
        Some(dump) => Ok(dump),
        None => match &paths.config.migration.dump_path {
            Some(configured) => Ok(join_root(paths, configured)),
            None => bail!("no dump file given (pass <DUMP> or set migration.dump_path)"),
        },
    }
}

fn join_root(paths: &ResolvedPaths, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        relative.to_path_buf()
    } else {
        paths.project_root.join(relative)
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        db: runtime.db.clone(),
    };
    resolve_paths(&context, &overrides)
}

fn finish(runtime: &RuntimeOptions, paths: &ResolvedPaths) -> Result<()> {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
