//! Resolution of the paths every command needs, with explicit provenance.
//! Nothing in the core reads ambient environment state on its own; the CLI
//! gathers flags and environment once and hands the result down.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{ToolConfig, load_config};

pub const CONFIG_FILENAME: &str = "commentool.toml";
pub const STATE_DIR_NAME: &str = ".commentool";
pub const DB_FILENAME: &str = "comments.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub db: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub config: ToolConfig,
    pub root_source: ValueSource,
    pub db_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\ndata_dir={}\ndb_path={} ({})\nconfig_path={}\ncomments_table={}",
            display(&self.project_root),
            self.root_source.as_str(),
            display(&self.data_dir),
            display(&self.db_path),
            self.db_source.as_str(),
            display(&self.config_path),
            self.config.comments_table(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
}

/// Resolve all paths: flags beat environment beats config beats defaults.
pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    let (project_root, root_source) = match &overrides.project_root {
        Some(root) => (root.clone(), ValueSource::Flag),
        None => match env_path("COMMENTOOL_ROOT") {
            Some(root) => (root, ValueSource::Env),
            None => (context.cwd.clone(), ValueSource::Default),
        },
    };
    let project_root = absolutize(&context.cwd, &project_root);

    let config_path = project_root.join(CONFIG_FILENAME);
    let config = load_config(&config_path)?;

    let data_dir = match &overrides.data_dir {
        Some(dir) => absolutize(&project_root, dir),
        None => match env_path("COMMENTOOL_DATA_DIR") {
            Some(dir) => absolutize(&project_root, &dir),
            None => project_root.join(STATE_DIR_NAME).join("data"),
        },
    };

    let (db_path, db_source) = match &overrides.db {
        Some(db) => (absolutize(&project_root, db), ValueSource::Flag),
        None => match env_path("COMMENTOOL_DB") {
            Some(db) => (absolutize(&project_root, &db), ValueSource::Env),
            None => match &config.database.path {
                Some(db) => (absolutize(&project_root, db), ValueSource::Config),
                None => (data_dir.join(DB_FILENAME), ValueSource::Default),
            },
        },
    };

    Ok(ResolvedPaths {
        project_root,
        data_dir,
        db_path,
        config_path,
        config,
        root_source,
        db_source,
    })
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };
    Ok(RuntimeStatus {
        project_root_exists: paths.project_root.exists(),
        data_dir_exists: paths.data_dir.exists(),
        db_exists,
        db_size_bytes,
        config_exists: paths.config_path.exists(),
    })
}

fn env_path(name: &str) -> Option<PathBuf> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context(root: &Path) -> ResolutionContext {
        ResolutionContext {
            cwd: root.to_path_buf(),
        }
    }

    #[test]
    fn defaults_hang_off_the_project_root() {
        let temp = tempdir().expect("tempdir");
        let paths =
            resolve_paths(&context(temp.path()), &PathOverrides::default()).expect("resolve");
        assert_eq!(paths.project_root, temp.path());
        assert_eq!(paths.root_source, ValueSource::Default);
        assert_eq!(paths.db_source, ValueSource::Default);
        assert_eq!(
            paths.db_path,
            temp.path().join(".commentool/data/comments.db")
        );
    }

    #[test]
    fn flag_overrides_win() {
        let temp = tempdir().expect("tempdir");
        let overrides = PathOverrides {
            project_root: None,
            data_dir: Some(PathBuf::from("out")),
            db: Some(PathBuf::from("custom.db")),
        };
        let paths = resolve_paths(&context(temp.path()), &overrides).expect("resolve");
        assert_eq!(paths.data_dir, temp.path().join("out"));
        assert_eq!(paths.db_path, temp.path().join("custom.db"));
        assert_eq!(paths.db_source, ValueSource::Flag);
    }

    #[test]
    fn config_supplies_db_path() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(
            temp.path().join(CONFIG_FILENAME),
            "[database]\npath = \"data/blog.db\"\n",
        )
        .expect("write config");
        let paths =
            resolve_paths(&context(temp.path()), &PathOverrides::default()).expect("resolve");
        assert_eq!(paths.db_path, temp.path().join("data/blog.db"));
        assert_eq!(paths.db_source, ValueSource::Config);
    }

    #[test]
    fn missing_runtime_is_reported_not_fatal() {
        let temp = tempdir().expect("tempdir");
        let paths =
            resolve_paths(&context(temp.path()), &PathOverrides::default()).expect("resolve");
        let status = inspect_runtime(&paths).expect("inspect");
        assert!(status.project_root_exists);
        assert!(!status.db_exists);
        assert!(status.db_size_bytes.is_none());
        assert!(!status.config_exists);
    }
}
