use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TABLE_PREFIX: &str = "wp";

/// `commentool.toml`, all sections optional so a bare checkout works.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub migration: MigrationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DatabaseSection {
    /// Path to the SQLite comments database, relative to the project root
    /// unless absolute.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    /// Default SQL dump to read when a command is not given one explicitly.
    pub dump_path: Option<PathBuf>,
    /// Default WXR export file.
    pub wxr_path: Option<PathBuf>,
    /// WordPress table prefix (`wp` for `wp_comments`).
    pub table_prefix: Option<String>,
}

impl ToolConfig {
    pub fn table_prefix(&self) -> &str {
        self.migration
            .table_prefix
            .as_deref()
            .unwrap_or(DEFAULT_TABLE_PREFIX)
    }

    /// Table name the comment inserts live under, e.g. `wp_comments`.
    pub fn comments_table(&self) -> String {
        format!("{}_comments", self.table_prefix())
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if the file
/// doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
