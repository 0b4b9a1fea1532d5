use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::db::DEFAULT_DB_FILE_NAME;

pub const DEFAULT_LOG_FILTER: &str = "coursed=info";

/// Sidecar settings. Every field may be omitted from the TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace opened at start-up, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub db_file_name: String,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            db_file_name: DEFAULT_DB_FILE_NAME.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(raw)?;
        if cfg.db_file_name.trim().is_empty() {
            anyhow::bail!("db_file_name must not be empty");
        }
        Ok(cfg)
    }

    /// Command-line values win over the file.
    pub fn with_overrides(mut self, workspace: Option<PathBuf>, log_filter: Option<String>) -> Self {
        if workspace.is_some() {
            self.workspace = workspace;
        }
        if let Some(f) = log_filter {
            self.log_filter = f;
        }
        self
    }
}
