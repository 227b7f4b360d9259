//! Fleet configuration loaded from `fleet.toml`.
//!
//! Every field has a default, so a missing file means "all defaults".
//! `FLEET_ROOT` and `FLEET_WORKERS` override the file; CLI flags override both.
//!
//! ```toml
//! root = "/src/product"
//! workers = 8
//! trunk_branch = "main"
//! owner = "shell"
//! issue_url_prefix = "https://tracker.example.com/browse/"
//! repos = ["shell", "ui-kit", "router"]
//! git = "/usr/local/bin/git"
//!
//! [lint]
//! command = ["npm", "run", "lint"]
//! timeout_secs = 600
//!
//! [sync]
//! install = ["npm", "install"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::exec::CommandSpec;
use crate::pool::DEFAULT_WORKERS;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "fleet.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Directory holding one working copy per repository, named after it.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Concurrent workers per fleet operation.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Shared trunk branch used by trunk checkouts.
    #[serde(default = "default_trunk_branch")]
    pub trunk_branch: String,

    /// Repository running the tooling; never checked out from under itself.
    #[serde(default)]
    pub owner: Option<String>,

    /// Issue-tracker URL prefix scanned for in commit messages.
    #[serde(default = "default_issue_url_prefix")]
    pub issue_url_prefix: String,

    /// Full fleet listing.
    #[serde(default)]
    pub repos: Vec<String>,

    /// git executable used for every repository operation.
    #[serde(default = "default_git")]
    pub git: String,

    #[serde(default)]
    pub lint: LintConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintConfig {
    #[serde(default = "default_lint_command")]
    pub command: Vec<String>,

    #[serde(default)]
    pub timeout_secs: u64,

    /// Defaults to `<root>/.fleet-cache/lint`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Run after a successful pull. Empty skips the install step.
    #[serde(default = "default_install_command")]
    pub install: Vec<String>,

    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_trunk_branch() -> String {
    "main".to_string()
}

fn default_issue_url_prefix() -> String {
    "https://github.com/".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

fn default_lint_command() -> Vec<String> {
    vec!["npm".to_string(), "run".to_string(), "lint".to_string()]
}

fn default_install_command() -> Vec<String> {
    vec!["npm".to_string(), "install".to_string()]
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            command: default_lint_command(),
            timeout_secs: 0,
            cache_dir: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            install: default_install_command(),
            timeout_secs: 0,
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            workers: default_workers(),
            trunk_branch: default_trunk_branch(),
            owner: None,
            issue_url_prefix: default_issue_url_prefix(),
            repos: Vec::new(),
            git: default_git(),
            lint: LintConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Load from `path`, or from `fleet.toml` in the working directory.
    ///
    /// An explicit `path` that does not exist is an error; a missing default
    /// file falls back to defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    FleetError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&contents)?
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_toml_str(&std::fs::read_to_string(default_path)?)?
                } else {
                    debug!(event = "config.defaults", "no {DEFAULT_CONFIG_FILE}, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `FLEET_ROOT` / `FLEET_WORKERS` as returned by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup("FLEET_ROOT").filter(|v| !v.is_empty()) {
            self.root = PathBuf::from(root);
        }
        if let Some(workers) = lookup("FLEET_WORKERS").filter(|v| !v.is_empty()) {
            self.workers = workers.parse().map_err(|_| {
                FleetError::Config(format!("FLEET_WORKERS must be a number, got {workers:?}"))
            })?;
        }
        Ok(())
    }

    /// Working copy of `repo`.
    pub fn repo_dir(&self, repo: &str) -> PathBuf {
        self.root.join(repo)
    }

    pub fn lint_cache_dir(&self) -> PathBuf {
        self.lint
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.root.join(".fleet-cache").join("lint"))
    }

    pub fn lint_command(&self) -> CommandSpec {
        CommandSpec::new("lint", self.lint.command.clone(), self.lint.timeout_secs)
    }

    /// `None` when no install step is configured.
    pub fn install_command(&self) -> Option<CommandSpec> {
        if self.sync.install.is_empty() {
            None
        } else {
            Some(CommandSpec::new(
                "install",
                self.sync.install.clone(),
                self.sync.timeout_secs,
            ))
        }
    }
}
