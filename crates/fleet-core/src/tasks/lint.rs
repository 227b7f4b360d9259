//! Lint every repository, skipping ones already linted at their current HEAD.
//!
//! The cache is one JSON file per repository under the cache directory, so
//! workers never contend for it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{FleetError, Result};
use crate::exec::{CommandRunner, CommandSpec};
use crate::pool::{Outcome, RepoTask};
use crate::tasks::command_outcome;
use crate::vcs::VersionControl;

/// Last successful lint of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintCacheRecord {
    pub revision: String,
    pub linted_at: DateTime<Utc>,
}

pub struct LintTask {
    root: PathBuf,
    command: CommandSpec,
    cache_dir: PathBuf,
    vcs: Arc<dyn VersionControl>,
}

impl LintTask {
    pub fn new(
        root: impl Into<PathBuf>,
        command: CommandSpec,
        cache_dir: impl Into<PathBuf>,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        Self {
            root: root.into(),
            command,
            cache_dir: cache_dir.into(),
            vcs,
        }
    }

    pub fn cache_path(&self, repo: &str) -> PathBuf {
        self.cache_dir.join(format!("{repo}.json"))
    }

    /// Unreadable or corrupt cache files read as "never linted".
    pub fn cached(&self, repo: &str) -> Option<LintCacheRecord> {
        let path = self.cache_path(repo);
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(event = "lint.cache_corrupt", repo = %repo, path = %path.display(), error = %e);
                None
            }
        }
    }

    fn record(&self, repo: &str, revision: &str) -> Result<PathBuf> {
        let path = self.cache_path(repo);
        std::fs::create_dir_all(&self.cache_dir)?;
        let record = LintCacheRecord {
            revision: revision.to_string(),
            linted_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        Ok(path)
    }
}

#[async_trait]
impl RepoTask for LintTask {
    async fn run(&self, repo: &str) -> Outcome {
        let dir = self.root.join(repo);
        if !dir.is_dir() {
            warn!(event = "lint.missing", repo = %repo, dir = %dir.display());
            return Outcome::failure(FleetError::missing_working_copy(repo, dir).to_string());
        }

        let revision = match self.vcs.head_revision(&dir).await {
            Ok(revision) => revision,
            Err(e) => {
                error!(event = "lint.head_failed", repo = %repo, error = %e);
                return Outcome::failure(e.to_string());
            }
        };

        if self.cached(repo).is_some_and(|r| r.revision == revision) {
            return Outcome::skipped(format!("already linted at {revision}"));
        }

        let result = match CommandRunner::execute(&self.command, &dir).await {
            Ok(result) => result,
            Err(e) => {
                error!(event = "lint.command_failed", repo = %repo, command = %self.command.display(), error = %e);
                return Outcome::failure(e.to_string());
            }
        };

        let outcome = command_outcome(&self.command.name, &result);
        if outcome.is_failure() {
            info!(event = "lint.failed", repo = %repo, exit_code = result.exit_code);
            return outcome;
        }

        match self.record(repo, &revision) {
            Ok(path) => {
                debug!(event = "lint.cached", repo = %repo, path = %path.display());
                outcome
            }
            Err(e) => {
                let path = self.cache_path(repo);
                error!(event = "lint.cache_write_failed", repo = %repo, path = %path.display(), error = %e);
                Outcome::failure(format!("could not record lint at {}: {e}", path.display()))
            }
        }
    }
}
