//! Fast-forward every repository and refresh its dependencies.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::FleetError;
use crate::exec::{CommandRunner, CommandSpec};
use crate::pool::{Outcome, RepoTask};
use crate::tasks::command_outcome;
use crate::vcs::VersionControl;

/// `git pull --ff-only`, then the install command when one is configured.
pub struct SyncTask {
    root: PathBuf,
    install: Option<CommandSpec>,
    vcs: Arc<dyn VersionControl>,
}

impl SyncTask {
    pub fn new(
        root: impl Into<PathBuf>,
        install: Option<CommandSpec>,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        Self {
            root: root.into(),
            install,
            vcs,
        }
    }
}

#[async_trait]
impl RepoTask for SyncTask {
    async fn run(&self, repo: &str) -> Outcome {
        let dir = self.root.join(repo);
        if !dir.is_dir() {
            warn!(event = "sync.missing", repo = %repo, dir = %dir.display());
            return Outcome::failure(FleetError::missing_working_copy(repo, dir).to_string());
        }

        if let Err(e) = self.vcs.pull(&dir).await {
            error!(event = "sync.pull_failed", repo = %repo, error = %e);
            return Outcome::failure(format!("pull failed: {e}"));
        }

        let Some(install) = &self.install else {
            info!(event = "sync.pulled", repo = %repo);
            return Outcome::Success;
        };

        match CommandRunner::execute(install, &dir).await {
            Ok(result) => {
                let outcome = command_outcome(&install.name, &result);
                info!(event = "sync.installed", repo = %repo, exit_code = result.exit_code, duration_ms = result.duration_ms);
                outcome
            }
            Err(e) => {
                error!(event = "sync.install_failed", repo = %repo, command = %install.display(), error = %e);
                Outcome::failure(e.to_string())
            }
        }
    }
}
