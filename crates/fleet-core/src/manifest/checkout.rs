//! Make every working copy match a [`Manifest`].
//!
//! Validation is fail-fast: a malformed manifest is rejected before any
//! repository is touched. Execution is fail-together: [`CheckoutTask`] runs in
//! the worker pool and each repository's failure becomes its own
//! [`Outcome::Failure`], so every repository is attempted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{FleetError, Result};
use crate::manifest::{Manifest, ManifestEntry};
use crate::pool::{Outcome, RepoTask};
use crate::vcs::{CheckoutTarget, VersionControl};

/// What each working copy is moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    /// Detached checkout of the declared revision.
    #[default]
    Revision,
    /// The entry's branch, reset to the declared revision. Needs a branch on every entry.
    Branch,
    /// The shared trunk branch, ignoring declared revisions.
    Trunk,
}

/// Check every entry against `mode`, collecting all problems.
pub fn validate(manifest: &Manifest, mode: CheckoutMode) -> Result<()> {
    let mut problems = Vec::new();
    for (repo, entry) in manifest.iter() {
        if entry.revision.trim().is_empty() {
            problems.push(format!("{repo}: empty revision"));
        }
        problems.extend(entry.problems(repo));
        if mode == CheckoutMode::Branch
            && entry.branch.as_deref().map_or(true, |b| b.trim().is_empty())
        {
            problems.push(format!("{repo}: revision {} has no branch", entry.revision));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(FleetError::InvalidManifest { problems })
    }
}

/// Pool task checking out one repository per call.
pub struct CheckoutTask {
    manifest: Manifest,
    mode: CheckoutMode,
    root: PathBuf,
    trunk_branch: String,
    vcs: Arc<dyn VersionControl>,
}

impl CheckoutTask {
    /// Fails with [`FleetError::InvalidManifest`] if the manifest does not
    /// satisfy `mode`, and with [`FleetError::Config`] if the trunk branch
    /// would be read by git as an option.
    pub fn new(
        manifest: Manifest,
        mode: CheckoutMode,
        root: impl Into<PathBuf>,
        trunk_branch: impl Into<String>,
        vcs: Arc<dyn VersionControl>,
    ) -> Result<Self> {
        validate(&manifest, mode)?;
        let trunk_branch = trunk_branch.into();
        if trunk_branch.starts_with('-') {
            return Err(FleetError::Config(format!(
                "trunk branch {trunk_branch:?} starts with '-'"
            )));
        }
        Ok(Self {
            manifest,
            mode,
            root: root.into(),
            trunk_branch,
            vcs,
        })
    }

    /// Repositories to check out: every entry except the owning repository.
    pub fn repos(&self, owner: Option<&str>) -> Vec<String> {
        self.manifest.repos_excluding(owner)
    }

    pub fn target_for(&self, entry: &ManifestEntry) -> CheckoutTarget {
        match self.mode {
            CheckoutMode::Revision => CheckoutTarget::Revision(entry.revision.clone()),
            CheckoutMode::Branch => CheckoutTarget::Branch {
                branch: entry.branch.clone().unwrap_or_default(),
                revision: entry.revision.clone(),
            },
            CheckoutMode::Trunk => CheckoutTarget::Trunk(self.trunk_branch.clone()),
        }
    }

    /// Whether `dir` already satisfies `target`. Inspection errors count as "no".
    async fn already_at(&self, dir: &Path, target: &CheckoutTarget) -> bool {
        let head = self.vcs.head_revision(dir).await.ok();
        let branch = self.vcs.current_branch(dir).await.ok().flatten();
        match target {
            CheckoutTarget::Revision(rev) => {
                let wanted = self.vcs.resolve_revision(dir, rev).await.ok();
                head.is_some() && head == wanted
            }
            CheckoutTarget::Branch {
                branch: wanted_branch,
                revision,
            } => {
                let wanted = self.vcs.resolve_revision(dir, revision).await.ok();
                branch.as_deref() == Some(wanted_branch.as_str()) && head.is_some() && head == wanted
            }
            CheckoutTarget::Trunk(trunk) => branch.as_deref() == Some(trunk.as_str()),
        }
    }
}

#[async_trait]
impl RepoTask for CheckoutTask {
    async fn run(&self, repo: &str) -> Outcome {
        let Some(entry) = self.manifest.get(repo) else {
            return Outcome::failure(format!("{repo} is not listed in the manifest"));
        };

        let dir = self.root.join(repo);
        if !dir.is_dir() {
            warn!(event = "checkout.missing", repo = %repo, dir = %dir.display());
            return Outcome::failure(FleetError::missing_working_copy(repo, dir).to_string());
        }

        let target = self.target_for(entry);
        if self.already_at(&dir, &target).await {
            return Outcome::skipped(format!("already at {}", target.describe()));
        }

        match self.vcs.checkout(&dir, &target).await {
            Ok(()) => {
                info!(event = "checkout.done", repo = %repo, target = %target.describe());
                Outcome::Success
            }
            Err(e) => {
                error!(event = "checkout.failed", repo = %repo, target = %target.describe(), error = %e);
                Outcome::failure(format!("checkout of {} failed: {e}", target.describe()))
            }
        }
    }
}
