//! Dependency manifests: the declared revision of every repository in a fleet.
//!
//! On disk a manifest is a JSON object keyed by repository name:
//!
//! ```json
//! {
//!   "comment": "generated by the nightly build",
//!   "ui-kit": { "sha": "4f1c2e0", "branch": "main" },
//!   "router": { "revision": "9ab77d1" }
//! }
//! ```
//!
//! `"comment"` is metadata and never an entry. Entries accept `sha` or
//! `revision`; they are written back as `sha`. A [`Manifest`] is a value:
//! nothing mutates one in place, updates build a new manifest.

pub mod checkout;
pub mod diff;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::vcs::VersionControl;

pub use checkout::{CheckoutMode, CheckoutTask};
pub use diff::{diff_manifests, extract_issue_urls, ManifestDiff, RepoChange, RepoDiff};

/// Reserved top-level key holding free-form metadata.
pub const COMMENT_KEY: &str = "comment";

/// Declared state of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "sha", alias = "revision")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl ManifestEntry {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            branch: None,
        }
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Reasons this entry cannot be handed to git as `repo`; empty when usable.
    ///
    /// Revisions and branches reach git as bare arguments, so a leading `-`
    /// would be read as an option.
    pub fn problems(&self, repo: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if self.revision.starts_with('-') {
            problems.push(format!("{repo}: revision {:?} starts with '-'", self.revision));
        }
        if let Some(branch) = self.branch.as_deref().filter(|b| b.starts_with('-')) {
            problems.push(format!("{repo}: branch {branch:?} starts with '-'"));
        }
        problems
    }
}

/// Repository name → [`ManifestEntry`], plus an optional comment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Manifest {
    comment: Option<Value>,
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this manifest with `repo` set to `entry`.
    ///
    /// `"comment"` is reserved and cannot name a repository, and the entry
    /// must pass [`ManifestEntry::problems`].
    pub fn with_entry(&self, repo: impl Into<String>, entry: ManifestEntry) -> Result<Self> {
        let repo = repo.into();
        if repo == COMMENT_KEY {
            return Err(FleetError::InvalidManifest {
                problems: vec![format!("\"{COMMENT_KEY}\" is reserved and cannot name a repository")],
            });
        }
        let problems = entry.problems(&repo);
        if !problems.is_empty() {
            return Err(FleetError::InvalidManifest { problems });
        }
        let mut next = self.clone();
        next.entries.insert(repo, entry);
        Ok(next)
    }

    /// A copy of this manifest carrying `comment`.
    pub fn with_comment(&self, comment: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.comment = Some(Value::String(comment.into()));
        next
    }

    pub fn comment(&self) -> Option<&Value> {
        self.comment.as_ref()
    }

    pub fn get(&self, repo: &str) -> Option<&ManifestEntry> {
        self.entries.get(repo)
    }

    pub fn contains(&self, repo: &str) -> bool {
        self.entries.contains_key(repo)
    }

    /// Entries in repository-name order. Never yields the comment.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn repos(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Repository names, leaving out `owner` when given.
    pub fn repos_excluding(&self, owner: Option<&str>) -> Vec<String> {
        self.repos()
            .filter(|repo| Some(*repo) != owner)
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let map: Map<String, Value> = serde_json::from_str(contents)?;
        Manifest::try_from(map)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(event = "manifest.load", path = %path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut contents = self.to_json_string()?;
        contents.push('\n');
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Build a manifest from the current state of each working copy.
    ///
    /// Records `HEAD` and, when not detached, the checked-out branch. Every
    /// repository is inspected; all problems are reported together.
    pub async fn capture(
        vcs: &dyn VersionControl,
        root: &Path,
        repos: &[String],
    ) -> Result<Self> {
        let mut manifest = Manifest::new();
        let mut problems = Vec::new();

        for repo in repos {
            let dir = root.join(repo);
            if !dir.is_dir() {
                problems.push(FleetError::missing_working_copy(repo, dir).to_string());
                continue;
            }
            let revision = match vcs.head_revision(&dir).await {
                Ok(revision) => revision,
                Err(e) => {
                    problems.push(format!("{repo}: {e}"));
                    continue;
                }
            };
            let branch = match vcs.current_branch(&dir).await {
                Ok(branch) => branch,
                Err(e) => {
                    problems.push(format!("{repo}: {e}"));
                    continue;
                }
            };
            let entry = ManifestEntry { revision, branch };
            manifest = manifest.with_entry(repo.as_str(), entry)?;
        }

        if problems.is_empty() {
            Ok(manifest)
        } else {
            Err(FleetError::Snapshot { problems })
        }
    }
}

impl TryFrom<Map<String, Value>> for Manifest {
    type Error = FleetError;

    fn try_from(map: Map<String, Value>) -> Result<Self> {
        let mut manifest = Manifest::new();
        let mut problems = Vec::new();

        for (key, value) in map {
            if key == COMMENT_KEY {
                manifest.comment = Some(value);
                continue;
            }
            match serde_json::from_value::<ManifestEntry>(value) {
                Ok(entry) => {
                    let rejected = entry.problems(&key);
                    if rejected.is_empty() {
                        manifest.entries.insert(key, entry);
                    } else {
                        problems.extend(rejected);
                    }
                }
                Err(e) => problems.push(format!("{key}: {e}")),
            }
        }

        if problems.is_empty() {
            Ok(manifest)
        } else {
            Err(FleetError::InvalidManifest { problems })
        }
    }
}

impl From<Manifest> for Map<String, Value> {
    fn from(manifest: Manifest) -> Self {
        let mut map = Map::new();
        if let Some(comment) = manifest.comment {
            map.insert(COMMENT_KEY.to_string(), comment);
        }
        for (repo, entry) in manifest.entries {
            let mut fields = Map::new();
            fields.insert("sha".to_string(), Value::String(entry.revision));
            if let Some(branch) = entry.branch {
                fields.insert("branch".to_string(), Value::String(branch));
            }
            map.insert(repo, Value::Object(fields));
        }
        map
    }
}
