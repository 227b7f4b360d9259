//! Error taxonomy for fleet orchestration.
//!
//! Only input-validation, consistency and infrastructure-setup problems are
//! errors. A repository that fails its work function is not an error: it is
//! recorded as a [`crate::Outcome::Failure`] and surfaced in the report.

use std::path::PathBuf;

use thiserror::Error;

use crate::pool::RepoOutcome;

/// Errors produced by the fleet orchestration layer.
#[derive(Debug, Error)]
pub enum FleetError {
    /// A fleet-wide operation was asked to run over zero repositories.
    #[error("no repositories selected: a fleet operation over zero repositories is refused")]
    EmptyFleet,

    /// One or more manifest entries are malformed.
    #[error("invalid manifest: {}", problems.join("; "))]
    InvalidManifest { problems: Vec<String> },

    /// A manifest could not be captured from the working copies.
    #[error("snapshot failed: {}", problems.join("; "))]
    Snapshot { problems: Vec<String> },

    /// The orchestrator lost, duplicated or invented an outcome.
    #[error("internal consistency failure: {0}")]
    Consistency(String),

    /// A work function panicked and took its worker down with it.
    ///
    /// `completed` holds the outcomes the other workers gathered before the
    /// run was abandoned.
    #[error("worker aborted while processing {repo}: {message}")]
    WorkerAborted {
        repo: String,
        message: String,
        completed: Vec<RepoOutcome>,
    },

    /// A git invocation failed.
    #[error("`{command}` failed in {}: {detail}", dir.display())]
    Git {
        command: String,
        dir: PathBuf,
        detail: String,
    },

    /// An external command could not be run.
    #[error("command {name} could not be run: {detail}")]
    Command { name: String, detail: String },

    /// A repository working copy is not where the fleet layout expects it.
    #[error("{repo}: working copy not found at {}", path.display())]
    MissingWorkingCopy { repo: String, path: PathBuf },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FleetError {
    pub fn missing_working_copy(repo: &str, path: impl Into<PathBuf>) -> Self {
        FleetError::MissingWorkingCopy {
            repo: repo.to_string(),
            path: path.into(),
        }
    }
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
