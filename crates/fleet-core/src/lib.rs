//! Fleet Core Library
//!
//! Bounded-concurrency task orchestration over a fleet of git repositories,
//! plus the dependency manifest that pins each repository to a revision.

pub mod config;
pub mod error;
pub mod exec;
pub mod manifest;
pub mod pool;
pub mod runner;
pub mod tasks;
pub mod telemetry;
pub mod timing;
pub mod vcs;

pub use config::{FleetConfig, LintConfig, SyncConfig, DEFAULT_CONFIG_FILE};

pub use error::{FleetError, Result};

pub use exec::{CommandResult, CommandRunner, CommandSpec};

pub use manifest::{
    diff_manifests, extract_issue_urls, CheckoutMode, CheckoutTask, Manifest, ManifestDiff,
    ManifestEntry, RepoChange, RepoDiff,
};

pub use pool::{
    render_outcomes, Outcome, OutcomeReport, PoolRun, RepoOutcome, RepoTask, WorkQueue,
    WorkerAbort, WorkerPool, DEFAULT_WORKERS,
};

pub use runner::{FleetReport, FleetRunner, RepoSelection};

pub use tasks::{LintCacheRecord, LintTask, SyncTask};

pub use telemetry::init_tracing;

pub use timing::{Timeline, TimingHandle, TimingRecord};

pub use vcs::{CheckoutTarget, GitCli, VersionControl};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
