//! Fleet-wide operation runner.
//!
//! Picks the repositories to work on, pushes them through a [`WorkerPool`]
//! inside a run-scoped span, and turns the pool's raw results into a checked
//! [`FleetReport`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::manifest::Manifest;
use crate::pool::{OutcomeReport, RepoTask, WorkerPool};
use crate::timing::{Timeline, TimingRecord};

/// Where the repository list comes from.
#[derive(Debug, Clone)]
pub enum RepoSelection {
    /// Named on the command line.
    Explicit(Vec<String>),
    /// Every manifest entry except the owning repository.
    Manifest {
        manifest: Manifest,
        owner: Option<String>,
    },
    /// The configured fleet listing.
    Fleet(Vec<String>),
}

impl RepoSelection {
    /// The selected repositories, first occurrence wins.
    pub fn resolve(&self) -> Vec<String> {
        let repos = match self {
            RepoSelection::Explicit(repos) | RepoSelection::Fleet(repos) => repos.clone(),
            RepoSelection::Manifest { manifest, owner } => {
                manifest.repos_excluding(owner.as_deref())
            }
        };
        dedup(repos)
    }
}

fn dedup(repos: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    repos
        .into_iter()
        .filter(|repo| seen.insert(repo.clone()))
        .collect()
}

/// Result of one fleet operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub run_id: Uuid,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub report: OutcomeReport,
    pub timings: Vec<TimingRecord>,
}

impl FleetReport {
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }

    pub fn render(&self) -> String {
        format!("{} ({} ms)\n{}", self.operation, self.duration_ms, self.report.render())
    }
}

/// Runs one operation over a fleet.
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetRunner {
    pool: WorkerPool,
}

impl FleetRunner {
    pub fn new(workers: usize) -> Self {
        Self {
            pool: WorkerPool::new(workers),
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    /// Apply `task` to every selected repository.
    ///
    /// Refuses an empty selection before any work starts. A worker abort is
    /// escalated to [`FleetError::WorkerAborted`] after the pool has drained,
    /// so the other repositories still get processed.
    pub async fn run(
        &self,
        operation: &str,
        selection: &RepoSelection,
        task: Arc<dyn RepoTask>,
    ) -> Result<FleetReport> {
        let repos = selection.resolve();
        if repos.is_empty() {
            return Err(FleetError::EmptyFleet);
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("fleet.run", run_id = %run_id, operation = %operation);
        self.execute(run_id, operation, repos, task)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        operation: &str,
        repos: Vec<String>,
        task: Arc<dyn RepoTask>,
    ) -> Result<FleetReport> {
        let started_at = Utc::now();
        let timeline = Timeline::new();
        let total = timeline.push(operation);
        info!(event = "run.started", repos = repos.len(), workers = self.pool.workers());

        let pooled = total.push("pool");
        let run = self.pool.run(repos.clone(), task).await;
        pooled.finish();

        if let Some(abort) = run.aborts.first() {
            for done in &run.outcomes {
                info!(event = "run.completed_before_abort", repo = %done.repo, outcome = ?done.outcome);
            }
            error!(
                event = "run.aborted",
                aborts = run.aborts.len(),
                completed = run.outcomes.len(),
                unprocessed = run.unprocessed.len()
            );
            return Err(FleetError::WorkerAborted {
                repo: abort.repo.clone().unwrap_or_else(|| "<unknown>".to_string()),
                message: abort.message.clone(),
                completed: run.outcomes,
            });
        }
        if !run.unprocessed.is_empty() {
            return Err(FleetError::Consistency(format!(
                "{} repositories were never processed: {}",
                run.unprocessed.len(),
                run.unprocessed.join(", ")
            )));
        }

        let report = {
            let _aggregate = total.push("aggregate");
            OutcomeReport::aggregate(&repos, run.outcomes)?
        };
        let duration_ms = total.finish().as_millis() as u64;

        info!(
            event = "run.finished",
            duration_ms,
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            success = report.overall_success
        );

        Ok(FleetReport {
            run_id,
            operation: operation.to_string(),
            started_at,
            duration_ms,
            report,
            timings: timeline.records(),
        })
    }
}
