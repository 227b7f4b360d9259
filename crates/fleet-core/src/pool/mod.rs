//! Bounded-concurrency worker pool over a fleet of repositories.
//!
//! [`WorkerPool::run`] spawns a fixed number of workers into a
//! [`tokio::task::JoinSet`]. Each worker pops a repository name from the
//! shared [`WorkQueue`], runs the injected [`RepoTask`] on it, records the
//! [`Outcome`] and loops until the queue is empty.
//!
//! Failure semantics:
//! - a task that fails returns [`Outcome::Failure`]; the pool keeps going;
//! - a task that panics aborts the worker running it, and only that worker.
//!   Siblings keep draining the queue. The abort is reported in
//!   [`PoolRun::aborts`] and it is up to the caller to escalate it;
//! - workers run inside the caller's span, so per-repository events carry
//!   whatever the caller recorded there (a run id, for instance);
//! - the pool applies no timeout. A task that never completes stalls its
//!   worker, and the run finishes only when that task does.

pub mod outcome;
pub mod queue;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument};

pub use outcome::{render_outcomes, Outcome, OutcomeReport, RepoOutcome};
pub use queue::WorkQueue;

/// Worker count used when none is configured.
pub const DEFAULT_WORKERS: usize = 8;

/// Per-repository work function plugged into the pool.
///
/// Implementations must encode ordinary failures (nonzero exit, network
/// error, missing working copy) as [`Outcome::Failure`]. Panicking is
/// reserved for bugs.
#[async_trait]
pub trait RepoTask: Send + Sync {
    async fn run(&self, repo: &str) -> Outcome;
}

/// A worker that stopped because its task panicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAbort {
    pub worker: usize,
    /// Repository being processed, when known.
    pub repo: Option<String>,
    pub message: String,
}

/// Everything one pool run produced.
#[derive(Debug, Default)]
pub struct PoolRun {
    /// Outcomes in arrival order.
    pub outcomes: Vec<RepoOutcome>,
    pub aborts: Vec<WorkerAbort>,
    /// Items left in the queue. Non-empty only if every worker aborted.
    pub unprocessed: Vec<String>,
}

/// Fixed-size pool of fungible workers.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    /// A worker count of zero is clamped to one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Drain `items` through `task` and return once every worker has exited.
    ///
    /// `items` is not de-duplicated; a name listed twice is processed twice.
    pub async fn run(&self, items: Vec<String>, task: Arc<dyn RepoTask>) -> PoolRun {
        let total = items.len();
        info!(event = "pool.started", items = total, workers = self.workers);

        let queue = WorkQueue::new(items);
        let sink: Arc<Mutex<Vec<RepoOutcome>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));

        let mut join_set = JoinSet::new();
        for worker in 0..self.workers {
            let queue = queue.clone();
            let task = Arc::clone(&task);
            let sink = Arc::clone(&sink);
            join_set.spawn(drain(worker, queue, task, sink).in_current_span());
        }

        let mut aborts = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(None) => {}
                Ok(Some(abort)) => aborts.push(abort),
                Err(e) => {
                    error!(event = "pool.join_error", error = %e);
                    aborts.push(WorkerAbort {
                        worker: usize::MAX,
                        repo: None,
                        message: format!("worker task join error: {e}"),
                    });
                }
            }
        }

        let outcomes = std::mem::take(&mut *sink.lock().unwrap_or_else(|p| p.into_inner()));
        let unprocessed = queue.drain_remaining();
        info!(
            event = "pool.finished",
            outcomes = outcomes.len(),
            aborts = aborts.len(),
            unprocessed = unprocessed.len()
        );

        PoolRun {
            outcomes,
            aborts,
            unprocessed,
        }
    }
}

/// One worker's loop. Returns `Some` if the task panicked.
async fn drain(
    worker: usize,
    queue: WorkQueue,
    task: Arc<dyn RepoTask>,
    sink: Arc<Mutex<Vec<RepoOutcome>>>,
) -> Option<WorkerAbort> {
    while let Some(repo) = queue.pop() {
        let started = Instant::now();
        let span = info_span!("fleet.repo", repo = %repo, worker);
        let result = AssertUnwindSafe(task.run(&repo))
            .catch_unwind()
            .instrument(span)
            .await;

        match result {
            Ok(outcome) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                debug!(event = "pool.item_finished", repo = %repo, worker, duration_ms, ?outcome);
                sink.lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(RepoOutcome {
                        repo,
                        outcome,
                        duration_ms,
                    });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(event = "pool.worker_aborted", repo = %repo, worker, message = %message);
                return Some(WorkerAbort {
                    worker,
                    repo: Some(repo),
                    message,
                });
            }
        }
    }
    None
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
