//! Per-repository outcomes and their aggregation into a fleet verdict.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Result of applying a work function to one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { reason: String },
    /// Nothing to do (already at target, cached). Not a failure.
    Skipped { reason: String },
}

impl Outcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    /// `0` is success, anything else a failure naming the code.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Outcome::Success
        } else {
            Outcome::failure(format!("exited with code {code}"))
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

/// An [`Outcome`] tagged with the repository it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoOutcome {
    pub repo: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// One line per outcome, in the order given.
pub fn render_outcomes(outcomes: &[RepoOutcome]) -> String {
    let mut out = String::new();
    for entry in outcomes {
        let _ = match &entry.outcome {
            Outcome::Success => writeln!(out, "  ✓ {} ({}ms)", entry.repo, entry.duration_ms),
            Outcome::Failure { reason } => writeln!(
                out,
                "  ✗ {} ({}ms): {}",
                entry.repo, entry.duration_ms, reason
            ),
            Outcome::Skipped { reason } => {
                writeln!(out, "  - {} skipped: {}", entry.repo, reason)
            }
        };
    }
    out
}

/// Aggregated verdict over every submitted repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Number of work items submitted to the pool.
    pub submitted: usize,
    /// One entry per submitted item, sorted by repository name.
    pub outcomes: Vec<RepoOutcome>,
    /// `true` only when no outcome is a failure.
    pub overall_success: bool,
}

impl OutcomeReport {
    /// Reduce `outcomes` to a verdict, checking them against what was submitted.
    ///
    /// Fails with [`FleetError::EmptyFleet`] when nothing was submitted, and
    /// with [`FleetError::Consistency`] when an outcome is missing, repeated,
    /// or belongs to a repository that was never submitted.
    pub fn aggregate(submitted: &[String], mut outcomes: Vec<RepoOutcome>) -> Result<Self> {
        if submitted.is_empty() {
            return Err(FleetError::EmptyFleet);
        }

        let mut expected: HashMap<&str, usize> = HashMap::new();
        for repo in submitted {
            *expected.entry(repo.as_str()).or_default() += 1;
        }
        for outcome in &outcomes {
            match expected.get_mut(outcome.repo.as_str()) {
                Some(0) => {
                    return Err(FleetError::Consistency(format!(
                        "repository {} reported more outcomes than it was submitted",
                        outcome.repo
                    )))
                }
                Some(remaining) => *remaining -= 1,
                None => {
                    return Err(FleetError::Consistency(format!(
                        "outcome for repository {} which was never submitted",
                        outcome.repo
                    )))
                }
            }
        }
        if outcomes.len() != submitted.len() {
            let mut missing: Vec<&str> = expected
                .iter()
                .filter(|(_, &left)| left > 0)
                .map(|(&repo, _)| repo)
                .collect();
            missing.sort_unstable();
            return Err(FleetError::Consistency(format!(
                "received {} outcomes for {} submitted repositories (missing: {})",
                outcomes.len(),
                submitted.len(),
                missing.join(", ")
            )));
        }

        outcomes.sort_by(|a, b| a.repo.cmp(&b.repo));
        let overall_success = outcomes.iter().all(|o| !o.outcome.is_failure());

        Ok(Self {
            submitted: submitted.len(),
            outcomes,
            overall_success,
        })
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == Outcome::Success)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_skipped()).count()
    }

    /// `(repo, reason)` for every failure, in repository order.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.outcome {
                Outcome::Failure { reason } => Some((o.repo.as_str(), reason.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Process exit status for this verdict.
    pub fn exit_code(&self) -> i32 {
        if self.overall_success {
            0
        } else {
            1
        }
    }

    /// Per-repository breakdown followed by a summary line.
    pub fn render(&self) -> String {
        let mut out = render_outcomes(&self.outcomes);
        let _ = writeln!(
            out,
            "Summary: {} succeeded, {} failed, {} skipped of {} repositories",
            self.succeeded_count(),
            self.failed_count(),
            self.skipped_count(),
            self.submitted
        );
        out
    }
}
