//! Built-in [`RepoTask`](crate::pool::RepoTask) implementations.
//!
//! Checkout lives next to the manifest it applies; see
//! [`crate::manifest::CheckoutTask`].

pub mod lint;
pub mod sync;

pub use lint::{LintCacheRecord, LintTask};
pub use sync::SyncTask;

use crate::exec::CommandResult;
use crate::pool::Outcome;

/// Map a finished command to an outcome, naming the step in the failure reason.
pub(crate) fn command_outcome(step: &str, result: &CommandResult) -> Outcome {
    match Outcome::from_exit_code(result.exit_code) {
        Outcome::Failure { reason } => match result.last_output_line() {
            Some(line) => Outcome::failure(format!("{step} {reason}: {line}")),
            None => Outcome::failure(format!("{step} {reason}")),
        },
        outcome => outcome,
    }
}
