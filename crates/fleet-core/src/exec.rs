//! External command execution inside a repository working copy.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{FleetError, Result};

/// A command to run in each repository (lint, install, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Short name used in logs and failure reasons.
    pub name: String,
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Zero disables the timeout.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, argv: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            argv,
            timeout_secs,
        }
    }

    /// The command line as a single string.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub name: String,
    /// Exit code, `-1` when killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CommandResult {
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last non-blank line of stderr (or stdout), for compact failure reasons.
    pub fn last_output_line(&self) -> Option<&str> {
        [&self.stderr, &self.stdout]
            .into_iter()
            .find_map(|text| text.lines().rev().map(str::trim).find(|l| !l.is_empty()))
    }
}

/// Runs [`CommandSpec`]s.
pub struct CommandRunner;

impl CommandRunner {
    /// Run `spec` with `dir` as working directory and wait for it.
    ///
    /// Returns `Err` only when the command could not be run to completion
    /// (empty argv, spawn failure, timeout). A nonzero exit is an `Ok` result
    /// with `success == false`.
    pub async fn execute(spec: &CommandSpec, dir: &Path) -> Result<CommandResult> {
        let start = Instant::now();

        let (exe, args) = spec.argv.split_first().ok_or_else(|| FleetError::Command {
            name: spec.name.clone(),
            detail: "empty command".to_string(),
        })?;

        debug!(event = "command.spawn", name = %spec.name, dir = %dir.display(), command = %spec.display());
        let child = Command::new(exe)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FleetError::Command {
                name: spec.name.clone(),
                detail: format!("failed to spawn `{}`: {e}", spec.display()),
            })?;

        let waited = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| FleetError::Command {
                name: spec.name.clone(),
                detail: format!("timed out after {} seconds", spec.timeout_secs),
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|e| FleetError::Command {
            name: spec.name.clone(),
            detail: format!("failed waiting for `{}`: {e}", spec.display()),
        })?;

        Ok(CommandResult {
            name: spec.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str, timeout_secs: u64) -> CommandSpec {
        CommandSpec::new(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs,
        )
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let result = CommandRunner::execute(&sh("echo", "echo hello", 60), dir.path())
            .await
            .unwrap();
        assert!(result.passed());
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let result = CommandRunner::execute(&sh("ls", "ls", 0), dir.path())
            .await
            .unwrap();
        assert!(result.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_ok_but_not_passed() {
        let dir = tempfile::tempdir().unwrap();
        let result = CommandRunner::execute(&sh("fail", "echo broken >&2; exit 3", 0), dir.path())
            .await
            .unwrap();
        assert!(!result.passed());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.last_output_line(), Some("broken"));
    }

    #[tokio::test]
    async fn test_empty_argv_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("nothing", vec![], 0);
        let err = CommandRunner::execute(&spec, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("ghost", vec!["definitely-not-a-real-binary-xyz".to_string()], 0);
        let err = CommandRunner::execute(&spec, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CommandRunner::execute(&sh("slow", "sleep 5", 1), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 1 seconds"));
    }
}
