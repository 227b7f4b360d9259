//! Version-control adapter.
//!
//! Everything the fleet needs from git goes through [`VersionControl`], so the
//! pool tasks and the manifest differ can be driven by an in-memory fake in
//! tests. [`GitCli`] is the real implementation: it shells out to `git -C
//! <dir>` and never links libgit2.

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{FleetError, Result};

/// What a checkout should leave the working copy pointing at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutTarget {
    /// Detached HEAD at a revision.
    Revision(String),
    /// Named branch forced to a revision (`checkout -B`).
    Branch { branch: String, revision: String },
    /// The shared trunk branch, wherever it currently points.
    Trunk(String),
}

impl CheckoutTarget {
    /// Arguments passed to `git`.
    pub fn git_args(&self) -> Vec<&str> {
        match self {
            CheckoutTarget::Revision(rev) => vec!["checkout", "--quiet", "--detach", rev.as_str()],
            CheckoutTarget::Branch { branch, revision } => {
                vec!["checkout", "--quiet", "-B", branch.as_str(), revision.as_str()]
            }
            CheckoutTarget::Trunk(branch) => vec!["checkout", "--quiet", branch.as_str()],
        }
    }

    /// Human-readable target, used in failure reasons.
    pub fn describe(&self) -> String {
        match self {
            CheckoutTarget::Revision(rev) => format!("revision {rev}"),
            CheckoutTarget::Branch { branch, revision } => {
                format!("branch {branch} at {revision}")
            }
            CheckoutTarget::Trunk(branch) => format!("trunk branch {branch}"),
        }
    }
}

/// Git operations used by fleet tasks, one working copy at a time.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Full hash of `HEAD`.
    async fn head_revision(&self, dir: &Path) -> Result<String>;

    /// Full hash of `rev`, if it names a commit known to the working copy.
    async fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<String>;

    /// Checked-out branch name, or `None` on a detached `HEAD`.
    async fn current_branch(&self, dir: &Path) -> Result<Option<String>>;

    async fn checkout(&self, dir: &Path, target: &CheckoutTarget) -> Result<()>;

    /// Fast-forward-only pull of the current branch.
    async fn pull(&self, dir: &Path) -> Result<()>;

    /// `true` when `old` is an ancestor of (or equal to) `new`.
    async fn is_ancestor(&self, dir: &Path, old: &str, new: &str) -> Result<bool>;

    /// One line per commit on the ancestry path `old..new`, in git's order.
    async fn ancestry_log(&self, dir: &Path, old: &str, new: &str) -> Result<String>;
}

/// [`VersionControl`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different executable (e.g. a wrapper script).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command_line(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    async fn output(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        debug!(event = "git.invoke", dir = %dir.display(), args = ?args);
        Command::new(&self.program)
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| FleetError::Git {
                command: self.command_line(args),
                dir: dir.to_path_buf(),
                detail: format!("failed to run git: {e}"),
            })
    }

    fn failure(&self, dir: &Path, args: &[&str], output: &Output) -> FleetError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = match output.status.code() {
            Some(code) if stderr.is_empty() => format!("exit code {code}"),
            Some(code) => format!("exit code {code}: {stderr}"),
            None => format!("terminated by signal: {stderr}"),
        };
        FleetError::Git {
            command: self.command_line(args),
            dir: dir.to_path_buf(),
            detail,
        }
    }

    /// Run and require success; returns trimmed stdout.
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.output(dir, args).await?;
        if !output.status.success() {
            return Err(self.failure(dir, args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn head_revision(&self, dir: &Path) -> Result<String> {
        let sha = self.run(dir, &["rev-parse", "HEAD"]).await?;
        if sha.is_empty() {
            return Err(FleetError::Git {
                command: self.command_line(&["rev-parse", "HEAD"]),
                dir: dir.to_path_buf(),
                detail: "returned empty output".to_string(),
            });
        }
        Ok(sha)
    }

    async fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        self.run(dir, &["rev-parse", "--verify", "--quiet", spec.as_str()]).await
    }

    async fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        let args = ["symbolic-ref", "--quiet", "--short", "HEAD"];
        let output = self.output(dir, &args).await?;
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            // Detached HEAD.
            Some(1) => Ok(None),
            _ => Err(self.failure(dir, &args, &output)),
        }
    }

    async fn checkout(&self, dir: &Path, target: &CheckoutTarget) -> Result<()> {
        self.run(dir, &target.git_args()).await.map(|_| ())
    }

    async fn pull(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["pull", "--ff-only", "--quiet"]).await.map(|_| ())
    }

    async fn is_ancestor(&self, dir: &Path, old: &str, new: &str) -> Result<bool> {
        let args = ["merge-base", "--is-ancestor", old, new];
        let output = self.output(dir, &args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.failure(dir, &args, &output)),
        }
    }

    async fn ancestry_log(&self, dir: &Path, old: &str, new: &str) -> Result<String> {
        let range = format!("{old}..{new}");
        self.run(dir, &["log", "--oneline", "--ancestry-path", range.as_str()]).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scratch repositories built with the real `git` binary, and an
    //! in-memory [`FakeVcs`].

    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::process::Command as StdCommand;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{CheckoutTarget, VersionControl};
    use crate::error::{FleetError, Result};

    pub fn git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// `git init` on `main` with one empty commit.
    pub fn init_repo(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        git(dir, &["init", "--quiet"]);
        git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(dir, &["config", "user.name", "test-user"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        commit(dir, "initial");
    }

    /// Empty commit; returns the new `HEAD` hash.
    pub fn commit(dir: &Path, message: &str) -> String {
        git(dir, &["commit", "--quiet", "--allow-empty", "-m", message]);
        git(dir, &["rev-parse", "HEAD"])
    }

    /// In-memory working copies keyed by directory.
    #[derive(Debug, Clone, Default)]
    pub struct FakeRepo {
        pub head: String,
        pub branch: Option<String>,
        /// `(old, new)` pairs where `old` is an ancestor of `new`.
        pub ancestry: HashSet<(String, String)>,
        /// Log text per `(old, new)` range.
        pub logs: HashMap<(String, String), String>,
    }

    impl FakeRepo {
        pub fn at(head: &str) -> Self {
            Self {
                head: head.to_string(),
                ..Self::default()
            }
        }

        pub fn on_branch(mut self, branch: &str) -> Self {
            self.branch = Some(branch.to_string());
            self
        }

        pub fn with_log(mut self, old: &str, new: &str, log: &str) -> Self {
            let key = (old.to_string(), new.to_string());
            self.ancestry.insert(key.clone());
            self.logs.insert(key, log.to_string());
            self
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeVcs {
        repos: Mutex<HashMap<PathBuf, FakeRepo>>,
        failing: Mutex<HashSet<PathBuf>>,
        checkouts: Mutex<Vec<(PathBuf, CheckoutTarget)>>,
    }

    impl FakeVcs {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn add(&self, dir: PathBuf, repo: FakeRepo) {
            self.repos.lock().unwrap().insert(dir, repo);
        }

        /// Every git operation on `dir` fails.
        pub fn fail(&self, dir: PathBuf) {
            self.failing.lock().unwrap().insert(dir);
        }

        pub fn repo(&self, dir: &Path) -> FakeRepo {
            self.repos.lock().unwrap()[dir].clone()
        }

        pub fn checkouts(&self) -> Vec<(PathBuf, CheckoutTarget)> {
            self.checkouts.lock().unwrap().clone()
        }

        fn with_repo<T>(&self, dir: &Path, f: impl FnOnce(&mut FakeRepo) -> Result<T>) -> Result<T> {
            let error = |detail: &str| FleetError::Git {
                command: "git (fake)".to_string(),
                dir: dir.to_path_buf(),
                detail: detail.to_string(),
            };
            if self.failing.lock().unwrap().contains(dir) {
                return Err(error("scripted failure"));
            }
            let mut repos = self.repos.lock().unwrap();
            let repo = repos.get_mut(dir).ok_or_else(|| error("not a git repository"))?;
            f(repo)
        }
    }

    #[async_trait]
    impl VersionControl for FakeVcs {
        async fn head_revision(&self, dir: &Path) -> Result<String> {
            self.with_repo(dir, |r| Ok(r.head.clone()))
        }

        async fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<String> {
            self.with_repo(dir, |_| Ok(rev.to_string()))
        }

        async fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
            self.with_repo(dir, |r| Ok(r.branch.clone()))
        }

        async fn checkout(&self, dir: &Path, target: &CheckoutTarget) -> Result<()> {
            self.with_repo(dir, |r| {
                match target {
                    CheckoutTarget::Revision(rev) => {
                        r.head = rev.clone();
                        r.branch = None;
                    }
                    CheckoutTarget::Branch { branch, revision } => {
                        r.head = revision.clone();
                        r.branch = Some(branch.clone());
                    }
                    CheckoutTarget::Trunk(branch) => r.branch = Some(branch.clone()),
                }
                Ok(())
            })?;
            self.checkouts
                .lock()
                .unwrap()
                .push((dir.to_path_buf(), target.clone()));
            Ok(())
        }

        async fn pull(&self, dir: &Path) -> Result<()> {
            self.with_repo(dir, |_| Ok(()))
        }

        async fn is_ancestor(&self, dir: &Path, old: &str, new: &str) -> Result<bool> {
            self.with_repo(dir, |r| {
                Ok(old == new || r.ancestry.contains(&(old.to_string(), new.to_string())))
            })
        }

        async fn ancestry_log(&self, dir: &Path, old: &str, new: &str) -> Result<String> {
            self.with_repo(dir, |r| {
                Ok(r.logs
                    .get(&(old.to_string(), new.to_string()))
                    .cloned()
                    .unwrap_or_default())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{commit, git, init_repo};
    use super::*;

    #[tokio::test]
    async fn test_head_revision_is_full_hash() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let sha = GitCli::new().head_revision(dir.path()).await.unwrap();
        assert_eq!(sha.len(), 40);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_head_revision_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitCli::new().head_revision(dir.path()).await.unwrap_err();
        assert!(matches!(err, FleetError::Git { .. }));
    }

    #[tokio::test]
    async fn test_configured_program_is_invoked() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let vcs = GitCli::with_program("fleet-no-such-git");
        match vcs.head_revision(dir.path()).await.unwrap_err() {
            FleetError::Git { command, detail, .. } => {
                assert!(command.starts_with("fleet-no-such-git "), "{command}");
                assert!(detail.starts_with("failed to run git"), "{detail}");
            }
            other => panic!("expected git error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_checkout_revision_detaches_head() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let first = git(dir.path(), &["rev-parse", "HEAD"]);
        commit(dir.path(), "second");

        let vcs = GitCli::new();
        vcs.checkout(dir.path(), &CheckoutTarget::Revision(first.clone()))
            .await
            .unwrap();
        assert_eq!(vcs.head_revision(dir.path()).await.unwrap(), first);
        assert_eq!(vcs.current_branch(dir.path()).await.unwrap(), None);

        vcs.checkout(dir.path(), &CheckoutTarget::Trunk("main".to_string()))
            .await
            .unwrap();
        assert_eq!(
            vcs.current_branch(dir.path()).await.unwrap().as_deref(),
            Some("main")
        );
    }

    #[tokio::test]
    async fn test_checkout_branch_pins_branch_to_revision() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let first = git(dir.path(), &["rev-parse", "HEAD"]);
        commit(dir.path(), "second");

        let vcs = GitCli::new();
        let target = CheckoutTarget::Branch {
            branch: "release".to_string(),
            revision: first.clone(),
        };
        vcs.checkout(dir.path(), &target).await.unwrap();
        assert_eq!(vcs.head_revision(dir.path()).await.unwrap(), first);
        assert_eq!(
            vcs.current_branch(dir.path()).await.unwrap().as_deref(),
            Some("release")
        );
    }

    #[tokio::test]
    async fn test_checkout_unknown_revision_reports_command() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let err = GitCli::new()
            .checkout(dir.path(), &CheckoutTarget::Revision("deadbeef".to_string()))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("git checkout --quiet --detach deadbeef"), "{msg}");
    }

    #[tokio::test]
    async fn test_ancestry_log_lists_commits_between() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let old = git(dir.path(), &["rev-parse", "HEAD"]);
        commit(dir.path(), "add widget");
        let new = commit(dir.path(), "fix widget");

        let vcs = GitCli::new();
        assert!(vcs.is_ancestor(dir.path(), &old, &new).await.unwrap());
        assert!(!vcs.is_ancestor(dir.path(), &new, &old).await.unwrap());

        let log = vcs.ancestry_log(dir.path(), &old, &new).await.unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("fix widget"));
        assert!(lines[1].ends_with("add widget"));
    }

    #[tokio::test]
    async fn test_resolve_revision_expands_branch_name() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let head = git(dir.path(), &["rev-parse", "HEAD"]);
        let resolved = GitCli::new()
            .resolve_revision(dir.path(), "main")
            .await
            .unwrap();
        assert_eq!(resolved, head);
    }

    #[test]
    fn test_checkout_target_describe() {
        let target = CheckoutTarget::Branch {
            branch: "release".to_string(),
            revision: "abc".to_string(),
        };
        assert_eq!(target.describe(), "branch release at abc");
        assert_eq!(
            CheckoutTarget::Revision("abc".to_string()).git_args(),
            vec!["checkout", "--quiet", "--detach", "abc"]
        );
    }
}
