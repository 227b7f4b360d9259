//! Explain what changed between two manifests of the same fleet.
//!
//! For each repository in either manifest the differ classifies the change
//! and, when the new revision descends from the old one, asks git for the
//! ancestry path between them. Commit lines are scanned for issue-tracker
//! URLs, which are de-duplicated across the whole fleet.
//!
//! The commit count is the number of non-blank log lines. With one line per
//! commit (`--oneline`) that equals the number of commits; it is not derived
//! from commit hashes.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::manifest::Manifest;
use crate::vcs::VersionControl;

/// How one repository differs between the old and new manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepoChange {
    Unchanged {
        revision: String,
    },
    Changed {
        old: String,
        new: String,
        /// Raw log text, in the order git returned it.
        log: String,
        commit_count: usize,
        issues: BTreeSet<String>,
    },
    /// Revisions differ but `new` does not descend from `old`.
    NotDescendant {
        old: String,
        new: String,
    },
    /// Only in the new manifest.
    Added {
        new: String,
    },
    /// Only in the old manifest.
    Removed {
        old: String,
    },
    /// git could not answer for this repository.
    LogUnavailable {
        old: String,
        new: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDiff {
    pub repo: String,
    #[serde(flatten)]
    pub change: RepoChange,
}

/// Fleet-level change report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    /// One entry per repository in either manifest, in name order.
    pub repos: Vec<RepoDiff>,
    /// Issue URLs referenced anywhere in the fleet, de-duplicated.
    pub issues: BTreeSet<String>,
    /// Non-blank log lines across every changed repository.
    pub commit_count: usize,
}

impl ManifestDiff {
    /// Repositories whose revision moved forward.
    pub fn changed_repos(&self) -> Vec<&str> {
        self.repos
            .iter()
            .filter(|r| matches!(r.change, RepoChange::Changed { .. }))
            .map(|r| r.repo.as_str())
            .collect()
    }

    /// Repositories whose revision is different, whatever the ancestry.
    pub fn differing_count(&self) -> usize {
        self.repos
            .iter()
            .filter(|r| !matches!(r.change, RepoChange::Unchanged { .. }))
            .count()
    }

    pub fn get(&self, repo: &str) -> Option<&RepoChange> {
        self.repos.iter().find(|r| r.repo == repo).map(|r| &r.change)
    }

    /// Plain-text report: one block per repository, then the issue list and a
    /// summary line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.repos {
            let repo = &entry.repo;
            let _ = match &entry.change {
                RepoChange::Unchanged { revision } => {
                    writeln!(out, "{repo}: unchanged at {revision}")
                }
                RepoChange::Changed {
                    old,
                    new,
                    log,
                    commit_count,
                    ..
                } => {
                    let _ = writeln!(out, "{repo}: {old}..{new} ({commit_count} commits)");
                    for line in log.lines().filter(|l| !l.trim().is_empty()) {
                        let _ = writeln!(out, "    {line}");
                    }
                    Ok(())
                }
                RepoChange::NotDescendant { old, new } => writeln!(
                    out,
                    "{repo}: {new} does not descend from {old}; no commits listed"
                ),
                RepoChange::Added { new } => {
                    writeln!(out, "{repo}: only in new manifest (at {new})")
                }
                RepoChange::Removed { old } => {
                    writeln!(out, "{repo}: only in old manifest (was {old})")
                }
                RepoChange::LogUnavailable { old, new, reason } => {
                    writeln!(out, "{repo}: cannot list {old}..{new}: {reason}")
                }
            };
        }
        if !self.issues.is_empty() {
            let _ = writeln!(out);
            for issue in &self.issues {
                let _ = writeln!(out, "  {issue}");
            }
        }
        let _ = writeln!(
            out,
            "{} unique issues, {} commits",
            self.issues.len(),
            self.commit_count
        );
        out
    }
}

/// Finds issue-tracker URLs in commit lines.
#[derive(Debug, Clone)]
pub struct IssueExtractor {
    pattern: Option<Regex>,
}

impl IssueExtractor {
    /// An empty prefix matches nothing.
    pub fn new(prefix: &str) -> Self {
        let pattern = if prefix.is_empty() {
            None
        } else {
            Regex::new(&format!(r"{}\S+", regex::escape(prefix))).ok()
        };
        Self { pattern }
    }

    /// URLs referenced by non-merge lines of `log`.
    pub fn extract(&self, log: &str) -> BTreeSet<String> {
        let Some(pattern) = &self.pattern else {
            return BTreeSet::new();
        };
        log.lines()
            .filter(|line| !is_merge_line(line))
            .flat_map(|line| pattern.find_iter(line))
            .map(|m| {
                m.as_str()
                    .trim_end_matches(|c: char| ".,;:)]>'\"".contains(c))
                    .to_string()
            })
            .collect()
    }
}

/// Convenience wrapper around [`IssueExtractor`].
pub fn extract_issue_urls(log: &str, prefix: &str) -> BTreeSet<String> {
    IssueExtractor::new(prefix).extract(log)
}

/// Merge housekeeping commits do not attribute issues.
fn is_merge_line(line: &str) -> bool {
    line.to_lowercase().contains("merge branch")
}

/// Non-blank lines: the commit count approximation.
pub fn count_commit_lines(log: &str) -> usize {
    log.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Compare `old` against `new`, reading logs from working copies under `root`.
///
/// Repositories are processed one after another. Nothing here is an error:
/// repositories git cannot answer for are reported as
/// [`RepoChange::LogUnavailable`].
pub async fn diff_manifests(
    old: &Manifest,
    new: &Manifest,
    root: &Path,
    vcs: &dyn VersionControl,
    issue_url_prefix: &str,
) -> ManifestDiff {
    let extractor = IssueExtractor::new(issue_url_prefix);
    let names: BTreeSet<&str> = old.repos().chain(new.repos()).collect();
    let mut diff = ManifestDiff::default();

    for repo in names {
        let change = match (old.get(repo), new.get(repo)) {
            (Some(o), Some(n)) if o.revision == n.revision => RepoChange::Unchanged {
                revision: n.revision.clone(),
            },
            (Some(o), Some(n)) => {
                compare(repo, &o.revision, &n.revision, &root.join(repo), vcs, &extractor).await
            }
            (None, Some(n)) => RepoChange::Added {
                new: n.revision.clone(),
            },
            (Some(o), None) => RepoChange::Removed {
                old: o.revision.clone(),
            },
            (None, None) => continue,
        };

        if let RepoChange::Changed {
            commit_count,
            issues,
            ..
        } = &change
        {
            diff.commit_count += commit_count;
            diff.issues.extend(issues.iter().cloned());
        }
        diff.repos.push(RepoDiff {
            repo: repo.to_string(),
            change,
        });
    }

    debug!(
        event = "manifest.diffed",
        repos = diff.repos.len(),
        issues = diff.issues.len(),
        commits = diff.commit_count
    );
    diff
}

async fn compare(
    repo: &str,
    old: &str,
    new: &str,
    dir: &Path,
    vcs: &dyn VersionControl,
    extractor: &IssueExtractor,
) -> RepoChange {
    let unavailable = |reason: String| {
        warn!(event = "manifest.log_unavailable", repo = %repo, old = %old, new = %new, reason = %reason);
        RepoChange::LogUnavailable {
            old: old.to_string(),
            new: new.to_string(),
            reason,
        }
    };

    match vcs.is_ancestor(dir, old, new).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(event = "manifest.not_descendant", repo = %repo, old = %old, new = %new);
            return RepoChange::NotDescendant {
                old: old.to_string(),
                new: new.to_string(),
            };
        }
        Err(e) => return unavailable(e.to_string()),
    }

    match vcs.ancestry_log(dir, old, new).await {
        Ok(log) => RepoChange::Changed {
            old: old.to_string(),
            new: new.to_string(),
            commit_count: count_commit_lines(&log),
            issues: extractor.extract(&log),
            log,
        },
        Err(e) => unavailable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::testing::{FakeRepo, FakeVcs};

    const PREFIX: &str = "https://tracker.example.com/browse/";

    fn manifest(json: &str) -> Manifest {
        Manifest::from_json_str(json).unwrap()
    }

    #[test]
    fn test_extract_ignores_merge_lines_and_dedupes() {
        let log = "\
a1 Fix header (https://tracker.example.com/browse/UI-12)
b2 Merge branch 'main' into feature, see https://tracker.example.com/browse/UI-99
c3 Follow-up for https://tracker.example.com/browse/UI-12.
d4 Unrelated https://elsewhere.example.com/browse/X-1";
        let issues = extract_issue_urls(log, PREFIX);
        assert_eq!(
            issues.into_iter().collect::<Vec<_>>(),
            vec!["https://tracker.example.com/browse/UI-12".to_string()]
        );
    }

    #[test]
    fn test_extract_with_empty_prefix_finds_nothing() {
        assert!(extract_issue_urls("a1 https://x.example.com/1", "").is_empty());
    }

    #[test]
    fn test_bare_prefix_is_not_an_issue() {
        assert!(extract_issue_urls("a1 see https://tracker.example.com/browse/ ok", PREFIX).is_empty());
    }

    #[test]
    fn test_count_commit_lines_skips_blank_lines() {
        assert_eq!(count_commit_lines("a1 one\n\n  \nb2 two\n"), 2);
        assert_eq!(count_commit_lines(""), 0);
    }

    #[tokio::test]
    async fn test_self_diff_is_empty() {
        let m = manifest(r#"{ "comment": "c", "a": { "sha": "111" }, "b": { "sha": "222" } }"#);
        let vcs = FakeVcs::new();
        let diff = diff_manifests(&m, &m, Path::new("/fleet"), vcs.as_ref(), PREFIX).await;
        assert!(diff.changed_repos().is_empty());
        assert_eq!(diff.differing_count(), 0);
        assert!(diff.issues.is_empty());
        assert_eq!(diff.commit_count, 0);
        assert_eq!(diff.repos.len(), 2);
    }

    #[tokio::test]
    async fn test_changed_repo_lists_commits_of_that_repo_only() {
        let old = manifest(r#"{ "a": { "sha": "111" }, "b": { "sha": "222" } }"#);
        let new = manifest(r#"{ "a": { "sha": "111" }, "b": { "sha": "333" } }"#);
        let vcs = FakeVcs::new();
        vcs.add(
            Path::new("/fleet/b").to_path_buf(),
            FakeRepo::at("333").with_log(
                "222",
                "333",
                "c3 Close https://tracker.example.com/browse/B-2\nc2 Start B-2\n",
            ),
        );

        let diff = diff_manifests(&old, &new, Path::new("/fleet"), vcs.as_ref(), PREFIX).await;

        assert_eq!(
            diff.get("a"),
            Some(&RepoChange::Unchanged {
                revision: "111".to_string()
            })
        );
        assert_eq!(diff.changed_repos(), vec!["b"]);
        assert_eq!(diff.commit_count, 2);
        assert!(diff.issues.contains("https://tracker.example.com/browse/B-2"));
    }

    #[tokio::test]
    async fn test_one_sided_repos_are_structural() {
        let old = manifest(r#"{ "a": { "sha": "111" }, "gone": { "sha": "555" } }"#);
        let new = manifest(r#"{ "a": { "sha": "111" }, "fresh": { "sha": "444" } }"#);
        let vcs = FakeVcs::new();
        let diff = diff_manifests(&old, &new, Path::new("/fleet"), vcs.as_ref(), PREFIX).await;

        assert_eq!(
            diff.get("fresh"),
            Some(&RepoChange::Added {
                new: "444".to_string()
            })
        );
        assert_eq!(
            diff.get("gone"),
            Some(&RepoChange::Removed {
                old: "555".to_string()
            })
        );
        let rendered = diff.render();
        assert!(rendered.contains("fresh: only in new manifest (at 444)"));
        assert!(rendered.contains("gone: only in old manifest (was 555)"));
        assert!(rendered.contains("0 unique issues, 0 commits"));
    }

    #[tokio::test]
    async fn test_non_descendant_has_no_commits() {
        let old = manifest(r#"{ "a": { "sha": "aaa" } }"#);
        let new = manifest(r#"{ "a": { "sha": "bbb" } }"#);
        let vcs = FakeVcs::new();
        vcs.add(Path::new("/fleet/a").to_path_buf(), FakeRepo::at("bbb"));

        let diff = diff_manifests(&old, &new, Path::new("/fleet"), vcs.as_ref(), PREFIX).await;
        assert!(matches!(diff.get("a"), Some(RepoChange::NotDescendant { .. })));
        assert_eq!(diff.commit_count, 0);
        assert!(diff.render().contains("does not descend from aaa"));
    }

    #[tokio::test]
    async fn test_missing_working_copy_is_log_unavailable() {
        let old = manifest(r#"{ "a": { "sha": "aaa" } }"#);
        let new = manifest(r#"{ "a": { "sha": "bbb" } }"#);
        let vcs = FakeVcs::new();
        let diff = diff_manifests(&old, &new, Path::new("/fleet"), vcs.as_ref(), PREFIX).await;
        match diff.get("a") {
            Some(RepoChange::LogUnavailable { reason, .. }) => {
                assert!(reason.contains("not a git repository"))
            }
            other => panic!("expected log unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_issues_deduplicated_across_repos() {
        let old = manifest(r#"{ "a": { "sha": "1" }, "b": { "sha": "3" } }"#);
        let new = manifest(r#"{ "a": { "sha": "2" }, "b": { "sha": "4" } }"#);
        let vcs = FakeVcs::new();
        let line = "x1 Shared https://tracker.example.com/browse/S-1";
        vcs.add(Path::new("/fleet/a").to_path_buf(), FakeRepo::at("2").with_log("1", "2", line));
        vcs.add(Path::new("/fleet/b").to_path_buf(), FakeRepo::at("4").with_log("3", "4", line));

        let diff = diff_manifests(&old, &new, Path::new("/fleet"), vcs.as_ref(), PREFIX).await;
        assert_eq!(diff.issues.len(), 1);
        assert_eq!(diff.commit_count, 2);
        assert!(diff.render().contains("1 unique issues, 2 commits"));
    }

    #[test]
    fn test_repo_diff_serializes_flat() {
        let entry = RepoDiff {
            repo: "a".to_string(),
            change: RepoChange::Added {
                new: "444".to_string(),
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["repo"], "a");
        assert_eq!(value["status"], "added");
        assert_eq!(value["new"], "444");
    }
}
