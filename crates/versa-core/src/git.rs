//! Version control operations for release workflows.
//!
//! [`VersionControl`] is the port the release pipeline and the changeset
//! flow talk to. [`GitCli`] shells out to `git` for all operations, so we
//! inherit the user's SSH keys, signing, hooks, and other configuration.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::process::{self, ToolError};

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// The `git` invocation failed or timed out.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Not inside a git repository.
    #[error("not a git repository (or any parent up to mount point)")]
    NotARepo,
}

/// Result alias for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// A release tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    /// Tag name, `{package}@{version}`.
    pub name: String,
    /// False when the tag already existed.
    pub created: bool,
}

/// Result of [`VersionControl::commit_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "hash")]
pub enum CommitOutcome {
    /// A commit was created.
    Committed(String),
    /// The working tree had no changes.
    NothingToCommit,
}

/// Version control port.
pub trait VersionControl {
    /// Current branch; `None` when HEAD is detached.
    fn current_branch(&self) -> GitResult<Option<String>>;

    /// `(short_hash, subject)` of commits in `base..HEAD`, oldest first.
    fn commits_since(&self, base: &str) -> GitResult<Vec<(String, String)>>;

    /// Paths changed between the merge base with `base` and `HEAD`.
    fn changed_files_since(&self, base: &str) -> GitResult<Vec<String>>;

    /// Whether a tag exists locally.
    fn tag_exists(&self, name: &str) -> GitResult<bool>;

    /// Create an annotated tag. An existing tag is left alone.
    fn create_tag(&self, name: &str, message: &str) -> GitResult<TagRecord>;

    /// Stage everything and commit it.
    fn commit_all(&self, message: &str) -> GitResult<CommitOutcome>;

    /// Push `HEAD` and the given tags.
    fn push(&self, tags: &[String]) -> GitResult<()>;
}

/// [`VersionControl`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: Utf8PathBuf,
    remote: String,
    timeout: Duration,
}

impl GitCli {
    /// Git operations in `root`, pushing to `origin`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: "origin".to_string(),
            timeout: process::DEFAULT_TIMEOUT,
        }
    }

    /// Remote to push to.
    #[must_use]
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Timeout for each `git` invocation.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Repository root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Check if `root` is inside a git work tree.
    #[instrument(skip(self))]
    pub fn is_inside_repo(&self) -> GitResult<bool> {
        match self.git(&["rev-parse", "--is-inside-work-tree"]) {
            Ok(output) => Ok(output.trim() == "true"),
            Err(GitError::NotARepo | GitError::Tool(ToolError::Failed { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check whether the working tree is clean.
    #[instrument(skip(self))]
    pub fn is_clean(&self) -> GitResult<bool> {
        let output = self.git(&["status", "--porcelain"])?;
        let clean = output.trim().is_empty();
        debug!(clean, "working tree status");
        Ok(clean)
    }

    /// Run a git command and return its stdout.
    fn git(&self, args: &[&str]) -> GitResult<String> {
        match process::run("git", args, &self.root, self.timeout) {
            Ok(output) => Ok(output.stdout),
            Err(ToolError::Failed { message, .. }) if message.contains("not a git repository") => {
                Err(GitError::NotARepo)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl VersionControl for GitCli {
    #[instrument(skip(self))]
    fn current_branch(&self) -> GitResult<Option<String>> {
        let output = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = output.trim().to_string();
        if branch == "HEAD" {
            debug!("detached HEAD");
            Ok(None)
        } else {
            debug!(%branch, "current branch");
            Ok(Some(branch))
        }
    }

    #[instrument(skip(self))]
    fn commits_since(&self, base: &str) -> GitResult<Vec<(String, String)>> {
        let range = format!("{base}..HEAD");
        let output = self.git(&["log", "--reverse", "--format=%h%x1f%s", &range])?;

        let commits: Vec<(String, String)> = output
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                let (hash, subject) = line.split_once('\u{1f}').unwrap_or((line, ""));
                (hash.to_string(), subject.to_string())
            })
            .collect();

        debug!(count = commits.len(), "commits in range");
        Ok(commits)
    }

    #[instrument(skip(self))]
    fn changed_files_since(&self, base: &str) -> GitResult<Vec<String>> {
        let range = format!("{base}...HEAD");
        let output = self.git(&["diff", "--name-only", &range])?;
        let files: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        debug!(count = files.len(), "changed files");
        Ok(files)
    }

    fn tag_exists(&self, name: &str) -> GitResult<bool> {
        let reference = format!("refs/tags/{name}");
        match self.git(&["rev-parse", "--quiet", "--verify", &reference]) {
            Ok(_) => Ok(true),
            Err(GitError::Tool(ToolError::Failed { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, message))]
    fn create_tag(&self, name: &str, message: &str) -> GitResult<TagRecord> {
        if self.tag_exists(name)? {
            debug!(tag = name, "tag already exists; skipping");
            return Ok(TagRecord {
                name: name.to_string(),
                created: false,
            });
        }
        self.git(&["tag", "--annotate", name, "--message", message])?;
        info!(tag = name, "created tag");
        Ok(TagRecord {
            name: name.to_string(),
            created: true,
        })
    }

    #[instrument(skip(self))]
    fn commit_all(&self, message: &str) -> GitResult<CommitOutcome> {
        self.git(&["add", "--all"])?;
        match self.git(&["diff", "--cached", "--quiet"]) {
            Ok(_) => {
                debug!("nothing staged");
                return Ok(CommitOutcome::NothingToCommit);
            }
            Err(GitError::Tool(ToolError::Failed { code: Some(1), .. })) => {}
            Err(e) => return Err(e),
        }
        self.git(&["commit", "--quiet", "--message", message])?;
        let hash = self.git(&["rev-parse", "--short", "HEAD"])?.trim().to_string();
        info!(%hash, "created release commit");
        Ok(CommitOutcome::Committed(hash))
    }

    #[instrument(skip(self), fields(remote = %self.remote))]
    fn push(&self, tags: &[String]) -> GitResult<()> {
        let refs: Vec<String> = tags.iter().map(|t| format!("refs/tags/{t}")).collect();
        let mut args = vec!["push", "--atomic", self.remote.as_str(), "HEAD"];
        args.extend(refs.iter().map(String::as_str));
        self.git(&args)?;
        info!(tags = tags.len(), "pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, GitCli) {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let cli = GitCli::new(root);
        cli.git(&["init", "--quiet"]).unwrap();
        cli.git(&["config", "user.email", "dev@example.com"]).unwrap();
        cli.git(&["config", "user.name", "Dev"]).unwrap();
        cli.git(&["config", "commit.gpgsign", "false"]).unwrap();
        cli.git(&["config", "tag.gpgsign", "false"]).unwrap();
        (tmp, cli)
    }

    fn commit_file(cli: &GitCli, path: &str, subject: &str) {
        let full = cli.root().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, subject).unwrap();
        cli.commit_all(subject).unwrap();
    }

    #[test]
    fn outside_a_repo_is_detected() {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        assert!(!GitCli::new(root).is_inside_repo().unwrap());
    }

    #[test]
    fn commit_all_reports_nothing_to_commit() {
        let (_tmp, cli) = repo();
        commit_file(&cli, "README.md", "chore: init");
        assert_eq!(
            cli.commit_all("chore(release): version packages").unwrap(),
            CommitOutcome::NothingToCommit
        );
        assert!(cli.is_clean().unwrap());
    }

    #[test]
    fn commits_and_files_since_base() {
        let (_tmp, cli) = repo();
        commit_file(&cli, "README.md", "chore: init");
        let base = cli.git(&["rev-parse", "HEAD"]).unwrap().trim().to_string();
        commit_file(&cli, "packages/ui/a.ts", "feat(ui): add x");
        commit_file(&cli, "packages/ui/b.ts", "✨ fix(ui): correct y");

        let commits = cli.commits_since(&base).unwrap();
        let subjects: Vec<&str> = commits.iter().map(|(_, s)| s.as_str()).collect();
        assert_eq!(subjects, ["feat(ui): add x", "✨ fix(ui): correct y"]);

        let files = cli.changed_files_since(&base).unwrap();
        assert_eq!(files, ["packages/ui/a.ts", "packages/ui/b.ts"]);
    }

    #[test]
    fn tag_creation_is_idempotent() {
        let (_tmp, cli) = repo();
        commit_file(&cli, "README.md", "chore: init");

        let first = cli.create_tag("ui@1.5.0", "ui@1.5.0").unwrap();
        assert!(first.created);
        assert!(cli.tag_exists("ui@1.5.0").unwrap());

        let second = cli.create_tag("ui@1.5.0", "ui@1.5.0").unwrap();
        assert!(!second.created);
        assert_eq!(second.name, "ui@1.5.0");
    }

    #[test]
    fn detached_head_has_no_branch() {
        let (_tmp, cli) = repo();
        commit_file(&cli, "README.md", "chore: init");
        assert!(cli.current_branch().unwrap().is_some());
        cli.git(&["checkout", "--quiet", "--detach"]).unwrap();
        assert_eq!(cli.current_branch().unwrap(), None);
    }

    #[test]
    fn push_without_remote_fails() {
        let (_tmp, cli) = repo();
        commit_file(&cli, "README.md", "chore: init");
        assert!(cli.push(&[]).is_err());
    }
}
