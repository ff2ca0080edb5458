//! Hosted releases.
//!
//! [`ReleaseHost`] creates the per-package release on the code host.
//! [`GhCli`] drives the GitHub CLI; a missing binary or missing login is
//! [`HostError::AuthUnavailable`], which publishing records as a per-package
//! failure rather than aborting the run.

use std::io::Write;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::process::{self, ToolError};

/// Errors from the release host.
#[derive(Error, Debug)]
pub enum HostError {
    /// Host credentials are not available.
    #[error("release host auth unavailable: {0}")]
    AuthUnavailable(String),

    /// The host CLI failed or timed out.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Release notes could not be staged.
    #[error("failed to stage release notes: {0}")]
    Notes(#[source] std::io::Error),
}

/// Result alias for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Parameters for one hosted release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRequest {
    /// Git tag the release points at.
    pub tag: String,
    /// Release title.
    pub title: String,
    /// Markdown notes.
    pub body: String,
    /// Mark as a prerelease.
    pub prerelease: bool,
    /// Create as a draft.
    pub draft: bool,
}

/// Release host port.
///
/// Publishing calls this from several threads at once.
pub trait ReleaseHost: Sync {
    /// Verify the host can be written to.
    fn check_auth(&self) -> HostResult<()>;

    /// URL of an existing release for `tag`, if any.
    fn existing_release(&self, tag: &str) -> HostResult<Option<String>>;

    /// Create a release and return its URL.
    fn create_release(&self, request: &ReleaseRequest) -> HostResult<String>;
}

/// [`ReleaseHost`] backed by the `gh` binary.
#[derive(Debug, Clone)]
pub struct GhCli {
    root: Utf8PathBuf,
    timeout: Duration,
}

impl GhCli {
    /// GitHub CLI operations run from `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: process::DEFAULT_TIMEOUT,
        }
    }

    /// Timeout for each `gh` invocation.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn gh(&self, args: &[&str]) -> Result<String, ToolError> {
        process::run("gh", args, &self.root, self.timeout).map(|o| o.stdout)
    }
}

impl ReleaseHost for GhCli {
    #[instrument(skip(self))]
    fn check_auth(&self) -> HostResult<()> {
        if which::which("gh").is_err() {
            return Err(HostError::AuthUnavailable(
                "gh CLI not found on PATH".to_string(),
            ));
        }
        match self.gh(&["auth", "status"]) {
            Ok(_) => Ok(()),
            Err(ToolError::Failed { message, .. }) => Err(HostError::AuthUnavailable(message)),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    fn existing_release(&self, tag: &str) -> HostResult<Option<String>> {
        match self.gh(&["release", "view", tag, "--json", "url", "--jq", ".url"]) {
            Ok(url) => {
                let url = url.trim().to_string();
                debug!(%url, "release already exists");
                Ok(Some(url))
            }
            Err(ToolError::Failed { message, .. }) if message.contains("not found") => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, request), fields(tag = %request.tag))]
    fn create_release(&self, request: &ReleaseRequest) -> HostResult<String> {
        let mut notes = tempfile::NamedTempFile::new().map_err(HostError::Notes)?;
        notes
            .write_all(request.body.as_bytes())
            .map_err(HostError::Notes)?;
        let notes_path = notes.path().to_string_lossy().to_string();

        let mut args = vec![
            "release",
            "create",
            request.tag.as_str(),
            "--verify-tag",
            "--title",
            request.title.as_str(),
            "--notes-file",
            notes_path.as_str(),
        ];
        if request.prerelease {
            args.push("--prerelease");
        }
        if request.draft {
            args.push("--draft");
        }

        let url = self.gh(&args)?.trim().to_string();
        info!(%url, "created hosted release");
        Ok(url)
    }
}
