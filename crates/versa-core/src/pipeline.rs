//! Release steps, their failure policies, and the run report.
//!
//! Each [`ReleaseStep`] declares a [`FailurePolicy`]. Step bodies hand their
//! result to [`ReleaseReport::settle`], which is the single place the policy
//! is enforced: best-effort failures become warnings on the report, fatal
//! ones halt the run with [`PipelineError::Halted`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::git::{CommitOutcome, TagRecord};
use crate::release::VersionBumpDecision;

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors from the release pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A fatal step failed; nothing after it ran.
    #[error("{step} step failed{}: {message}", .package.as_ref().map(|p| format!(" for {p}")).unwrap_or_default())]
    Halted {
        /// Step that failed.
        step: ReleaseStep,
        /// Package being processed, if the failure was package-specific.
        package: Option<String>,
        /// Tool or validation error text.
        message: String,
        /// Everything recorded before the halt.
        report: Box<ReleaseReport>,
    },
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

// ──────────────────────────────────────────────
// Steps and policies
// ──────────────────────────────────────────────

/// Steps of a release, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStep {
    /// Consume pending changesets into version decisions.
    Resolve,
    /// Write versions and changelogs, persist prerelease state, delete changesets.
    Apply,
    /// Regenerate the lock artifact.
    Lock,
    /// Create the release commit.
    Commit,
    /// Create one tag per released package.
    Tag,
    /// Push the commit and tags.
    Push,
    /// Create hosted releases.
    Publish,
}

impl ReleaseStep {
    /// All steps in execution order.
    pub const ALL: [Self; 7] = [
        Self::Resolve,
        Self::Apply,
        Self::Lock,
        Self::Commit,
        Self::Tag,
        Self::Push,
        Self::Publish,
    ];

    /// How failures of this step are handled.
    pub const fn policy(self) -> FailurePolicy {
        match self {
            Self::Resolve | Self::Apply | Self::Commit | Self::Push => FailurePolicy::Fatal,
            Self::Tag => FailurePolicy::FatalAfterAll,
            Self::Lock | Self::Publish => FailurePolicy::BestEffort,
        }
    }
}

impl fmt::Display for ReleaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolve => "resolve",
            Self::Apply => "apply",
            Self::Lock => "lock",
            Self::Commit => "commit",
            Self::Tag => "tag",
            Self::Push => "push",
            Self::Publish => "publish",
        })
    }
}

/// What a step failure does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure and halt the run.
    Fatal,
    /// Attempt every package, then halt if any failed.
    FatalAfterAll,
    /// Record failures as warnings and continue.
    BestEffort,
}

impl FailurePolicy {
    /// Whether a step keeps processing packages after one fails.
    pub const fn continues_after_failure(self) -> bool {
        matches!(self, Self::FatalAfterAll | Self::BestEffort)
    }

    /// Whether failures halt the run.
    pub const fn halts(self) -> bool {
        matches!(self, Self::Fatal | Self::FatalAfterAll)
    }
}

// ──────────────────────────────────────────────
// Outcomes
// ──────────────────────────────────────────────

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepOutcome {
    /// Step completed.
    Success {
        /// What happened.
        message: String,
    },
    /// Step did not run.
    Skipped {
        /// Why.
        reason: String,
    },
    /// Best-effort step completed with failures.
    Warning {
        /// Summary of the failures.
        message: String,
    },
    /// Fatal step failed.
    Failed {
        /// Error text.
        message: String,
    },
}

/// One failure inside a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    /// Package involved, if any.
    pub package: Option<String>,
    /// Error text.
    pub message: String,
}

impl StepFailure {
    /// Failure not tied to a package.
    pub fn general(message: impl fmt::Display) -> Self {
        Self {
            package: None,
            message: message.to_string(),
        }
    }

    /// Failure for `package`.
    pub fn package(package: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            package: Some(package.into()),
            message: message.to_string(),
        }
    }
}

/// What a step body hands back to the runner.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Outcome when no failures occurred.
    pub outcome: StepOutcome,
    /// Failures encountered.
    pub failures: Vec<StepFailure>,
}

impl StepResult {
    /// Clean success.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Success {
                message: message.into(),
            },
            failures: Vec::new(),
        }
    }

    /// Step did not run.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Skipped {
                reason: reason.into(),
            },
            failures: Vec::new(),
        }
    }

    /// Single failure.
    pub fn failed(failure: StepFailure) -> Self {
        Self {
            outcome: StepOutcome::Failed {
                message: failure.message.clone(),
            },
            failures: vec![failure],
        }
    }

    /// Attach failures to an otherwise successful result.
    #[must_use]
    pub fn with_failures(mut self, failures: Vec<StepFailure>) -> Self {
        self.failures = failures;
        self
    }
}

/// Push step result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    /// Step not reached.
    #[default]
    NotAttempted,
    /// Commit and tags pushed.
    Pushed,
    /// Disabled by flag or config.
    Skipped,
}

/// Hosted release for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRecord {
    /// Package name.
    pub package: String,
    /// Git tag.
    pub tag: String,
    /// Release title.
    pub title: String,
    /// Release notes.
    pub body: String,
    /// URL of the created or reused release.
    pub url: Option<String>,
    /// Why publishing failed.
    pub error: Option<String>,
}

/// Step entry in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepEntry {
    /// Step.
    pub step: ReleaseStep,
    /// Its outcome.
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

// ──────────────────────────────────────────────
// Report accumulator
// ──────────────────────────────────────────────

/// Everything a release run produced.
///
/// Step bodies fill this in through the `record_*` methods; on a fatal
/// failure it travels inside [`PipelineError::Halted`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    /// Step outcomes in execution order.
    pub steps: Vec<StepEntry>,
    /// Version decisions that were applied.
    pub decisions: Vec<VersionBumpDecision>,
    /// Changesets consumed by the release.
    pub consumed_changesets: Vec<String>,
    /// Release commit.
    pub commit: Option<CommitOutcome>,
    /// Tags created or found.
    pub tags: Vec<TagRecord>,
    /// Push result.
    pub push: PushOutcome,
    /// Hosted releases.
    pub releases: Vec<ReleaseRecord>,
    /// Non-fatal failures from best-effort steps.
    pub warnings: Vec<StepFailure>,
}

impl ReleaseReport {
    /// Record the resolved plan.
    pub fn record_decisions(&mut self, decisions: Vec<VersionBumpDecision>, changesets: Vec<String>) {
        self.decisions = decisions;
        self.consumed_changesets = changesets;
    }

    /// Record the release commit.
    pub fn record_commit(&mut self, outcome: CommitOutcome) {
        self.commit = Some(outcome);
    }

    /// Record one tag.
    pub fn record_tag(&mut self, tag: TagRecord) {
        self.tags.push(tag);
    }

    /// Record the push result.
    pub fn record_push(&mut self, outcome: PushOutcome) {
        self.push = outcome;
    }

    /// Record hosted releases.
    pub fn record_releases(&mut self, releases: Vec<ReleaseRecord>) {
        self.releases = releases;
    }

    /// Outcome recorded for `step`, if it ran.
    pub fn outcome(&self, step: ReleaseStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|e| e.step == step)
            .map(|e| &e.outcome)
    }

    /// Apply `step`'s failure policy to `result` and record the outcome.
    ///
    /// Returns the recorded outcome, or [`PipelineError::Halted`] carrying a
    /// copy of the report when the policy says the run must stop.
    pub fn settle(&mut self, step: ReleaseStep, result: StepResult) -> PipelineResult<StepOutcome> {
        let StepResult { outcome, failures } = result;
        if failures.is_empty() {
            self.steps.push(StepEntry {
                step,
                outcome: outcome.clone(),
            });
            return Ok(outcome);
        }

        let summary = failures
            .iter()
            .map(|f| match &f.package {
                Some(p) => format!("{p}: {}", f.message),
                None => f.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");

        if !step.policy().halts() {
            for failure in &failures {
                warn!(%step, package = ?failure.package, message = %failure.message, "best-effort step failed");
            }
            let outcome = StepOutcome::Warning { message: summary };
            self.steps.push(StepEntry {
                step,
                outcome: outcome.clone(),
            });
            self.warnings.extend(failures);
            return Ok(outcome);
        }

        self.steps.push(StepEntry {
            step,
            outcome: StepOutcome::Failed {
                message: summary.clone(),
            },
        });
        let package = failures.first().and_then(|f| f.package.clone());
        let message = if failures.len() == 1 {
            failures[0].message.clone()
        } else {
            summary
        };
        Err(PipelineError::Halted {
            step,
            package,
            message,
            report: Box::new(self.clone()),
        })
    }
}
