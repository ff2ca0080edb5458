//! Release orchestrator.
//!
//! All orchestration logic lives here. The CLI is purely a display layer.
//!
//! # Two-phase workflow
//!
//! 1. **Plan** ([`plan_release`]) consumes pending changesets into
//!    [`VersionBumpDecision`]s. Nothing is written; the plan can be rendered
//!    as an [`AnalysisReport`] for dry runs and confirmation prompts.
//! 2. **Execute** ([`execute`]) runs the remaining steps through the
//!    [`ReleaseReport::settle`] policy runner, emitting [`ReleaseEvent`]s
//!    for progress display.
//!
//! [`run_release`] ties both together and turns dry runs and declined
//! confirmations into [`RunOutcome`] values instead of exits.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use semver::Version;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::bump::key_from_branch;
use crate::changeset::{Changeset, ChangesetStore};
use crate::git::VersionControl;
use crate::hosting::{ReleaseHost, ReleaseRequest};
use crate::manifest::{LockOutcome, Manifests};
use crate::pipeline::{
    FailurePolicy, PipelineError, PipelineResult, PushOutcome, ReleaseRecord, ReleaseReport,
    ReleaseStep, StepEntry, StepFailure, StepOutcome, StepResult,
};
use crate::prerelease::{PrereleaseState, PrereleaseStore, PrereleaseTag};
use crate::version::{BumpLevel, resolve_version};
use crate::workspace::Package;

/// Message of the release commit.
pub const RELEASE_COMMIT_MESSAGE: &str = "chore(release): version packages";

// ──────────────────────────────────────────────
// Inputs
// ──────────────────────────────────────────────

/// Options controlling which steps run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Stop after analysis.
    pub dry_run: bool,
    /// Push the commit and tags.
    pub push: bool,
    /// Create hosted releases.
    pub publish: bool,
    /// Create hosted releases as drafts.
    pub draft: bool,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            push: true,
            publish: true,
            draft: false,
        }
    }
}

/// Collaborators the release talks to.
#[derive(Clone, Copy)]
pub struct ReleasePorts<'a> {
    /// Managed packages.
    pub packages: &'a [Package],
    /// Pending changesets.
    pub changesets: &'a ChangesetStore,
    /// Prerelease state.
    pub prerelease: &'a dyn PrereleaseStore,
    /// Version control.
    pub vcs: &'a dyn VersionControl,
    /// Hosted releases.
    pub host: &'a dyn ReleaseHost,
    /// Manifest, changelog, and lockfile edits.
    pub manifests: &'a dyn Manifests,
}

// ──────────────────────────────────────────────
// Plan types
// ──────────────────────────────────────────────

/// The version decision for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionBumpDecision {
    /// Package name.
    pub package: String,
    /// Version before the release.
    pub old_version: String,
    /// Version being released.
    pub new_version: Version,
    /// Joined bump across contributing changesets.
    pub bump: BumpLevel,
    /// Whether `new_version` carries a prerelease suffix.
    pub prerelease: bool,
    /// Markdown prepended to the package changelog.
    pub changelog_entry: String,
    /// Git tag, `{package}@{version}`.
    pub tag: String,
    /// Keys of the changesets that bumped this package.
    pub changesets: Vec<String>,
}

/// A resolved release, not yet applied.
#[derive(Debug, Clone)]
pub struct ReleasePlan {
    /// Decisions in package-name order.
    pub decisions: Vec<VersionBumpDecision>,
    /// Every changeset being consumed, internal-only ones included.
    pub changesets: Vec<String>,
    /// Prerelease state when planning started.
    pub state_before: PrereleaseState,
    /// Prerelease state to persist on apply.
    pub state_after: PrereleaseState,
}

impl ReleasePlan {
    /// Whether there is nothing pending at all.
    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    /// Describe the plan without side effects.
    pub fn analysis(&self, options: &ReleaseOptions) -> AnalysisReport {
        let packages_to_release = self
            .decisions
            .iter()
            .map(|d| PackageAnalysis {
                name: d.package.clone(),
                current_version: d.old_version.clone(),
                new_version: d.new_version.to_string(),
                bump: d.bump,
                changelog_entry: d.changelog_entry.clone(),
                tag: d.tag.clone(),
                github_release: HostedReleasePreview {
                    tag: d.tag.clone(),
                    title: d.tag.clone(),
                    prerelease: d.prerelease,
                },
            })
            .collect();

        let n = self.decisions.len();
        let describe = |step: ReleaseStep| -> String {
            match step {
                ReleaseStep::Resolve => format!(
                    "{n} package(s) from {} changeset(s)",
                    self.changesets.len()
                ),
                ReleaseStep::Apply => {
                    let mut action = format!(
                        "write {n} version(s) and changelog(s), delete {} changeset(s)",
                        self.changesets.len()
                    );
                    if self.state_after != self.state_before {
                        action.push_str(", persist prerelease state");
                    }
                    action
                }
                ReleaseStep::Lock => "regenerate lock artifact".to_string(),
                ReleaseStep::Commit => format!("commit {RELEASE_COMMIT_MESSAGE:?}"),
                ReleaseStep::Tag => format!("create {n} tag(s)"),
                ReleaseStep::Push if !options.push => "skipped (push disabled)".to_string(),
                ReleaseStep::Push => "push commit and tags".to_string(),
                ReleaseStep::Publish if !options.publish => {
                    "skipped (publish disabled)".to_string()
                }
                ReleaseStep::Publish => format!("create {n} hosted release(s)"),
            }
        };

        AnalysisReport {
            prerelease_mode: self.state_before.mode.tag(),
            pending_changesets: self.changesets.clone(),
            packages_to_release,
            commit_message: RELEASE_COMMIT_MESSAGE.to_string(),
            steps: ReleaseStep::ALL
                .iter()
                .map(|&step| PlannedStep {
                    step,
                    policy: step.policy(),
                    action: describe(step),
                })
                .collect(),
        }
    }
}

/// Side-effect-free description of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    /// Active prerelease tag; `null` when stable.
    pub prerelease_mode: Option<PrereleaseTag>,
    /// Changesets that would be consumed.
    pub pending_changesets: Vec<String>,
    /// Packages that would be released.
    pub packages_to_release: Vec<PackageAnalysis>,
    /// Release commit message.
    pub commit_message: String,
    /// What each step would do.
    pub steps: Vec<PlannedStep>,
}

/// One package in an [`AnalysisReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageAnalysis {
    /// Package name.
    pub name: String,
    /// Current version.
    pub current_version: String,
    /// Version that would be released.
    pub new_version: String,
    /// Bump level.
    pub bump: BumpLevel,
    /// Changelog entry.
    pub changelog_entry: String,
    /// Git tag.
    pub tag: String,
    /// Hosted release that would be created.
    pub github_release: HostedReleasePreview,
}

/// Hosted release preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedReleasePreview {
    /// Git tag.
    pub tag: String,
    /// Title.
    pub title: String,
    /// Prerelease flag.
    pub prerelease: bool,
}

/// A step as described by analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    /// Step.
    pub step: ReleaseStep,
    /// Its failure policy.
    pub policy: FailurePolicy,
    /// What it would do.
    pub action: String,
}

// ──────────────────────────────────────────────
// Plan
// ──────────────────────────────────────────────

fn resolve_halt(package: Option<String>, message: String) -> PipelineError {
    PipelineError::Halted {
        step: ReleaseStep::Resolve,
        package,
        message: message.clone(),
        report: Box::new(ReleaseReport {
            steps: vec![StepEntry {
                step: ReleaseStep::Resolve,
                outcome: StepOutcome::Failed { message },
            }],
            ..ReleaseReport::default()
        }),
    }
}

/// Consume pending changesets into version decisions.
///
/// Reads only. Prerelease counters advance on a copy of the state that
/// [`execute`] persists during the apply step.
#[instrument(skip_all, fields(packages = packages.len()))]
pub fn plan_release(
    packages: &[Package],
    changesets: &ChangesetStore,
    prerelease: &dyn PrereleaseStore,
) -> PipelineResult<ReleasePlan> {
    let pending = changesets
        .read_all()
        .map_err(|e| resolve_halt(None, e.to_string()))?;

    let mut bumps: BTreeMap<&str, (BumpLevel, Vec<&Changeset>)> = BTreeMap::new();
    for changeset in &pending {
        for (package, level) in &changeset.bumps {
            if !packages.iter().any(|p| &p.name == package) {
                return Err(resolve_halt(
                    Some(package.clone()),
                    format!(
                        "changeset {:?} names unknown package {package:?}",
                        changeset.key
                    ),
                ));
            }
            if *level == BumpLevel::None {
                continue;
            }
            let entry = bumps
                .entry(package.as_str())
                .or_insert((BumpLevel::None, Vec::new()));
            entry.0 = entry.0.join(*level);
            entry.1.push(changeset);
        }
    }

    let state_before = prerelease.read();
    let mut state_after = state_before.clone();
    let mut decisions = Vec::new();

    for (name, (bump, contributing)) in bumps {
        let Some(package) = packages.iter().find(|p| p.name == name) else {
            continue;
        };
        let next = resolve_version(name, &package.current_version, bump, &mut state_after)
            .map_err(|e| resolve_halt(Some(name.to_string()), e.to_string()))?;
        let Some(new_version) = next else {
            continue;
        };

        let tag = format!("{name}@{new_version}");
        debug!(package = name, %bump, %new_version, "resolved");
        decisions.push(VersionBumpDecision {
            package: name.to_string(),
            old_version: package.current_version.clone(),
            prerelease: !new_version.pre.is_empty(),
            changelog_entry: changelog_entry(&new_version, name, &contributing),
            tag,
            bump,
            changesets: contributing.iter().map(|c| c.key.clone()).collect(),
            new_version,
        });
    }

    let keys: Vec<String> = pending.iter().map(|c| c.key.clone()).collect();
    state_after.record_changesets(keys.iter().map(String::as_str));

    info!(
        decisions = decisions.len(),
        changesets = keys.len(),
        "release planned"
    );
    Ok(ReleasePlan {
        decisions,
        changesets: keys,
        state_before,
        state_after,
    })
}

/// Notes a changeset contributes to `package`'s changelog.
///
/// A `## <package>` section wins; a body without any sections applies to
/// every package it bumps. Bare issue tokens are dropped.
pub fn notes_for(changeset: &Changeset, package: &str) -> Vec<String> {
    let is_issue = |line: &str| key_from_branch(line).issue.as_deref() == Some(line);
    let bullet = |line: &str| {
        let text = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line);
        format!("- {text}")
    };

    let lines: Vec<&str> = changeset.body.lines().map(str::trim).collect();
    let heading = format!("## {package}");
    if let Some(start) = lines.iter().position(|l| *l == heading) {
        return lines[start + 1..]
            .iter()
            .take_while(|l| !l.starts_with("## "))
            .filter(|l| l.starts_with("- ") || l.starts_with("* "))
            .map(|l| bullet(l))
            .collect();
    }
    if lines.iter().any(|l| l.starts_with("## ")) {
        return Vec::new();
    }
    lines
        .iter()
        .filter(|l| !l.is_empty() && !is_issue(l))
        .map(|l| bullet(l))
        .collect()
}

/// Render the changelog entry for one package.
pub fn changelog_entry(version: &Version, package: &str, changesets: &[&Changeset]) -> String {
    let mut groups: BTreeMap<BumpLevel, Vec<String>> = BTreeMap::new();
    for changeset in changesets {
        let level = changeset.bumps.get(package).copied().unwrap_or_default();
        groups
            .entry(level)
            .or_default()
            .extend(notes_for(changeset, package));
    }

    let mut out = format!("## {version}\n");
    for (level, notes) in groups.iter().rev() {
        if notes.is_empty() {
            continue;
        }
        let heading = match level {
            BumpLevel::Major => "Major Changes",
            BumpLevel::Minor => "Minor Changes",
            BumpLevel::Patch | BumpLevel::None => "Patch Changes",
        };
        out.push_str(&format!("\n### {heading}\n\n{}\n", notes.join("\n")));
    }
    if groups.values().all(Vec::is_empty) {
        out.push_str("\n- Version bump only.\n");
    }
    out
}

// ──────────────────────────────────────────────
// Execute
// ──────────────────────────────────────────────

/// Progress events for display.
#[derive(Debug, Clone)]
pub enum ReleaseEvent {
    /// A step has started.
    StepStarted(ReleaseStep),
    /// A step has finished.
    StepCompleted(ReleaseStep, StepOutcome),
}

fn run_step(
    report: &mut ReleaseReport,
    on_event: &mut impl FnMut(ReleaseEvent),
    step: ReleaseStep,
    body: impl FnOnce(&mut ReleaseReport) -> StepResult,
) -> PipelineResult<()> {
    on_event(ReleaseEvent::StepStarted(step));
    let result = body(report);
    match report.settle(step, result) {
        Ok(outcome) => {
            on_event(ReleaseEvent::StepCompleted(step, outcome));
            Ok(())
        }
        Err(e) => {
            let PipelineError::Halted { message, .. } = &e;
            on_event(ReleaseEvent::StepCompleted(
                step,
                StepOutcome::Failed {
                    message: message.clone(),
                },
            ));
            Err(e)
        }
    }
}

/// Apply a plan: steps 2 through 7.
#[instrument(skip_all, fields(decisions = plan.decisions.len()))]
pub fn execute(
    plan: ReleasePlan,
    ports: &ReleasePorts<'_>,
    options: &ReleaseOptions,
    mut on_event: impl FnMut(ReleaseEvent),
) -> PipelineResult<ReleaseReport> {
    let mut report = ReleaseReport::default();
    report.record_decisions(plan.decisions.clone(), plan.changesets.clone());
    let decisions = &plan.decisions;

    run_step(&mut report, &mut on_event, ReleaseStep::Resolve, |_| {
        StepResult::success(format!(
            "{} package(s) from {} changeset(s)",
            decisions.len(),
            plan.changesets.len()
        ))
    })?;

    run_step(&mut report, &mut on_event, ReleaseStep::Apply, |_| {
        apply(&plan, ports)
    })?;

    run_step(&mut report, &mut on_event, ReleaseStep::Lock, |_| {
        match ports.manifests.regenerate_lock() {
            Ok(LockOutcome::Regenerated { command }) => StepResult::success(command),
            Ok(LockOutcome::Skipped) => StepResult::skipped("no lock command for this repository"),
            Err(e) => StepResult::failed(StepFailure::general(e)),
        }
    })?;

    run_step(&mut report, &mut on_event, ReleaseStep::Commit, |report| {
        match ports.vcs.commit_all(RELEASE_COMMIT_MESSAGE) {
            Ok(outcome) => {
                let message = match &outcome {
                    crate::git::CommitOutcome::Committed(hash) => format!("committed {hash}"),
                    crate::git::CommitOutcome::NothingToCommit => "nothing to commit".to_string(),
                };
                report.record_commit(outcome);
                StepResult::success(message)
            }
            Err(e) => StepResult::failed(StepFailure::general(e)),
        }
    })?;

    run_step(&mut report, &mut on_event, ReleaseStep::Tag, |report| {
        if decisions.is_empty() {
            return StepResult::skipped("no packages to tag");
        }
        let keep_going = ReleaseStep::Tag.policy().continues_after_failure();
        let mut failures = Vec::new();
        for d in decisions {
            match ports.vcs.create_tag(&d.tag, &d.tag) {
                Ok(tag) => report.record_tag(tag),
                Err(e) => {
                    failures.push(StepFailure::package(&d.package, e));
                    if !keep_going {
                        break;
                    }
                }
            }
        }
        let created = report.tags.iter().filter(|t| t.created).count();
        let existing = report.tags.len() - created;
        StepResult::success(format!("{created} created, {existing} already existed"))
            .with_failures(failures)
    })?;

    run_step(&mut report, &mut on_event, ReleaseStep::Push, |report| {
        if !options.push {
            report.record_push(PushOutcome::Skipped);
            return StepResult::skipped("push disabled");
        }
        let tags: Vec<String> = decisions.iter().map(|d| d.tag.clone()).collect();
        match ports.vcs.push(&tags) {
            Ok(()) => {
                report.record_push(PushOutcome::Pushed);
                StepResult::success(format!("pushed commit and {} tag(s)", tags.len()))
            }
            Err(e) => StepResult::failed(StepFailure::general(e)),
        }
    })?;

    run_step(&mut report, &mut on_event, ReleaseStep::Publish, |report| {
        if !options.publish {
            return StepResult::skipped("publish disabled");
        }
        if decisions.is_empty() {
            return StepResult::skipped("no packages to publish");
        }
        let records = publish(ports.host, decisions, options.draft);
        let failures: Vec<StepFailure> = records
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| StepFailure::package(&r.package, e))
            })
            .collect();
        let published = records.len() - failures.len();
        report.record_releases(records);
        StepResult::success(format!(
            "{published} of {} release(s) published",
            decisions.len()
        ))
        .with_failures(failures)
    })?;

    info!(
        released = report.decisions.len(),
        warnings = report.warnings.len(),
        "release complete"
    );
    Ok(report)
}

fn apply(plan: &ReleasePlan, ports: &ReleasePorts<'_>) -> StepResult {
    let mut targets = Vec::with_capacity(plan.decisions.len());
    for d in &plan.decisions {
        let Some(package) = ports.packages.iter().find(|p| p.name == d.package) else {
            return StepResult::failed(StepFailure::package(&d.package, "package not found"));
        };
        // Every manifest must still hold the planned version before any is written.
        match ports.manifests.read_version(package) {
            Ok(on_disk) if on_disk == d.old_version => targets.push((package, d)),
            Ok(on_disk) => {
                return StepResult::failed(StepFailure::package(
                    &d.package,
                    format!("manifest version is {on_disk}, expected {}", d.old_version),
                ));
            }
            Err(e) => return StepResult::failed(StepFailure::package(&d.package, e)),
        }
    }

    for (package, d) in targets {
        if let Err(e) = ports.manifests.write_version(package, &d.new_version) {
            return StepResult::failed(StepFailure::package(&d.package, e));
        }
        if let Err(e) = ports.manifests.prepend_changelog(package, &d.changelog_entry) {
            return StepResult::failed(StepFailure::package(&d.package, e));
        }
    }

    if plan.state_after != plan.state_before
        && let Err(e) = ports
            .prerelease
            .compare_and_swap(&plan.state_before, &plan.state_after)
    {
        return StepResult::failed(StepFailure::general(e));
    }

    for key in &plan.changesets {
        if let Err(e) = ports.changesets.remove(key) {
            return StepResult::failed(StepFailure::general(e));
        }
    }

    StepResult::success(format!(
        "{} version(s) written, {} changeset(s) consumed",
        plan.decisions.len(),
        plan.changesets.len()
    ))
}

fn release_record(d: &VersionBumpDecision, url: Option<String>, error: Option<String>) -> ReleaseRecord {
    ReleaseRecord {
        package: d.package.clone(),
        tag: d.tag.clone(),
        title: d.tag.clone(),
        body: d.changelog_entry.clone(),
        url,
        error,
    }
}

fn publish_one(host: &dyn ReleaseHost, d: &VersionBumpDecision, draft: bool) -> ReleaseRecord {
    match host.existing_release(&d.tag) {
        Ok(Some(url)) => {
            debug!(tag = %d.tag, %url, "reusing existing release");
            return release_record(d, Some(url), None);
        }
        Ok(None) => {}
        Err(e) => return release_record(d, None, Some(e.to_string())),
    }
    let request = ReleaseRequest {
        tag: d.tag.clone(),
        title: d.tag.clone(),
        body: d.changelog_entry.clone(),
        prerelease: d.prerelease,
        draft,
    };
    match host.create_release(&request) {
        Ok(url) => release_record(d, Some(url), None),
        Err(e) => release_record(d, None, Some(e.to_string())),
    }
}

/// Create hosted releases, one thread per package.
fn publish(
    host: &dyn ReleaseHost,
    decisions: &[VersionBumpDecision],
    draft: bool,
) -> Vec<ReleaseRecord> {
    if let Err(e) = host.check_auth() {
        let message = e.to_string();
        return decisions
            .iter()
            .map(|d| release_record(d, None, Some(message.clone())))
            .collect();
    }

    let records = Mutex::new(Vec::with_capacity(decisions.len()));
    std::thread::scope(|s| {
        for d in decisions {
            let records = &records;
            s.spawn(move || {
                let record = publish_one(host, d, draft);
                records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(record);
            });
        }
    });

    let mut records = records
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    records.sort_by(|a, b| a.package.cmp(&b.package));
    records
}

// ──────────────────────────────────────────────
// Run
// ──────────────────────────────────────────────

/// Answer to the pre-apply confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Go ahead.
    Proceed,
    /// Stop with no side effects.
    Cancelled,
}

/// How a release run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// No pending changesets.
    NothingToRelease,
    /// Dry run: the plan, described.
    Analysis(AnalysisReport),
    /// Confirmation declined before anything was written.
    Cancelled(AnalysisReport),
    /// The release ran.
    Released(ReleaseReport),
}

/// Plan, confirm, and execute a release.
pub fn run_release(
    ports: &ReleasePorts<'_>,
    options: &ReleaseOptions,
    confirm: impl FnOnce(&AnalysisReport) -> Confirmation,
    on_event: impl FnMut(ReleaseEvent),
) -> PipelineResult<RunOutcome> {
    let plan = plan_release(ports.packages, ports.changesets, ports.prerelease)?;
    if plan.is_empty() {
        info!("no pending changesets");
        return Ok(RunOutcome::NothingToRelease);
    }

    let analysis = plan.analysis(options);
    if options.dry_run {
        return Ok(RunOutcome::Analysis(analysis));
    }
    if confirm(&analysis) == Confirmation::Cancelled {
        info!("release cancelled before apply");
        return Ok(RunOutcome::Cancelled(analysis));
    }

    execute(plan, ports, options, on_event).map(RunOutcome::Released)
}
