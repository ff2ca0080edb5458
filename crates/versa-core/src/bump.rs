//! Bump aggregation and changeset drafting.
//!
//! Turns the commits attributed to each package into one bump level with a
//! provenance reason, then drafts the changeset that records those intents.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::changeset::Changeset;
use crate::git::{GitResult, VersionControl};
use crate::scope::{Attribution, ScopeResolver};
use crate::version::BumpLevel;
use crate::version::conventional::{ParsedCommit, classify};
use crate::workspace::Package;

/// Key used when the branch carries no issue token.
pub const FALLBACK_KEY: &str = "changeset";

/// Why a package received its bump.
///
/// Variants are declared in priority order: the first one that applies to a
/// package's commits is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BumpReason {
    /// A commit carried the breaking marker.
    Breaking,
    /// A `feat` commit.
    Feat,
    /// A `fix` commit.
    Fix,
    /// A `perf` commit.
    Perf,
    /// A `refactor` commit.
    Refactor,
    /// Files changed without a scoped commit.
    ChangesDetected,
    /// Nothing bump-relevant.
    NoRelevantChanges,
}

impl fmt::Display for BumpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Breaking => "breaking change detected",
            Self::Feat => "feat commit detected",
            Self::Fix => "fix commit detected",
            Self::Perf => "perf commit detected",
            Self::Refactor => "refactor commit detected",
            Self::ChangesDetected => "changes detected",
            Self::NoRelevantChanges => "no relevant changes",
        })
    }
}

fn reason_for(commit: &ParsedCommit) -> Option<BumpReason> {
    let ParsedCommit::Conventional(c) = commit else {
        return None;
    };
    if c.breaking {
        return Some(BumpReason::Breaking);
    }
    match c.commit_type().as_str() {
        "feat" => Some(BumpReason::Feat),
        "fix" => Some(BumpReason::Fix),
        "perf" => Some(BumpReason::Perf),
        "refactor" => Some(BumpReason::Refactor),
        _ => None,
    }
}

/// The aggregated bump for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageBump {
    /// Package name.
    pub package: String,
    /// Join of all attributed commits.
    pub bump: BumpLevel,
    /// Provenance.
    pub reason: BumpReason,
    /// Commits that contributed, including bump-irrelevant ones.
    pub commits: Vec<ParsedCommit>,
}

/// Reduce one package's attribution to a bump.
pub fn aggregate_package(package: &str, attribution: &Attribution) -> PackageBump {
    let mut bump = BumpLevel::join_all(attribution.commits.iter().map(ParsedCommit::bump));
    let commit_reason = attribution.commits.iter().filter_map(reason_for).min();

    let reason = if attribution.fallback {
        bump = bump.join(BumpLevel::Patch);
        match commit_reason {
            Some(r) if bump > BumpLevel::Patch => r,
            _ => BumpReason::ChangesDetected,
        }
    } else {
        commit_reason.unwrap_or(BumpReason::NoRelevantChanges)
    };

    PackageBump {
        package: package.to_string(),
        bump,
        reason,
        commits: attribution.commits.clone(),
    }
}

/// Aggregate every attributed package, in name order.
///
/// Packages whose bump is `none` are kept: their commits still belong in
/// the changeset body even though they produce no header entry.
#[instrument(skip_all, fields(packages = attributions.len()))]
pub fn aggregate(attributions: &BTreeMap<String, Attribution>) -> Vec<PackageBump> {
    attributions
        .iter()
        .map(|(package, attribution)| {
            let bump = aggregate_package(package, attribution);
            debug!(%package, level = %bump.bump, reason = %bump.reason, "aggregated");
            bump
        })
        .collect()
}

// ──────────────────────────────────────────────
// Drafting
// ──────────────────────────────────────────────

/// Changeset key and issue token derived from a branch name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchKey {
    /// Lowercased key, or [`FALLBACK_KEY`].
    pub key: String,
    /// Uppercased issue token, if one was found.
    pub issue: Option<String>,
}

/// Find the first `<letters>-<digits>` issue token in `branch`.
///
/// `feature/PROD-123-add-x` yields key `prod-123` and issue `PROD-123`.
pub fn key_from_branch(branch: &str) -> BranchKey {
    let segments = branch.split(['/', '_']);
    for segment in segments {
        let parts: Vec<&str> = segment.split('-').collect();
        for pair in parts.windows(2) {
            let (letters, digits) = (pair[0], pair[1]);
            if letters.len() >= 2
                && letters.chars().all(|c| c.is_ascii_alphabetic())
                && !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
            {
                let token = format!("{letters}-{digits}");
                return BranchKey {
                    key: token.to_ascii_lowercase(),
                    issue: Some(token.to_ascii_uppercase()),
                };
            }
        }
    }
    BranchKey {
        key: FALLBACK_KEY.to_string(),
        issue: None,
    }
}

/// Render a changeset body: one section per package, then the issue token.
pub fn render_body(bumps: &[PackageBump], issue: Option<&str>) -> String {
    let mut sections = Vec::new();
    for bump in bumps.iter().filter(|b| !b.commits.is_empty()) {
        let mut section = format!("## {}\n\n", bump.package);
        for commit in &bump.commits {
            section.push_str(&format!("- {}\n", commit.subject()));
        }
        sections.push(section.trim_end().to_string());
    }
    if let Some(issue) = issue {
        sections.push(issue.to_string());
    }
    sections.join("\n\n")
}

/// Draft a changeset from aggregated bumps.
///
/// Returns `None` when no package needs a release, unless `allow_empty` asks
/// for an internal-only changeset.
pub fn draft_changeset(
    branch: &BranchKey,
    bumps: &[PackageBump],
    allow_empty: bool,
) -> Option<Changeset> {
    let header: BTreeMap<String, BumpLevel> = bumps
        .iter()
        .filter(|b| b.bump != BumpLevel::None)
        .map(|b| (b.package.clone(), b.bump))
        .collect();
    if header.is_empty() && !allow_empty {
        debug!("no bump-relevant changes; nothing to draft");
        return None;
    }
    Some(Changeset {
        key: branch.key.clone(),
        bumps: header,
        body: render_body(bumps, branch.issue.as_deref()),
    })
}

/// A changeset drafted from branch history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Draft {
    /// Branch the draft was taken from; `None` on a detached HEAD.
    pub branch: Option<String>,
    /// Issue token found in the branch name.
    pub issue: Option<String>,
    /// Per-package bumps, including packages with no release.
    pub bumps: Vec<PackageBump>,
    /// The changeset to write, if any package needs a release.
    #[serde(skip)]
    pub changeset: Option<Changeset>,
}

/// Classify `base..HEAD`, attribute it to `packages`, and draft a changeset.
#[instrument(skip(vcs, packages), fields(packages = packages.len()))]
pub fn draft_from_history(
    vcs: &dyn VersionControl,
    packages: &[Package],
    base: &str,
    allow_empty: bool,
) -> GitResult<Draft> {
    let branch = vcs.current_branch()?;
    let commits: Vec<ParsedCommit> = vcs
        .commits_since(base)?
        .iter()
        .map(|(hash, subject)| classify(hash, subject))
        .collect();
    let files = vcs.changed_files_since(base)?;

    let attributions = ScopeResolver::new(packages).attribute(&commits, &files);
    let bumps = aggregate(&attributions);
    let key = key_from_branch(branch.as_deref().unwrap_or_default());
    let changeset = draft_changeset(&key, &bumps, allow_empty);

    Ok(Draft {
        branch,
        issue: key.issue,
        bumps,
        changeset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{CommitOutcome, TagRecord};
    use crate::ecosystem::Ecosystem;

    fn scoped(subjects: &[&str]) -> Attribution {
        Attribution {
            commits: subjects
                .iter()
                .enumerate()
                .map(|(i, s)| classify(&format!("h{i}"), s))
                .collect(),
            fallback: false,
        }
    }

    #[test]
    fn feat_and_fix_give_minor() {
        let b = aggregate_package("ui", &scoped(&["feat(ui): add x", "fix(ui): correct y"]));
        assert_eq!(b.bump, BumpLevel::Minor);
        assert_eq!(b.reason, BumpReason::Feat);
        assert_eq!(b.reason.to_string(), "feat commit detected");
    }

    #[test]
    fn breaking_wins_reason_priority() {
        let b = aggregate_package("api", &scoped(&["fix(api): a", "feat(api)!: b"]));
        assert_eq!(b.bump, BumpLevel::Major);
        assert_eq!(b.reason, BumpReason::Breaking);
    }

    #[test]
    fn perf_outranks_refactor() {
        let b = aggregate_package("api", &scoped(&["refactor(api): a", "perf(api): b"]));
        assert_eq!(b.bump, BumpLevel::Patch);
        assert_eq!(b.reason, BumpReason::Perf);
    }

    #[test]
    fn irrelevant_commits_are_kept_with_no_bump() {
        let b = aggregate_package("ui", &scoped(&["docs(ui): readme", "chore(ui): lint"]));
        assert_eq!(b.bump, BumpLevel::None);
        assert_eq!(b.reason, BumpReason::NoRelevantChanges);
        assert_eq!(b.commits.len(), 2);
    }

    #[test]
    fn fallback_floors_at_patch() {
        let mut a = scoped(&["chore: deps", "random subject"]);
        a.fallback = true;
        let b = aggregate_package("api", &a);
        assert_eq!(b.bump, BumpLevel::Patch);
        assert_eq!(b.reason, BumpReason::ChangesDetected);

        let mut a = scoped(&["feat: global thing"]);
        a.fallback = true;
        let b = aggregate_package("api", &a);
        assert_eq!(b.bump, BumpLevel::Minor);
        assert_eq!(b.reason, BumpReason::Feat);
    }

    #[test]
    fn branch_keys() {
        assert_eq!(
            key_from_branch("feature/PROD-123-add-x"),
            BranchKey {
                key: "prod-123".into(),
                issue: Some("PROD-123".into())
            }
        );
        assert_eq!(key_from_branch("eng-42").key, "eng-42");
        assert_eq!(key_from_branch("main").key, FALLBACK_KEY);
        assert_eq!(key_from_branch("main").issue, None);
    }

    #[test]
    fn draft_renders_header_and_body() {
        let ui = aggregate_package("ui", &scoped(&["feat(ui): add x"]));
        let docs = aggregate_package("site", &scoped(&["docs(site): typo"]));
        let branch = key_from_branch("PROD-7-x");
        let cs = draft_changeset(&branch, &[ui, docs], false).unwrap();
        assert_eq!(cs.key, "prod-7");
        assert_eq!(cs.bumps.len(), 1);
        assert_eq!(cs.bumps["ui"], BumpLevel::Minor);
        assert_eq!(
            cs.body,
            "## ui\n\n- feat(ui): add x\n\n## site\n\n- docs(site): typo\n\nPROD-7"
        );
    }

    #[test]
    fn nothing_relevant_drafts_nothing_unless_empty_allowed() {
        let docs = aggregate_package("site", &scoped(&["docs(site): typo"]));
        let branch = key_from_branch("main");
        assert!(draft_changeset(&branch, std::slice::from_ref(&docs), false).is_none());
        let cs = draft_changeset(&branch, &[docs], true).unwrap();
        assert!(cs.bumps.is_empty());
        assert_eq!(cs.key, "changeset");
    }

    struct History {
        branch: Option<&'static str>,
        commits: Vec<(&'static str, &'static str)>,
        files: Vec<&'static str>,
    }

    impl VersionControl for History {
        fn current_branch(&self) -> GitResult<Option<String>> {
            Ok(self.branch.map(str::to_string))
        }
        fn commits_since(&self, _base: &str) -> GitResult<Vec<(String, String)>> {
            Ok(self
                .commits
                .iter()
                .map(|(h, s)| ((*h).to_string(), (*s).to_string()))
                .collect())
        }
        fn changed_files_since(&self, _base: &str) -> GitResult<Vec<String>> {
            Ok(self.files.iter().map(|f| (*f).to_string()).collect())
        }
        fn tag_exists(&self, _name: &str) -> GitResult<bool> {
            Ok(false)
        }
        fn create_tag(&self, name: &str, _message: &str) -> GitResult<TagRecord> {
            Ok(TagRecord {
                name: name.to_string(),
                created: true,
            })
        }
        fn commit_all(&self, _message: &str) -> GitResult<CommitOutcome> {
            Ok(CommitOutcome::NothingToCommit)
        }
        fn push(&self, _tags: &[String]) -> GitResult<()> {
            Ok(())
        }
    }

    fn packages() -> Vec<Package> {
        ["ui", "api"]
            .iter()
            .map(|name| Package {
                name: (*name).to_string(),
                path: format!("packages/{name}").into(),
                current_version: "1.0.0".into(),
                ecosystem: Ecosystem::Node,
            })
            .collect()
    }

    #[test]
    fn drafts_from_branch_history() {
        let vcs = History {
            branch: Some("feature/PROD-123-add-x"),
            commits: vec![
                ("a1", "feat(ui): add x"),
                ("b2", "fix(ui): correct y"),
                ("c3", "chore: bump deps"),
            ],
            files: vec!["packages/ui/a.ts", "packages/api/lib.ts", "README.md"],
        };
        let draft = draft_from_history(&vcs, &packages(), "main", false).unwrap();
        assert_eq!(draft.issue.as_deref(), Some("PROD-123"));

        let cs = draft.changeset.unwrap();
        assert_eq!(cs.key, "prod-123");
        assert_eq!(cs.bumps["ui"], BumpLevel::Minor);
        assert_eq!(cs.bumps["api"], BumpLevel::Patch);
        assert!(cs.body.ends_with("PROD-123"));
        assert!(cs.body.contains("## api\n\n- chore: bump deps"));
    }

    #[test]
    fn detached_head_uses_fallback_key() {
        let vcs = History {
            branch: None,
            commits: vec![("a1", "feat(api): add endpoint")],
            files: vec!["packages/api/lib.ts"],
        };
        let draft = draft_from_history(&vcs, &packages(), "main", false).unwrap();
        assert_eq!(draft.branch, None);
        assert_eq!(draft.changeset.unwrap().key, FALLBACK_KEY);
    }
}
