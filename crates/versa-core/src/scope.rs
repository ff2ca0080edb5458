//! Attribution of commits and changed files to packages.
//!
//! A commit belongs to a package when its scope token equals the package's
//! directory name. Packages that changed on disk but that no commit names
//! fall back to the range's unscoped commits.

use std::collections::BTreeMap;

use camino::Utf8Path;
use tracing::{debug, instrument};

use crate::version::conventional::ParsedCommit;
use crate::workspace::Package;

/// Name of the synthetic scope for files outside every managed root.
pub const REPO_SCOPE: &str = "repo";

/// Where a changed path belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathScope {
    /// Inside a managed package.
    Package(String),
    /// A file at the repository root.
    Repo,
}

/// Commits attributed to one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    /// Commits in range order.
    pub commits: Vec<ParsedCommit>,
    /// True when attribution came from changed files rather than scopes.
    pub fallback: bool,
}

/// Maps scopes and paths onto managed packages.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    /// (directory name, package name, relative directory)
    entries: Vec<(String, String, String)>,
}

impl ScopeResolver {
    /// Build a resolver for `packages`.
    pub fn new(packages: &[Package]) -> Self {
        let entries = packages
            .iter()
            .map(|p| {
                (
                    p.dir_name().to_string(),
                    p.name.clone(),
                    p.path.as_str().trim_end_matches('/').to_string(),
                )
            })
            .collect();
        Self { entries }
    }

    /// Package named by a commit scope token.
    pub fn resolve_scope(&self, scope: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(dir, _, _)| dir == scope)
            .map(|(_, name, _)| name.as_str())
    }

    /// Package a commit is attributed to by scope.
    pub fn resolve_commit(&self, commit: &ParsedCommit) -> Option<&str> {
        commit.scope().and_then(|s| self.resolve_scope(s))
    }

    /// Scope of a changed path, relative to the repository root.
    ///
    /// Files at the root resolve to [`PathScope::Repo`]; files in
    /// non-package directories resolve to nothing.
    pub fn resolve_path(&self, path: &str) -> Option<PathScope> {
        let path = path.trim_start_matches("./");
        if !path.contains('/') {
            return Some(PathScope::Repo);
        }
        let rel = Utf8Path::new(path);
        self.entries
            .iter()
            .find(|(_, _, dir)| rel.starts_with(dir))
            .map(|(_, name, _)| PathScope::Package(name.clone()))
    }

    /// Attribute a commit range and its changed files to packages.
    ///
    /// Packages with no attributed commits are absent from the result.
    #[instrument(skip_all, fields(commits = commits.len(), files = changed_files.len()))]
    pub fn attribute(
        &self,
        commits: &[ParsedCommit],
        changed_files: &[String],
    ) -> BTreeMap<String, Attribution> {
        let mut out: BTreeMap<String, Attribution> = BTreeMap::new();
        let mut unscoped = Vec::new();

        for commit in commits {
            match (commit.scope(), self.resolve_commit(commit)) {
                (_, Some(package)) => {
                    out.entry(package.to_string())
                        .or_default()
                        .commits
                        .push(commit.clone());
                }
                (None, None) => unscoped.push(commit.clone()),
                (Some(scope), None) => debug!(scope, "scope names no package"),
            }
        }

        for file in changed_files {
            if let Some(PathScope::Package(package)) = self.resolve_path(file)
                && !out.contains_key(&package)
            {
                debug!(%package, %file, "attributing unscoped commits by changed file");
                out.insert(
                    package,
                    Attribution {
                        commits: unscoped.clone(),
                        fallback: true,
                    },
                );
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecosystem::Ecosystem;
    use crate::version::conventional::classify;

    fn packages() -> Vec<Package> {
        [("@acme/ui", "packages/ui"), ("api", "apps/api")]
            .into_iter()
            .map(|(name, path)| Package {
                name: name.into(),
                path: path.into(),
                current_version: "1.0.0".into(),
                ecosystem: Ecosystem::Node,
            })
            .collect()
    }

    #[test]
    fn scope_matches_directory_name() {
        let r = ScopeResolver::new(&packages());
        assert_eq!(r.resolve_scope("ui"), Some("@acme/ui"));
        assert_eq!(r.resolve_scope("api"), Some("api"));
        assert_eq!(r.resolve_scope("docs"), None);
    }

    #[test]
    fn paths_resolve_to_package_or_repo() {
        let r = ScopeResolver::new(&packages());
        assert_eq!(
            r.resolve_path("packages/ui/src/button.ts"),
            Some(PathScope::Package("@acme/ui".into()))
        );
        assert_eq!(r.resolve_path("README.md"), Some(PathScope::Repo));
        assert_eq!(r.resolve_path("docs/guide.md"), None);
        assert_eq!(r.resolve_path("packages/ui-kit/index.ts"), None);
    }

    #[test]
    fn scoped_commits_attach_to_their_package() {
        let r = ScopeResolver::new(&packages());
        let commits = vec![
            classify("a", "feat(ui): add x"),
            classify("b", "fix(docs): typo"),
            classify("c", "fix(ui): correct y"),
        ];
        let out = r.attribute(&commits, &[]);
        assert_eq!(out.len(), 1);
        let ui = &out["@acme/ui"];
        assert!(!ui.fallback);
        assert_eq!(ui.commits.len(), 2);
    }

    #[test]
    fn changed_files_pull_in_unscoped_commits() {
        let r = ScopeResolver::new(&packages());
        let commits = vec![
            classify("a", "feat(ui): add x"),
            classify("b", "chore: bump deps"),
            classify("c", "tweak things"),
        ];
        let files = vec![
            "packages/ui/src/x.ts".to_string(),
            "apps/api/src/main.rs".to_string(),
            "package.json".to_string(),
        ];
        let out = r.attribute(&commits, &files);

        assert_eq!(out["@acme/ui"].commits.len(), 1);
        let api = &out["api"];
        assert!(api.fallback);
        let hashes: Vec<&str> = api.commits.iter().map(ParsedCommit::hash).collect();
        assert_eq!(hashes, ["b", "c"]);
    }
}
