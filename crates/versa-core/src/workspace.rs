//! Managed package discovery.
//!
//! A package is any immediate subdirectory of a managed root (for example
//! `packages/ui`) that carries a `package.json` or `Cargo.toml` with a name.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::ecosystem::Ecosystem;
use crate::manifest::{ManifestError, ManifestResult, read_manifest};

/// A managed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    /// Declared name; unique across the repository.
    pub name: String,
    /// Directory relative to the repository root, e.g. `packages/ui`.
    pub path: Utf8PathBuf,
    /// Version declared in the manifest.
    pub current_version: String,
    /// Manifest flavour.
    pub ecosystem: Ecosystem,
}

impl Package {
    /// Final path component; the token commit scopes are matched against.
    pub fn dir_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

/// Discover packages under each of `roots`, relative to `repo_root`.
///
/// Missing roots are skipped. Directories without a manifest, or whose
/// manifest lacks a name or literal version, are skipped with a warning.
#[instrument(skip(roots), fields(%repo_root))]
pub fn discover_packages(repo_root: &Utf8Path, roots: &[String]) -> ManifestResult<Vec<Package>> {
    let mut packages: Vec<Package> = Vec::new();
    let mut seen: BTreeMap<String, Utf8PathBuf> = BTreeMap::new();

    for root in roots {
        let abs_root = repo_root.join(root);
        let entries = match abs_root.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%root, "managed root does not exist");
                continue;
            }
            Err(source) => {
                return Err(ManifestError::Io {
                    path: abs_root,
                    source,
                });
            }
        };

        let mut dirs: Vec<Utf8PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|e| !e.file_name().starts_with('.'))
            .map(|e| e.into_path())
            .collect();
        dirs.sort();

        for dir in dirs {
            let Some(ecosystem) = Ecosystem::detect(&dir) else {
                continue;
            };
            let rel = dir
                .strip_prefix(repo_root)
                .map_or_else(|_| dir.clone(), Utf8Path::to_path_buf);
            let info = read_manifest(&dir, ecosystem)?;
            let (Some(name), Some(version)) = (info.name, info.version) else {
                warn!(path = %rel, "manifest has no name or literal version; skipping");
                continue;
            };
            if let Some(first) = seen.get(&name) {
                return Err(ManifestError::DuplicatePackage {
                    name,
                    first: first.clone(),
                    second: rel,
                });
            }
            seen.insert(name.clone(), rel.clone());
            debug!(%name, %version, path = %rel, "discovered package");
            packages.push(Package {
                name,
                path: rel,
                current_version: version,
                ecosystem,
            });
        }
    }

    Ok(packages)
}

/// Map of package name to current version.
pub fn current_versions(packages: &[Package]) -> BTreeMap<String, String> {
    packages
        .iter()
        .map(|p| (p.name.clone(), p.current_version.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Write a Node package with `name` and `version` at `root/rel`.
    pub(crate) fn node_package(root: &Utf8Path, rel: &str, name: &str, version: &str) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("package.json"),
            format!("{{\n  \"name\": \"{name}\",\n  \"version\": \"{version}\"\n}}\n"),
        )
        .unwrap();
    }

    /// Write a Rust crate with `name` and `version` at `root/rel`.
    pub(crate) fn rust_package(root: &Utf8Path, rel: &str, name: &str, version: &str) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("Cargo.toml"),
            format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\nedition = \"2024\"\n"),
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tempfile::TempDir;

    fn roots() -> Vec<String> {
        vec!["packages".into(), "apps".into()]
    }

    #[test]
    fn discovers_packages_across_roots() {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        node_package(&root, "packages/ui", "@acme/ui", "1.4.2");
        rust_package(&root, "packages/api", "api", "0.3.0");
        node_package(&root, "apps/web", "web", "2.0.0");
        std::fs::create_dir_all(root.join("packages/empty")).unwrap();

        let packages = discover_packages(&root, &roots()).unwrap();
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["api", "@acme/ui", "web"]);

        let ui = &packages[1];
        assert_eq!(ui.path, Utf8PathBuf::from("packages/ui"));
        assert_eq!(ui.dir_name(), "ui");
        assert_eq!(ui.ecosystem, Ecosystem::Node);
        assert_eq!(ui.current_version, "1.4.2");
    }

    #[test]
    fn missing_roots_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        assert!(discover_packages(&root, &roots()).unwrap().is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        node_package(&root, "packages/a", "same", "1.0.0");
        node_package(&root, "apps/b", "same", "1.0.0");
        assert!(matches!(
            discover_packages(&root, &roots()),
            Err(ManifestError::DuplicatePackage { .. })
        ));
    }
}
