//! Command implementations

pub mod changeset;

pub mod info;

pub mod pre;

pub mod release;

pub mod status;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;
use versa_core::changeset::ChangesetStore;
use versa_core::config::Config;
use versa_core::prerelease::FilePrereleaseStore;
use versa_core::workspace::{Package, discover_packages};

/// Closest ancestor of `cwd` that holds `.git`, or `cwd` itself.
pub fn repo_root(cwd: &Utf8Path) -> Utf8PathBuf {
    cwd.ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(cwd)
        .to_path_buf()
}

/// Packages and stores shared by the repository commands.
#[derive(Debug)]
pub struct Repo {
    /// Repository root.
    pub root: Utf8PathBuf,
    /// Discovered packages.
    pub packages: Vec<Package>,
    /// Pending changesets.
    pub changesets: ChangesetStore,
    /// Prerelease state.
    pub prerelease: FilePrereleaseStore,
}

impl Repo {
    /// Discover packages and open the stores configured for this repository.
    pub fn open(config: &Config, cwd: &Utf8Path) -> anyhow::Result<Self> {
        let root = repo_root(cwd);
        let packages = discover_packages(&root, &config.packages.roots)
            .context("failed to discover packages")?;
        debug!(%root, packages = packages.len(), "repository opened");
        Ok(Self {
            changesets: ChangesetStore::new(config.changeset_dir(&root)),
            prerelease: FilePrereleaseStore::new(config.prerelease_state_file(&root)),
            packages,
            root,
        })
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn repo_root_walks_up_to_git() {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        std::fs::create_dir(root.join(".git")).unwrap();
        let deep = root.join("packages/ui/src");
        std::fs::create_dir_all(&deep).unwrap();
        assert_eq!(repo_root(&deep), root);
    }

    #[test]
    fn repo_root_without_git_is_cwd() {
        let tmp = TempDir::new().unwrap();
        let cwd = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        assert_eq!(repo_root(&cwd), cwd);
    }
}
