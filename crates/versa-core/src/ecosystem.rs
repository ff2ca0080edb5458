//! Package ecosystems and their manifest conventions.

use serde::{Deserialize, Serialize};
use std::fmt;

use camino::Utf8Path;

/// A recognized package ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// Rust crate (detected via `Cargo.toml`).
    Rust,
    /// Node.js package (detected via `package.json`).
    Node,
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rust => write!(f, "rust"),
            Self::Node => write!(f, "node"),
        }
    }
}

impl Ecosystem {
    /// Filename that signals this ecosystem when found in a directory.
    pub const fn marker_file(self) -> &'static str {
        match self {
            Self::Rust => "Cargo.toml",
            Self::Node => "package.json",
        }
    }

    /// Primary lockfile for this ecosystem, relative to the repository root.
    pub const fn lockfile_path(self) -> &'static str {
        match self {
            Self::Rust => "Cargo.lock",
            Self::Node => "package-lock.json",
        }
    }

    /// Command that regenerates the lockfile without installing anything.
    pub const fn default_lock_command(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["cargo", "update", "--workspace"],
            Self::Node => &["npm", "install", "--package-lock-only", "--ignore-scripts"],
        }
    }

    /// All recognized ecosystems, in detection priority order.
    pub const ALL: &[Self] = &[Self::Node, Self::Rust];

    /// Identify the ecosystem of `dir` by its marker file.
    pub fn detect(dir: &Utf8Path) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|eco| dir.join(eco.marker_file()).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn ecosystem_display() {
        assert_eq!(Ecosystem::Rust.to_string(), "rust");
        assert_eq!(Ecosystem::Node.to_string(), "node");
    }

    #[test]
    fn lockfile_paths() {
        assert_eq!(Ecosystem::Rust.lockfile_path(), "Cargo.lock");
        assert_eq!(Ecosystem::Node.lockfile_path(), "package-lock.json");
    }

    #[test]
    fn default_lock_commands_never_install() {
        assert_eq!(
            Ecosystem::Node.default_lock_command(),
            ["npm", "install", "--package-lock-only", "--ignore-scripts"]
        );
        assert_eq!(
            Ecosystem::Rust.default_lock_command(),
            ["cargo", "update", "--workspace"]
        );
    }

    #[test]
    fn detect_prefers_package_json() {
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        assert_eq!(Ecosystem::detect(&dir), None);

        std::fs::write(dir.join("Cargo.toml"), "[package]\n").unwrap();
        assert_eq!(Ecosystem::detect(&dir), Some(Ecosystem::Rust));

        std::fs::write(dir.join("package.json"), "{}").unwrap();
        assert_eq!(Ecosystem::detect(&dir), Some(Ecosystem::Node));
    }

    #[test]
    fn serde_roundtrip_ecosystem() {
        let json = serde_json::to_string(&Ecosystem::Rust).unwrap();
        assert_eq!(json, "\"rust\"");
        let parsed: Ecosystem = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Ecosystem::Rust);
    }
}
