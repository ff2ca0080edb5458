//! Package manifests, changelogs, and lockfiles.
//!
//! The [`Manifests`] port is what the release pipeline writes through.
//! [`FsManifests`] edits files in place. `Cargo.toml` goes through
//! `toml_edit`, so comments and layout survive; `package.json` is re-rendered
//! with its original key order and indent unit.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Toml};
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml_edit::{DocumentMut, Item};
use tracing::{debug, info, instrument};

use crate::ecosystem::Ecosystem;
use crate::process::{self, ToolError};
use crate::workspace::Package;

/// Errors from manifest operations.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Filesystem failure.
    #[error("manifest I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Manifest could not be parsed.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying parse error.
        source: Box<figment::Error>,
    },

    /// `Cargo.toml` is not valid TOML.
    #[error("failed to edit {path}: {source}")]
    Toml {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying TOML error.
        source: Box<toml_edit::TomlError>,
    },

    /// `package.json` is not valid JSON.
    #[error("failed to edit {path}: {source}")]
    Json {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Manifest has no literal version to replace.
    #[error("no version field found in {0}")]
    VersionNotFound(Utf8PathBuf),

    /// Two packages share a name.
    #[error("duplicate package name {name:?} at {first} and {second}")]
    DuplicatePackage {
        /// Package name.
        name: String,
        /// First directory.
        first: Utf8PathBuf,
        /// Second directory.
        second: Utf8PathBuf,
    },

    /// Lock regeneration failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Result alias for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

fn io_err(path: &Utf8Path, source: std::io::Error) -> ManifestError {
    ManifestError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ──────────────────────────────────────────────
// Reading
// ──────────────────────────────────────────────

/// Name and version as declared in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestInfo {
    /// Declared name.
    pub name: Option<String>,
    /// Declared literal version.
    pub version: Option<String>,
}

#[derive(Deserialize)]
struct NodeManifest {
    name: Option<String>,
    version: Option<String>,
}

#[derive(Deserialize)]
struct CargoManifest {
    package: Option<CargoPackage>,
}

#[derive(Deserialize)]
struct CargoPackage {
    name: Option<String>,
    version: Option<figment::value::Value>,
}

/// Read the name and version from the manifest in `dir`.
pub fn read_manifest(dir: &Utf8Path, ecosystem: Ecosystem) -> ManifestResult<ManifestInfo> {
    let path = dir.join(ecosystem.marker_file());
    let parse_err = |e: figment::Error| ManifestError::Parse {
        path: path.clone(),
        source: Box::new(e),
    };
    match ecosystem {
        Ecosystem::Node => {
            let m: NodeManifest = Figment::from(Json::file(&path))
                .extract()
                .map_err(parse_err)?;
            Ok(ManifestInfo {
                name: m.name,
                version: m.version,
            })
        }
        Ecosystem::Rust => {
            let m: CargoManifest = Figment::from(Toml::file(&path))
                .extract()
                .map_err(parse_err)?;
            let Some(pkg) = m.package else {
                return Ok(ManifestInfo::default());
            };
            Ok(ManifestInfo {
                name: pkg.name,
                // `version.workspace = true` is a table, not a literal.
                version: pkg.version.and_then(|v| v.as_str().map(str::to_string)),
            })
        }
    }
}

// ──────────────────────────────────────────────
// Editing
// ──────────────────────────────────────────────

/// Replace the top-level `"version"` string in `package.json` text.
///
/// Key order and the file's indentation unit are kept. Returns `Ok(None)`
/// when there is no top-level string version to replace.
pub fn set_node_version(raw: &str, version: &str) -> serde_json::Result<Option<String>> {
    let mut doc: serde_json::Value = serde_json::from_str(raw)?;
    let Some(slot) = doc.get_mut("version").filter(|v| v.is_string()) else {
        return Ok(None);
    };
    *slot = serde_json::Value::String(version.to_string());

    let mut buf = Vec::with_capacity(raw.len());
    let formatter = serde_json::ser::PrettyFormatter::with_indent(json_indent(raw).as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    doc.serialize(&mut ser)?;
    let mut out = String::from_utf8_lossy(&buf).into_owned();
    if raw.ends_with('\n') {
        out.push('\n');
    }
    Ok(Some(out))
}

fn json_indent(raw: &str) -> &str {
    raw.lines()
        .skip(1)
        .map(|line| &line[..line.len() - line.trim_start().len()])
        .find(|ws| !ws.is_empty())
        .unwrap_or("  ")
}

/// Replace the literal `version` of the `[package]` table in `Cargo.toml`.
///
/// Comments and layout survive. Returns `Ok(None)` when the version is
/// missing or inherited (`version.workspace = true`).
pub fn set_cargo_version(raw: &str, version: &str) -> Result<Option<String>, toml_edit::TomlError> {
    let mut doc: DocumentMut = raw.parse()?;
    let Some(current) = doc
        .get_mut("package")
        .and_then(|package| package.get_mut("version"))
        .and_then(Item::as_value_mut)
        .filter(|v| v.is_str())
    else {
        return Ok(None);
    };
    let decor = current.decor().clone();
    *current = toml_edit::Value::from(version);
    *current.decor_mut() = decor;
    Ok(Some(doc.to_string()))
}

/// Insert `entry` below the top-level heading of a changelog.
pub fn prepend_changelog_text(existing: Option<&str>, title: &str, entry: &str) -> String {
    let entry = entry.trim();
    let Some(existing) = existing.filter(|e| !e.trim().is_empty()) else {
        return format!("# {title}\n\n{entry}\n");
    };
    if let Some(first_line) = existing.lines().next()
        && first_line.starts_with("# ")
    {
        let rest = existing[first_line.len()..].trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return format!("{first_line}\n\n{entry}\n");
        }
        return format!("{first_line}\n\n{entry}\n\n{rest}");
    }
    format!("{entry}\n\n{existing}")
}

// ──────────────────────────────────────────────
// Port
// ──────────────────────────────────────────────

/// What lock regeneration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The command ran.
    Regenerated {
        /// Command line that ran.
        command: String,
    },
    /// No lock command applies to this repository.
    Skipped,
}

/// File edits performed during a release.
pub trait Manifests {
    /// Current literal version of `package`.
    fn read_version(&self, package: &Package) -> ManifestResult<String>;

    /// Replace the version of `package`.
    fn write_version(&self, package: &Package, version: &Version) -> ManifestResult<()>;

    /// Prepend a changelog entry for `package`.
    fn prepend_changelog(&self, package: &Package, entry: &str) -> ManifestResult<()>;

    /// Regenerate the repository lock artifact.
    fn regenerate_lock(&self) -> ManifestResult<LockOutcome>;
}

/// Filesystem-backed [`Manifests`].
#[derive(Debug, Clone)]
pub struct FsManifests {
    root: Utf8PathBuf,
    lock_command: Option<String>,
    timeout: Duration,
}

impl FsManifests {
    /// Manifests under `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_command: None,
            timeout: process::DEFAULT_TIMEOUT,
        }
    }

    /// Override the lock command.
    #[must_use]
    pub fn with_lock_command(mut self, command: Option<String>) -> Self {
        self.lock_command = command;
        self
    }

    /// Timeout for the lock command.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn package_dir(&self, package: &Package) -> Utf8PathBuf {
        self.root.join(&package.path)
    }

    fn lock_argv(&self) -> Option<Vec<String>> {
        if let Some(cmd) = &self.lock_command {
            let argv: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
            return (!argv.is_empty()).then_some(argv);
        }
        let eco = Ecosystem::detect(&self.root)?;
        Some(
            eco.default_lock_command()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        )
    }
}

impl Manifests for FsManifests {
    fn read_version(&self, package: &Package) -> ManifestResult<String> {
        let dir = self.package_dir(package);
        read_manifest(&dir, package.ecosystem)?
            .version
            .ok_or_else(|| ManifestError::VersionNotFound(dir.join(package.ecosystem.marker_file())))
    }

    #[instrument(skip(self), fields(package = %package.name))]
    fn write_version(&self, package: &Package, version: &Version) -> ManifestResult<()> {
        let path = self
            .package_dir(package)
            .join(package.ecosystem.marker_file());
        let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let version = version.to_string();
        let updated = match package.ecosystem {
            Ecosystem::Node => set_node_version(&raw, &version).map_err(|source| ManifestError::Json {
                path: path.clone(),
                source,
            })?,
            Ecosystem::Rust => {
                set_cargo_version(&raw, &version).map_err(|source| ManifestError::Toml {
                    path: path.clone(),
                    source: Box::new(source),
                })?
            }
        }
        .ok_or_else(|| ManifestError::VersionNotFound(path.clone()))?;
        std::fs::write(&path, updated).map_err(|e| io_err(&path, e))?;
        debug!(%path, %version, "version written");
        Ok(())
    }

    fn prepend_changelog(&self, package: &Package, entry: &str) -> ManifestResult<()> {
        let path = self.package_dir(package).join("CHANGELOG.md");
        let existing = match std::fs::read_to_string(&path) {
            Ok(s) => Some(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(&path, e)),
        };
        let updated = prepend_changelog_text(existing.as_deref(), &package.name, entry);
        std::fs::write(&path, updated).map_err(|e| io_err(&path, e))?;
        debug!(%path, "changelog updated");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root))]
    fn regenerate_lock(&self) -> ManifestResult<LockOutcome> {
        let Some(argv) = self.lock_argv() else {
            debug!("no lock command for this repository");
            return Ok(LockOutcome::Skipped);
        };
        let Some((program, args)) = argv.split_first() else {
            return Ok(LockOutcome::Skipped);
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        process::run(program, &args, &self.root, self.timeout)?;
        let command = argv.join(" ");
        info!(%command, "lockfile regenerated");
        Ok(LockOutcome::Regenerated { command })
    }
}
