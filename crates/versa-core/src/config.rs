//! Configuration loading and discovery.
//!
//! Configuration is layered with figment, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config from the platform config directory
//! 3. Project config found by walking up from the search root
//! 4. Explicit files added with [`ConfigLoader::with_file`]
//!
//! # Supported formats
//!
//! TOML (`.toml`), YAML (`.yaml`, `.yml`), and JSON (`.json`).
//!
//! # Config file locations (highest precedence first)
//! - `.versa.<ext>` in the search root or any parent
//! - `versa.<ext>` in the search root or any parent
//! - `~/.config/versa/config.<ext>` (user config)
//!
//! The walk stops at the first parent that contains `.git`.
//!
//! # Example
//! ```no_run
//! use camino::Utf8PathBuf;
//! use versa_core::config::ConfigLoader;
//!
//! let cwd = std::env::current_dir().unwrap();
//! let cwd = Utf8PathBuf::try_from(cwd).expect("current directory is not valid UTF-8");
//! let config = ConfigLoader::new()
//!     .with_project_search(&cwd)
//!     .load()
//!     .unwrap();
//! println!("changesets live in {}", config.changesets.dir);
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// The configuration for versa.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level for the application (e.g., "debug", "info", "warn", "error").
    pub log_level: LogLevel,
    /// Directory for JSONL log files (falls back to platform defaults if unset).
    pub log_dir: Option<Utf8PathBuf>,
    /// Where packages are discovered.
    pub packages: PackagesConfig,
    /// Changeset storage and drafting.
    pub changesets: ChangesetsConfig,
    /// Prerelease state persistence.
    pub prerelease: PrereleaseConfig,
    /// Release pipeline behavior.
    pub release: ReleaseConfig,
}

impl Config {
    /// Changeset directory, resolved against `root`.
    pub fn changeset_dir(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join(&self.changesets.dir)
    }

    /// Prerelease state file, resolved against `root`.
    pub fn prerelease_state_file(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join(&self.prerelease.state_file)
    }

    /// Timeout for each external tool invocation.
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.release.timeout_secs)
    }
}

/// Package discovery.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackagesConfig {
    /// Directories, relative to the repository root, whose immediate
    /// subdirectories are packages.
    pub roots: Vec<String>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            roots: vec!["packages".to_string(), "apps".to_string()],
        }
    }
}

/// Changeset settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChangesetsConfig {
    /// Directory holding pending changesets, relative to the repository root.
    pub dir: Utf8PathBuf,
    /// Default base ref when drafting a changeset from commits.
    pub base: String,
}

impl Default for ChangesetsConfig {
    fn default() -> Self {
        Self {
            dir: Utf8PathBuf::from(".changeset"),
            base: "main".to_string(),
        }
    }
}

/// Prerelease settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrereleaseConfig {
    /// State file, relative to the repository root.
    pub state_file: Utf8PathBuf,
}

impl Default for PrereleaseConfig {
    fn default() -> Self {
        Self {
            state_file: Utf8PathBuf::from(".changeset/pre.json"),
        }
    }
}

/// Release pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Remote to push to.
    pub remote: String,
    /// Timeout, in seconds, for each `git`, `gh`, or lock command.
    pub timeout_secs: u64,
    /// Command that regenerates the lock artifact.
    ///
    /// When unset, the repository root's ecosystem default is used
    /// (`npm install --package-lock-only --ignore-scripts` or
    /// `cargo update --workspace`).
    pub lock_command: Option<String>,
    /// Create hosted releases as drafts.
    pub draft: bool,
    /// Push the release commit and tags.
    pub push: bool,
    /// Create hosted releases.
    pub publish: bool,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            timeout_secs: 120,
            lock_command: None,
            draft: false,
            push: true,
            publish: true,
        }
    }
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging and development.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors that indicate failures.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Supported configuration file extensions (in order of preference).
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Application name for platform directory lookup and config file names.
const APP_NAME: &str = "versa";

/// Builder for loading configuration from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    project_search_root: Option<Utf8PathBuf>,
    include_user_config: bool,
    boundary_marker: Option<String>,
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Loader with user config enabled and a `.git` boundary.
    pub fn new() -> Self {
        Self {
            project_search_root: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Walk up from `path` looking for project config.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.project_search_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Include or skip `~/.config/versa/config.<ext>`.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Search all the way to the filesystem root.
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Add an explicit config file. Later files take precedence.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration, merging all discovered sources.
    #[tracing::instrument(skip(self), fields(search_root = ?self.project_search_root))]
    pub fn load(self) -> ConfigResult<Config> {
        tracing::debug!("loading configuration");
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if self.include_user_config
            && let Some(user_config) = self.find_user_config()
        {
            figment = Self::merge_file(figment, &user_config);
        }

        if let Some(ref root) = self.project_search_root
            && let Some(project_config) = self.find_project_config(root)
        {
            tracing::debug!(path = %project_config, "project config found");
            figment = Self::merge_file(figment, &project_config);
        }

        for file in &self.explicit_files {
            figment = Self::merge_file(figment, file);
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            changesets = %config.changesets.dir,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration, returning an error if no config file is found.
    pub fn load_or_error(self) -> ConfigResult<Config> {
        let has_user = self.include_user_config && self.find_user_config().is_some();
        let has_project = self
            .project_search_root
            .as_ref()
            .and_then(|root| self.find_project_config(root))
            .is_some();

        if !has_user && !has_project && self.explicit_files.is_empty() {
            return Err(ConfigError::NotFound);
        }

        self.load()
    }

    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            for ext in CONFIG_EXTENSIONS {
                let dotfile = dir.join(format!(".{APP_NAME}.{ext}"));
                if dotfile.is_file() {
                    return Some(dotfile);
                }
                let regular = dir.join(format!("{APP_NAME}.{ext}"));
                if regular.is_file() {
                    return Some(regular);
                }
            }

            // The directory holding the marker is the last one searched.
            if let Some(ref marker) = self.boundary_marker
                && dir.join(marker).exists()
            {
                break;
            }

            current = dir.parent().map(Utf8Path::to_path_buf);
        }

        None
    }

    fn find_user_config(&self) -> Option<Utf8PathBuf> {
        let config_dir = user_config_dir()?;
        CONFIG_EXTENSIONS
            .iter()
            .map(|ext| config_dir.join(format!("config.{ext}")))
            .find(|path| path.is_file())
    }

    fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
        match path.extension() {
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
            Some("json") => figment.merge(Json::file_exact(path.as_str())),
            _ => figment.merge(Toml::file_exact(path.as_str())),
        }
    }
}

/// Find the project config file path without loading it.
pub fn find_project_config<P: AsRef<Utf8Path>>(start: P) -> Option<Utf8PathBuf> {
    ConfigLoader::new().find_project_config(start.as_ref())
}

/// Platform config directory for versa.
///
/// `~/.config/versa/` on Linux, `~/Library/Application Support/versa/` on
/// macOS.
pub fn user_config_dir() -> Option<Utf8PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
    Utf8PathBuf::from_path_buf(dirs.config_dir().to_path_buf()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::try_from(path).unwrap()
    }

    fn load_file(contents: &str, name: &str) -> Config {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(name);
        fs::write(&path, contents).unwrap();
        ConfigLoader::new()
            .with_user_config(false)
            .with_file(utf8(path))
            .load()
            .unwrap()
    }

    #[test]
    fn defaults() {
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.log_dir.is_none());
        assert_eq!(config.packages.roots, ["packages", "apps"]);
        assert_eq!(config.changesets.dir, ".changeset");
        assert_eq!(config.changesets.base, "main");
        assert_eq!(config.prerelease.state_file, ".changeset/pre.json");
        assert_eq!(config.release.remote, "origin");
        assert_eq!(config.tool_timeout(), Duration::from_secs(120));
        assert!(config.release.push);
        assert!(config.release.publish);
        assert!(!config.release.draft);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = load_file(
            r#"
log_level = "debug"

[release]
draft = true
lock_command = "pnpm install --lockfile-only"
"#,
            "config.toml",
        );
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.release.draft);
        assert_eq!(
            config.release.lock_command.as_deref(),
            Some("pnpm install --lockfile-only")
        );
        assert_eq!(config.release.remote, "origin");
        assert_eq!(config.release.timeout_secs, 120);
    }

    #[test]
    fn yaml_and_json_are_supported() {
        let config = load_file("packages:\n  roots: [libs]\n", "config.yaml");
        assert_eq!(config.packages.roots, ["libs"]);

        let config = load_file(r#"{"changesets": {"dir": "changes"}}"#, "config.json");
        assert_eq!(config.changesets.dir, "changes");
    }

    #[test]
    fn later_file_overrides_earlier() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("base.toml");
        fs::write(&base, "[release]\nremote = \"upstream\"\npush = false").unwrap();
        let over = tmp.path().join("override.toml");
        fs::write(&over, "[release]\nremote = \"fork\"").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(utf8(base))
            .with_file(utf8(over))
            .load()
            .unwrap();
        assert_eq!(config.release.remote, "fork");
        assert!(!config.release.push);
    }

    #[test]
    fn project_config_found_from_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("project");
        let deep = project.join("packages").join("ui");
        fs::create_dir_all(&deep).unwrap();
        fs::write(project.join(".versa.toml"), "[prerelease]\nstate_file = \"pre.json\"").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(utf8(deep))
            .load()
            .unwrap();
        assert_eq!(config.prerelease.state_file, "pre.json");
    }

    #[test]
    fn boundary_marker_stops_search() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("parent");
        let child = parent.join("child");
        let work = child.join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(parent.join(".versa.toml"), r#"log_level = "warn""#).unwrap();
        fs::create_dir(child.join(".git")).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(utf8(work))
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn config_beside_git_is_found_from_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        let src = repo.join("packages").join("ui");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(repo.join("versa.toml"), "[changesets]\nbase = \"develop\"").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(utf8(src))
            .load()
            .unwrap();
        assert_eq!(config.changesets.base, "develop");
    }

    #[test]
    fn dotfile_wins_over_regular_name() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".versa.toml"), r#"log_level = "error""#).unwrap();
        fs::write(tmp.path().join("versa.toml"), r#"log_level = "warn""#).unwrap();
        let root = utf8(tmp.path().to_path_buf());
        assert_eq!(find_project_config(&root), Some(root.join(".versa.toml")));
    }

    #[test]
    fn load_or_error_without_any_file() {
        let result = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load_or_error();
        assert!(matches!(result, Err(ConfigError::NotFound)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        fs::write(&path, "[release]\ntimeout_secs = \"soon\"").unwrap();
        let result = ConfigLoader::new()
            .with_user_config(false)
            .with_file(utf8(path))
            .load();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn paths_resolve_against_root() {
        let config = Config::default();
        let root = Utf8Path::new("/repo");
        assert_eq!(config.changeset_dir(root), "/repo/.changeset");
        assert_eq!(config.prerelease_state_file(root), "/repo/.changeset/pre.json");
    }
}
