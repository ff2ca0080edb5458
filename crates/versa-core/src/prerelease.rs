//! Repository-wide prerelease mode.
//!
//! The repository is either [`PrereleaseMode::Stable`] or inside a
//! prerelease window for one tag. The window's bookkeeping lives in
//! [`PrereleaseState`] and is persisted as JSON next to the changesets.
//!
//! Every transition goes through [`PrereleaseStore::compare_and_swap`], so a
//! concurrent writer is detected instead of silently overwritten.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::version::BumpLevel;

/// Errors from prerelease transitions.
#[derive(Error, Debug)]
pub enum PrereleaseError {
    /// `enter` was called while a prerelease window is already open.
    #[error("cannot enter {requested} prerelease: repository is already in {current} mode")]
    InvalidTransition {
        /// Mode the repository is in.
        current: PrereleaseMode,
        /// Tag that was requested.
        requested: PrereleaseTag,
    },

    /// Tag is not one of the supported prerelease identifiers.
    #[error("invalid prerelease tag {0:?} (expected alpha, beta, rc, next, or canary)")]
    InvalidTag(String),

    /// The state on disk changed between read and write.
    #[error("prerelease state at {path} was modified concurrently; re-run the command")]
    Conflict {
        /// State file path.
        path: Utf8PathBuf,
    },

    /// Filesystem failure.
    #[error("failed to write prerelease state {path}: {source}")]
    Io {
        /// State file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// State could not be serialized.
    #[error("failed to serialize prerelease state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result alias for prerelease operations.
pub type PrereleaseResult<T> = Result<T, PrereleaseError>;

// ──────────────────────────────────────────────
// Tags and modes
// ──────────────────────────────────────────────

/// Supported prerelease identifiers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PrereleaseTag {
    /// `-alpha.N`
    Alpha,
    /// `-beta.N`
    Beta,
    /// `-rc.N`
    Rc,
    /// `-next.N`
    Next,
    /// `-canary.N`
    Canary,
}

impl PrereleaseTag {
    /// Identifier as it appears in version strings.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Rc => "rc",
            Self::Next => "next",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for PrereleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrereleaseTag {
    type Err = PrereleaseError;

    fn from_str(s: &str) -> PrereleaseResult<Self> {
        match s {
            "alpha" => Ok(Self::Alpha),
            "beta" => Ok(Self::Beta),
            "rc" => Ok(Self::Rc),
            "next" => Ok(Self::Next),
            "canary" => Ok(Self::Canary),
            other => Err(PrereleaseError::InvalidTag(other.to_string())),
        }
    }
}

/// Repository-wide release mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "tag")]
pub enum PrereleaseMode {
    /// Regular releases.
    #[default]
    Stable,
    /// Prerelease window for the given tag.
    Prerelease(PrereleaseTag),
}

impl PrereleaseMode {
    /// Active tag, if any.
    pub const fn tag(self) -> Option<PrereleaseTag> {
        match self {
            Self::Stable => None,
            Self::Prerelease(tag) => Some(tag),
        }
    }
}

impl fmt::Display for PrereleaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Prerelease(tag) => write!(f, "prerelease ({tag})"),
        }
    }
}

// ──────────────────────────────────────────────
// State
// ──────────────────────────────────────────────

/// Everything tracked for an open prerelease window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrereleaseState {
    /// Current mode.
    pub mode: PrereleaseMode,
    /// Package versions snapshotted when the window opened. Fixed until exit.
    pub initial_versions: BTreeMap<String, String>,
    /// Baselines of packages first released after the window opened.
    pub added_versions: BTreeMap<String, String>,
    /// Changeset keys consumed during the window.
    pub changesets: BTreeSet<String>,
    /// Next prerelease number per package.
    pub counters: BTreeMap<String, u64>,
    /// Highest bump resolved per package during the window.
    pub window_bumps: BTreeMap<String, BumpLevel>,
}

impl PrereleaseState {
    /// Whether a prerelease window is open.
    pub const fn is_prerelease(&self) -> bool {
        matches!(self.mode, PrereleaseMode::Prerelease(_))
    }

    /// Record changesets consumed by a release inside the window.
    pub fn record_changesets<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        if self.is_prerelease() {
            self.changesets.extend(keys.into_iter().map(str::to_string));
        }
    }

    /// Parse the persisted JSON form. Anything unreadable is stable.
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str::<PersistedState>(raw) {
            Ok(persisted) => persisted.into(),
            Err(e) => {
                warn!(error = %e, "unparseable prerelease state; treating as stable");
                Self::default()
            }
        }
    }

    /// Render the persisted JSON form.
    pub fn to_json(&self) -> PrereleaseResult<String> {
        let mut out = serde_json::to_string_pretty(&PersistedState::from(self))?;
        out.push('\n');
        Ok(out)
    }
}

/// On-disk layout of the state file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    mode: Option<String>,
    tag: Option<PrereleaseTag>,
    #[serde(default)]
    initial_versions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    added_versions: BTreeMap<String, String>,
    #[serde(default)]
    changesets: Vec<String>,
    #[serde(default)]
    counters: BTreeMap<String, u64>,
    #[serde(default)]
    bumps: BTreeMap<String, BumpLevel>,
}

impl From<PersistedState> for PrereleaseState {
    fn from(p: PersistedState) -> Self {
        let mode = match (p.mode.as_deref(), p.tag) {
            (Some("pre"), Some(tag)) => PrereleaseMode::Prerelease(tag),
            _ => return Self::default(),
        };
        Self {
            mode,
            initial_versions: p.initial_versions,
            added_versions: p.added_versions,
            changesets: p.changesets.into_iter().collect(),
            counters: p.counters,
            window_bumps: p.bumps,
        }
    }
}

impl From<&PrereleaseState> for PersistedState {
    fn from(s: &PrereleaseState) -> Self {
        Self {
            mode: s.mode.tag().map(|_| "pre".to_string()),
            tag: s.mode.tag(),
            initial_versions: s.initial_versions.clone(),
            added_versions: s.added_versions.clone(),
            changesets: s.changesets.iter().cloned().collect(),
            counters: s.counters.clone(),
            bumps: s.window_bumps.clone(),
        }
    }
}

/// Result of [`PrereleaseStore::exit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The window for `tag` was closed.
    Exited {
        /// Tag of the closed window.
        tag: PrereleaseTag,
    },
    /// Nothing to do.
    AlreadyStable,
}

// ──────────────────────────────────────────────
// Store
// ──────────────────────────────────────────────

/// Persistence for [`PrereleaseState`].
///
/// Implementors supply `read` and `compare_and_swap`; transitions are
/// provided on top of those two.
pub trait PrereleaseStore {
    /// Current state. Missing or unparseable storage reads as stable.
    fn read(&self) -> PrereleaseState;

    /// Replace `expected` with `next`, failing with
    /// [`PrereleaseError::Conflict`] if storage no longer holds `expected`.
    fn compare_and_swap(
        &self,
        expected: &PrereleaseState,
        next: &PrereleaseState,
    ) -> PrereleaseResult<()>;

    /// Current mode.
    fn status(&self) -> PrereleaseMode {
        self.read().mode
    }

    /// Open a prerelease window, snapshotting `current_versions`.
    fn enter(
        &self,
        tag: PrereleaseTag,
        current_versions: &BTreeMap<String, String>,
    ) -> PrereleaseResult<PrereleaseState> {
        let current = self.read();
        if current.is_prerelease() {
            return Err(PrereleaseError::InvalidTransition {
                current: current.mode,
                requested: tag,
            });
        }
        let next = PrereleaseState {
            mode: PrereleaseMode::Prerelease(tag),
            initial_versions: current_versions.clone(),
            ..PrereleaseState::default()
        };
        self.compare_and_swap(&current, &next)?;
        info!(%tag, packages = next.initial_versions.len(), "entered prerelease mode");
        Ok(next)
    }

    /// Close the prerelease window, if one is open.
    fn exit(&self) -> PrereleaseResult<ExitOutcome> {
        let current = self.read();
        let PrereleaseMode::Prerelease(tag) = current.mode else {
            return Ok(ExitOutcome::AlreadyStable);
        };
        self.compare_and_swap(&current, &PrereleaseState::default())?;
        info!(%tag, "exited prerelease mode");
        Ok(ExitOutcome::Exited { tag })
    }
}

/// JSON file store.
///
/// Writes go through a temp file in the same directory and are renamed into
/// place. A stable state removes the file.
///
/// [`compare_and_swap`](PrereleaseStore::compare_and_swap) is serialized by
/// an in-process mutex only. Two versa processes writing the same file can
/// both pass the comparison and the later rename wins.
#[derive(Debug)]
pub struct FilePrereleaseStore {
    path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl FilePrereleaseStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> PrereleaseError {
        PrereleaseError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn persist(&self, state: &PrereleaseState) -> PrereleaseResult<()> {
        if !state.is_prerelease() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_err(e)),
            };
        }

        let json = state.to_json()?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_str().is_empty() => p.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }
}

impl PrereleaseStore for FilePrereleaseStore {
    fn read(&self) -> PrereleaseState {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => PrereleaseState::from_json(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PrereleaseState::default(),
            Err(e) => {
                warn!(path = %self.path, error = %e, "cannot read prerelease state; treating as stable");
                PrereleaseState::default()
            }
        }
    }

    #[instrument(skip_all, fields(path = %self.path, next = %next.mode))]
    fn compare_and_swap(
        &self,
        expected: &PrereleaseState,
        next: &PrereleaseState,
    ) -> PrereleaseResult<()> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.read() != *expected {
            return Err(PrereleaseError::Conflict {
                path: self.path.clone(),
            });
        }
        self.persist(next)?;
        debug!("prerelease state written");
        Ok(())
    }
}
