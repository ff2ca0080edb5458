//! Version computation.
//!
//! Holds the [`BumpLevel`] lattice and the version resolver that turns a
//! package's current version, a bump level, and the repository's prerelease
//! state into the next version to release.

pub mod conventional;

use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::prerelease::{PrereleaseMode, PrereleaseState};

/// Errors from version operations.
#[derive(Error, Debug)]
pub enum VersionError {
    /// A version string is not valid semver.
    #[error("invalid version {input:?}: {source}")]
    Parse {
        /// The offending input.
        input: String,
        /// Underlying semver error.
        source: semver::Error,
    },

    /// A bump level string is not one of `none|patch|minor|major`.
    #[error("invalid bump level {0:?} (expected none, patch, minor, or major)")]
    InvalidBump(String),

    /// The prerelease identifier could not be built.
    #[error("invalid prerelease identifier {0:?}")]
    InvalidPrerelease(String),

    /// Bumping would overflow a version component.
    #[error("cannot apply a {level} bump to {version}: component overflow")]
    Overflow {
        /// Version being bumped.
        version: Version,
        /// Requested bump.
        level: BumpLevel,
    },
}

/// Result alias for version operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Semver bump level.
///
/// Ordered `None < Patch < Minor < Major`. Combining two levels with
/// [`BumpLevel::join`] yields the larger one, so `None` is the identity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    /// No release.
    #[default]
    None,
    /// Patch release (x.y.Z).
    Patch,
    /// Minor release (x.Y.0).
    Minor,
    /// Major release (X.0.0).
    Major,
}

impl BumpLevel {
    /// Combine two bump levels, keeping the larger.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        self.max(other)
    }

    /// Fold any number of bump levels into one.
    pub fn join_all(levels: impl IntoIterator<Item = Self>) -> Self {
        levels.into_iter().fold(Self::None, Self::join)
    }

    /// Lowercase name as used in changeset headers.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Patch => "patch",
            Self::Minor => "minor",
            Self::Major => "major",
        }
    }
}

impl fmt::Display for BumpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BumpLevel {
    type Err = VersionError;

    fn from_str(s: &str) -> VersionResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "patch" => Ok(Self::Patch),
            "minor" => Ok(Self::Minor),
            "major" => Ok(Self::Major),
            _ => Err(VersionError::InvalidBump(s.to_string())),
        }
    }
}

/// Parse a version string, stripping an optional `v` prefix.
pub fn parse_version(s: &str) -> VersionResult<Version> {
    let trimmed = s.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|source| VersionError::Parse {
        input: s.to_string(),
        source,
    })
}

/// Parse a version and drop any prerelease suffix and build metadata.
///
/// `1.4.3-beta.1` becomes `1.4.3`. Non-numeric components are an error.
pub fn release_baseline(s: &str) -> VersionResult<Version> {
    let mut version = parse_version(s)?;
    version.pre = Prerelease::EMPTY;
    version.build = BuildMetadata::EMPTY;
    Ok(version)
}

/// Compute the next version by applying a bump level.
///
/// Returns `Ok(None)` for [`BumpLevel::None`]: nothing is released.
pub fn next_version(current: &Version, level: BumpLevel) -> VersionResult<Option<Version>> {
    let overflow = || VersionError::Overflow {
        version: current.clone(),
        level,
    };
    let next = match level {
        BumpLevel::None => return Ok(None),
        BumpLevel::Patch => Version::new(
            current.major,
            current.minor,
            current.patch.checked_add(1).ok_or_else(overflow)?,
        ),
        BumpLevel::Minor => Version::new(
            current.major,
            current.minor.checked_add(1).ok_or_else(overflow)?,
            0,
        ),
        BumpLevel::Major => Version::new(current.major.checked_add(1).ok_or_else(overflow)?, 0, 0),
    };
    Ok(Some(next))
}

/// Resolve the next version of `package`.
///
/// In stable mode the result is the bumped `major.minor.patch`. In prerelease
/// mode the bump is applied to the version recorded when the window opened,
/// using the highest bump seen for the package during the window, and a
/// `-{tag}.{n}` suffix is appended. Each prerelease resolution advances the
/// package's counter inside `state`; callers that must stay side-effect free
/// resolve against a clone.
///
/// A package missing from the window's initial versions is baselined on its
/// first resolution in `state.added_versions`; `initial_versions` is never
/// modified here.
#[instrument(skip(state), fields(mode = %state.mode))]
pub fn resolve_version(
    package: &str,
    current: &str,
    bump: BumpLevel,
    state: &mut PrereleaseState,
) -> VersionResult<Option<Version>> {
    let baseline = release_baseline(current)?;
    if bump == BumpLevel::None {
        debug!("no bump; package excluded");
        return Ok(None);
    }

    let tag = match state.mode {
        PrereleaseMode::Stable => return next_version(&baseline, bump),
        PrereleaseMode::Prerelease(tag) => tag,
    };

    let window_base = match state.initial_versions.get(package) {
        Some(initial) => release_baseline(initial)?,
        None => {
            let added = state
                .added_versions
                .entry(package.to_string())
                .or_insert_with(|| baseline.to_string());
            release_baseline(added)?
        }
    };
    let window_bump = state
        .window_bumps
        .get(package)
        .copied()
        .unwrap_or_default()
        .join(bump);
    let Some(mut next) = next_version(&window_base, window_bump)? else {
        return Ok(None);
    };

    let counter = state.counters.entry(package.to_string()).or_insert(0);
    let ident = format!("{tag}.{counter}");
    next.pre = Prerelease::new(&ident).map_err(|_| VersionError::InvalidPrerelease(ident))?;
    *counter += 1;
    state.window_bumps.insert(package.to_string(), window_bump);

    debug!(%next, "resolved prerelease version");
    Ok(Some(next))
}
