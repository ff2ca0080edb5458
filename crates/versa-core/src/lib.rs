//! Core library for versa.
//!
//! Per-package semantic versioning for repositories that hold several
//! independently released packages. Commits are classified and attributed to
//! packages, reduced to bump intents recorded in changesets, and consumed by a
//! release pipeline that writes versions, changelogs, tags, and hosted
//! releases.
//!
//! # Modules
//!
//! - [`version`] - Bump levels, commit classification, version resolution
//! - [`scope`] - Commit and path attribution to packages
//! - [`bump`] - Per-package bump aggregation and changeset drafting
//! - [`changeset`] - Pending changeset storage
//! - [`prerelease`] - Prerelease window state machine
//! - [`release`] - Release planning and execution
//! - [`pipeline`] - Step policies and the release report
//! - [`workspace`] - Package discovery
//! - [`manifest`] - Manifest, changelog, and lockfile edits
//! - [`git`] - Version control port and `git` adapter
//! - [`hosting`] - Hosted release port and `gh` adapter
//! - [`process`] - Subprocess execution with timeouts
//! - [`ecosystem`] - Package ecosystems
//! - [`config`] - Configuration loading
//! - [`error`] - Configuration errors
//!
//! # Quick Start
//!
//! ```no_run
//! use versa_core::version::conventional::classify;
//!
//! let commit = classify("abc1234", "feat(ui)!: drop legacy theme");
//! assert_eq!(commit.scope(), Some("ui"));
//! println!("{}", commit.bump());
//! ```
#![deny(unsafe_code)]

pub mod bump;

pub mod changeset;

pub mod config;

pub mod ecosystem;

pub mod error;

pub mod git;

pub mod hosting;

pub mod manifest;

pub mod pipeline;

pub mod prerelease;

pub mod process;

pub mod release;

pub mod scope;

pub mod version;

pub mod workspace;

pub use config::{Config, ConfigLoader, LogLevel};

pub use error::{ConfigError, ConfigResult};

// Re-export semver so downstream crates don't need a direct dependency.
pub use semver;
