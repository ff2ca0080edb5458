//! Library interface for the `versa` CLI.
//!
//! This crate exposes the CLI's argument parser and command structure as a library,
//! primarily for testing. The actual entry point is in `main.rs`.
//!
//! # Structure
//!
//! - [`Cli`] - The root argument parser (clap derive)
//! - [`Commands`] - Available subcommands
//! - [`commands`] - Command implementations

pub mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

/// Color output preference.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Detect terminal capabilities automatically.
    #[default]
    Auto,
    /// Always emit colors.
    Always,
    /// Never emit colors.
    Never,
}

impl ColorChoice {
    /// Configure global color output based on this choice.
    pub fn apply(self) {
        match self {
            Self::Auto => {}
            Self::Always => owo_colors::set_override(true),
            Self::Never => owo_colors::set_override(false),
        }
    }
}

const ENV_HELP: &str = "\
ENVIRONMENT VARIABLES:
    RUST_LOG                Log filter (e.g., debug, versa_core=trace)
    VERSA_LOG_PATH          Explicit log file path
    VERSA_LOG_DIR           Log directory
";

/// Command-line interface definition for versa.
#[derive(Parser)]
#[command(name = "versa")]
#[command(about = "Per-package semantic versioning for multi-package repositories", long_about = None)]
#[command(version)]
#[command(after_long_help = ENV_HELP)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as if started in DIR
    #[arg(short = 'C', long, global = true)]
    pub chdir: Option<PathBuf>,

    /// Only print errors (suppresses warnings/info)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More detail (repeatable; e.g. -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Colorize output
    #[arg(long, global = true, value_enum, default_value_t)]
    pub color: ColorChoice,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands for the CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Show tool, configuration, and package information
    Info(commands::info::InfoArgs),

    /// Show prerelease mode and pending changesets
    Status(commands::status::StatusArgs),

    /// Enter or exit a prerelease window
    Pre(commands::pre::PreArgs),

    /// Draft a changeset from the current branch's commits
    Changeset(commands::changeset::ChangesetArgs),

    /// Release every package with pending changesets
    Release(commands::release::ReleaseArgs),
}

/// Returns the clap command, for help rendering and validation.
pub fn command() -> clap::Command {
    Cli::command()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_valid() {
        command().debug_assert();
    }

    #[test]
    fn pre_enter_parses_tag() {
        let cli = Cli::try_parse_from(["versa", "pre", "enter", "beta"]).unwrap();
        assert!(matches!(cli.command, Commands::Pre(_)));
    }

    #[test]
    fn unknown_prerelease_tag_is_rejected() {
        assert!(Cli::try_parse_from(["versa", "pre", "enter", "gamma"]).is_err());
    }

    #[test]
    fn release_flags_parse() {
        let cli =
            Cli::try_parse_from(["versa", "release", "--dry-run", "--no-push", "-y"]).unwrap();
        let Commands::Release(args) = cli.command else {
            panic!("expected release");
        };
        assert!(args.dry_run);
        assert!(args.no_push);
        assert!(!args.no_publish);
        assert!(args.yes);
    }
}
