//! Pre command: open and close prerelease windows.

use anyhow::Context;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::instrument;

use versa_core::config::Config;
use versa_core::prerelease::{ExitOutcome, PrereleaseStore, PrereleaseTag};
use versa_core::workspace::current_versions;

use super::{Repo, print_json};

/// Arguments for the `pre` subcommand.
#[derive(Args, Debug)]
pub struct PreArgs {
    /// Transition to perform.
    #[command(subcommand)]
    pub command: PreCommand,
}

/// Prerelease transitions.
#[derive(Subcommand, Debug)]
pub enum PreCommand {
    /// Open a prerelease window, snapshotting current versions
    Enter {
        /// Prerelease tag
        #[arg(value_enum)]
        tag: PrereleaseTag,
    },
    /// Close the prerelease window
    Exit,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
enum PreReport {
    Entered { tag: PrereleaseTag, packages: usize },
    Exited { tag: PrereleaseTag },
    AlreadyStable,
}

/// Execute the pre command.
#[instrument(name = "cmd_pre", skip_all)]
pub fn cmd_pre(
    args: PreArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    let repo = Repo::open(config, cwd)?;

    let report = match args.command {
        PreCommand::Enter { tag } => {
            let state = repo
                .prerelease
                .enter(tag, &current_versions(&repo.packages))
                .context("failed to enter prerelease mode")?;
            PreReport::Entered {
                tag,
                packages: state.initial_versions.len(),
            }
        }
        PreCommand::Exit => match repo
            .prerelease
            .exit()
            .context("failed to exit prerelease mode")?
        {
            ExitOutcome::Exited { tag } => PreReport::Exited { tag },
            ExitOutcome::AlreadyStable => PreReport::AlreadyStable,
        },
    };

    if global_json {
        return print_json(&report);
    }

    match report {
        PreReport::Entered { tag, packages } => println!(
            "{} Entered {} prerelease mode {}",
            "✓".green(),
            tag.to_string().bold(),
            format!("({packages} package versions recorded)").dimmed()
        ),
        PreReport::Exited { tag } => println!(
            "{} Exited {} prerelease mode; the next release is stable",
            "✓".green(),
            tag.to_string().bold()
        ),
        PreReport::AlreadyStable => println!("{}", "Already in stable mode.".yellow()),
    }
    Ok(())
}
