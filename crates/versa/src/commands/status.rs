//! Status command: prerelease mode, pending changesets, counters.

use std::collections::BTreeMap;

use anyhow::Context;
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::instrument;

use versa_core::config::Config;
use versa_core::prerelease::{PrereleaseStore, PrereleaseTag};
use versa_core::version::BumpLevel;

use super::{Repo, print_json};

/// Arguments for the `status` subcommand.
#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

#[derive(Debug, Serialize)]
struct PendingChangeset {
    key: String,
    internal: bool,
    bumps: BTreeMap<String, BumpLevel>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    mode: &'static str,
    tag: Option<PrereleaseTag>,
    pending: Vec<PendingChangeset>,
    counters: BTreeMap<String, u64>,
    initial_versions: BTreeMap<String, String>,
    added_versions: BTreeMap<String, String>,
}

fn status_report(repo: &Repo) -> anyhow::Result<StatusReport> {
    let state = repo.prerelease.read();
    let pending = repo
        .changesets
        .read_all()
        .context("failed to read changesets")?
        .into_iter()
        .map(|c| PendingChangeset {
            internal: c.is_internal(),
            key: c.key,
            bumps: c.bumps,
        })
        .collect();
    Ok(StatusReport {
        mode: if state.is_prerelease() { "prerelease" } else { "stable" },
        tag: state.mode.tag(),
        pending,
        counters: state.counters,
        initial_versions: state.initial_versions,
        added_versions: state.added_versions,
    })
}

/// Show prerelease mode and pending changesets.
#[instrument(name = "cmd_status", skip_all)]
pub fn cmd_status(
    _args: StatusArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    let repo = Repo::open(config, cwd)?;
    let report = status_report(&repo)?;

    if global_json {
        return print_json(&report);
    }

    match report.tag {
        Some(tag) => println!("{}: {}", "Mode".dimmed(), format!("prerelease ({tag})").yellow()),
        None => println!("{}: {}", "Mode".dimmed(), "stable".green()),
    }

    println!();
    println!("{}", "Pending changesets".bold().underline());
    if report.pending.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for changeset in &report.pending {
        if changeset.internal {
            println!("  {} {}", changeset.key.bold(), "(internal only)".dimmed());
            continue;
        }
        let bumps: Vec<String> = changeset
            .bumps
            .iter()
            .map(|(pkg, level)| format!("{pkg}: {level}"))
            .collect();
        println!("  {} {}", changeset.key.bold(), bumps.join(", ").cyan());
    }

    if !report.counters.is_empty() {
        println!();
        println!("{}", "Prerelease counters".bold().underline());
        for (package, counter) in &report.counters {
            let base = report
                .initial_versions
                .get(package)
                .or_else(|| report.added_versions.get(package))
                .map(String::as_str)
                .unwrap_or("?");
            println!("  {} next {} {}", package.bold(), counter, format!("(from {base})").dimmed());
        }
    }

    Ok(())
}
