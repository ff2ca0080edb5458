//! Release command: thin CLI layer over `versa_core::release`.

use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use versa_core::config::Config;
use versa_core::git::GitCli;
use versa_core::hosting::GhCli;
use versa_core::manifest::FsManifests;
use versa_core::pipeline::{PipelineError, ReleaseReport, StepOutcome};
use versa_core::release::{
    self, AnalysisReport, Confirmation, ReleaseEvent, ReleaseOptions, ReleasePorts, RunOutcome,
};

use super::{Repo, print_json};

/// Arguments for the `release` subcommand.
#[derive(Args, Debug, Default)]
pub struct ReleaseArgs {
    /// Show what would be released without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip pushing the release commit and tags
    #[arg(long)]
    pub no_push: bool,

    /// Skip creating hosted releases
    #[arg(long)]
    pub no_publish: bool,

    /// Create hosted releases as drafts (overrides config)
    #[arg(long)]
    pub draft: bool,

    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

/// Execute the release command.
#[instrument(name = "cmd_release", skip_all)]
pub fn cmd_release(
    args: ReleaseArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    let repo = Repo::open(config, cwd)?;
    let timeout = config.tool_timeout();

    let vcs = GitCli::new(repo.root.clone())
        .with_remote(config.release.remote.clone())
        .with_timeout(timeout);
    let host = GhCli::new(repo.root.clone()).with_timeout(timeout);
    let manifests = FsManifests::new(repo.root.clone())
        .with_lock_command(config.release.lock_command.clone())
        .with_timeout(timeout);

    let options = ReleaseOptions {
        dry_run: args.dry_run,
        push: config.release.push && !args.no_push,
        publish: config.release.publish && !args.no_publish,
        draft: args.draft || config.release.draft,
    };
    debug!(?options, "executing release command");

    if !options.dry_run {
        if !vcs.is_inside_repo().context("failed to query git")? {
            bail!("{} is not inside a git repository", repo.root);
        }
        if !vcs.is_clean().context("failed to query git status")? {
            bail!("working tree has uncommitted changes; commit or stash them before releasing");
        }
    }

    let ports = ReleasePorts {
        packages: &repo.packages,
        changesets: &repo.changesets,
        prerelease: &repo.prerelease,
        vcs: &vcs,
        host: &host,
        manifests: &manifests,
    };

    let ask = !global_json && !args.yes;
    let mut spinner: Option<ProgressBar> = None;
    let result = release::run_release(
        &ports,
        &options,
        |analysis| {
            if !global_json {
                print_analysis(analysis);
            }
            if ask { confirm() } else { Confirmation::Proceed }
        },
        |event| {
            if !global_json {
                handle_event(event, &mut spinner);
            }
        },
    );

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            let PipelineError::Halted { ref report, .. } = err;
            if global_json {
                print_json(report)?;
            } else {
                print_warnings(report);
            }
            return Err(err).context("release failed");
        }
    };

    match outcome {
        RunOutcome::NothingToRelease => {
            if global_json {
                print_json(&serde_json::json!({ "status": "nothing_to_release" }))?;
            } else {
                println!("{}", "No pending changesets; nothing to release.".yellow());
            }
        }
        RunOutcome::Analysis(analysis) => {
            if global_json {
                print_json(&analysis)?;
            } else {
                println!("{}", "Dry run: no changes were made.".yellow().bold());
            }
        }
        RunOutcome::Cancelled(_) => {
            println!("{}", "Release cancelled.".yellow());
        }
        RunOutcome::Released(report) => {
            if global_json {
                print_json(&report)?;
            } else {
                print_summary(&report);
            }
        }
    }
    Ok(())
}

fn confirm() -> Confirmation {
    let answer = Confirm::new("Proceed with release?")
        .with_default(true)
        .prompt();
    match answer {
        Ok(true) => {
            println!();
            Confirmation::Proceed
        }
        Ok(false) => Confirmation::Cancelled,
        Err(e) => {
            debug!(error = %e, "confirmation prompt unavailable");
            Confirmation::Cancelled
        }
    }
}

fn print_analysis(analysis: &AnalysisReport) {
    println!();
    match analysis.prerelease_mode {
        Some(tag) => println!("{}: {}", "Mode".dimmed(), format!("prerelease ({tag})").yellow()),
        None => println!("{}: {}", "Mode".dimmed(), "stable".green()),
    }
    println!(
        "{}: {}",
        "Changesets".dimmed(),
        analysis.pending_changesets.join(", ")
    );
    println!();

    if analysis.packages_to_release.is_empty() {
        println!("  {}", "No package versions change.".dimmed());
    }
    for pkg in &analysis.packages_to_release {
        println!(
            "  {} {} → {} {}",
            pkg.name.bold(),
            pkg.current_version.dimmed(),
            pkg.new_version.green().bold(),
            format!("({})", pkg.bump).dimmed()
        );
    }

    println!();
    for step in &analysis.steps {
        println!(
            "  {} {} {}",
            format!("{:<8}", step.step.to_string()).bold(),
            format!("{:<15}", format!("{:?}", step.policy)).dimmed(),
            step.action
        );
    }
    println!();
}

fn handle_event(event: ReleaseEvent, spinner: &mut Option<ProgressBar>) {
    match event {
        ReleaseEvent::StepStarted(step) => {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("  {spinner:.cyan} {msg}")
                .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar.set_message(format!("{step}..."));
            bar.enable_steady_tick(Duration::from_millis(80));
            *spinner = Some(bar);
        }
        ReleaseEvent::StepCompleted(step, outcome) => {
            if let Some(bar) = spinner.take() {
                bar.finish_and_clear();
            }
            let label = format!("{step}");
            match outcome {
                StepOutcome::Success { message } => {
                    println!("  {} {} {}", "✓".green(), label.bold(), message.dimmed());
                }
                StepOutcome::Skipped { reason } => println!(
                    "  {} {} {}",
                    "–".yellow(),
                    label.bold(),
                    format!("skipped: {reason}").dimmed()
                ),
                StepOutcome::Warning { message } => {
                    println!("  {} {} {}", "!".yellow().bold(), label.bold(), message.yellow());
                }
                StepOutcome::Failed { message } => {
                    println!("  {} {} {}", "✗".red().bold(), label.bold(), message.red());
                }
            }
        }
    }
}

fn print_warnings(report: &ReleaseReport) {
    if report.warnings.is_empty() {
        return;
    }
    println!();
    println!("{}", "Warnings".yellow().bold().underline());
    for warning in &report.warnings {
        match warning.package {
            Some(ref package) => {
                println!("  {} {}: {}", "!".yellow(), package.bold(), warning.message);
            }
            None => println!("  {} {}", "!".yellow(), warning.message),
        }
    }
}

fn print_summary(report: &ReleaseReport) {
    println!();
    for decision in &report.decisions {
        let url = report
            .releases
            .iter()
            .find(|r| r.package == decision.package)
            .and_then(|r| r.url.as_deref());
        match url {
            Some(url) => println!("  {} {} {}", "✓".green(), decision.tag.bold(), url.cyan()),
            None => println!("  {} {}", "✓".green(), decision.tag.bold()),
        }
    }
    print_warnings(report);
    println!();
    println!(
        "{} Released {} package{}",
        "✓".green().bold(),
        report.decisions.len(),
        if report.decisions.len() == 1 { "" } else { "s" }
    );
}
