//! Changeset command: draft a changeset from branch history.

use anyhow::{Context, bail};
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use versa_core::bump::{PackageBump, draft_from_history};
use versa_core::changeset::WriteOutcome;
use versa_core::config::Config;
use versa_core::git::GitCli;
use versa_core::version::BumpLevel;

use super::{Repo, print_json};

/// Arguments for the `changeset` subcommand.
#[derive(Args, Debug, Default)]
pub struct ChangesetArgs {
    /// Base ref to diff against (default: `changesets.base` from config)
    #[arg(long, value_name = "REF")]
    pub base: Option<String>,

    /// Write an internal-only changeset when nothing needs a release
    #[arg(long)]
    pub empty: bool,

    /// Print the changeset without writing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Serialize)]
struct ChangesetReport<'a> {
    base: &'a str,
    branch: Option<&'a str>,
    key: Option<&'a str>,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rendered: Option<String>,
    bumps: &'a [PackageBump],
}

const fn outcome_str(outcome: WriteOutcome) -> &'static str {
    match outcome {
        WriteOutcome::Created => "created",
        WriteOutcome::Updated => "updated",
        WriteOutcome::Unchanged => "unchanged",
    }
}

/// Execute the changeset command.
#[instrument(name = "cmd_changeset", skip_all)]
pub fn cmd_changeset(
    args: ChangesetArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    let repo = Repo::open(config, cwd)?;
    let vcs = GitCli::new(repo.root.clone()).with_timeout(config.tool_timeout());
    if !vcs.is_inside_repo().context("failed to query git")? {
        bail!("{} is not inside a git repository", repo.root);
    }

    let base = args.base.as_deref().unwrap_or(&config.changesets.base);
    debug!(%base, dry_run = args.dry_run, "drafting changeset");
    let draft = draft_from_history(&vcs, &repo.packages, base, args.empty)
        .with_context(|| format!("failed to read history since {base}"))?;

    let (outcome, path, rendered) = match (&draft.changeset, args.dry_run) {
        (None, _) => ("nothing_to_record", None, None),
        (Some(changeset), true) => ("dry_run", None, Some(changeset.render())),
        (Some(changeset), false) => {
            let outcome = repo
                .changesets
                .write(changeset)
                .context("failed to write changeset")?;
            let path = repo.changesets.dir().join(format!("{}.md", changeset.key));
            (outcome_str(outcome), Some(path.to_string()), None)
        }
    };

    let report = ChangesetReport {
        base,
        branch: draft.branch.as_deref(),
        key: draft.changeset.as_ref().map(|c| c.key.as_str()),
        outcome,
        path,
        rendered,
        bumps: &draft.bumps,
    };

    if global_json {
        return print_json(&report);
    }

    for bump in &draft.bumps {
        let level = if bump.bump == BumpLevel::None {
            bump.bump.to_string().dimmed().to_string()
        } else {
            bump.bump.to_string().green().bold().to_string()
        };
        println!(
            "  {} {} {}",
            bump.package.bold(),
            level,
            format!("({})", bump.reason).dimmed()
        );
    }

    match (report.outcome, &report.path, &report.rendered) {
        ("nothing_to_record", _, _) => println!(
            "{}",
            format!("No bump-relevant changes since {base}; nothing to record (use --empty to write one anyway).")
                .yellow()
        ),
        (_, _, Some(rendered)) => {
            println!();
            print!("{rendered}");
        }
        (outcome, Some(path), _) => {
            println!("{} Changeset {outcome}: {}", "✓".green(), path.cyan());
        }
        _ => {}
    }
    Ok(())
}
