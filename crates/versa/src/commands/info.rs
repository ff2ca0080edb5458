//! Info command: show tool, config, and discovered package information.

use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use versa_core::config::{self, Config};
use versa_core::workspace::{Package, discover_packages};

use super::{print_json, repo_root};

/// Arguments for the `info` subcommand.
#[derive(Args, Debug, Default)]
pub struct InfoArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct PackageInfo {
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    repository: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    license: &'static str,
}

impl PackageInfo {
    const fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            repository: env!("CARGO_PKG_REPOSITORY"),
            license: env!("CARGO_PKG_LICENSE"),
        }
    }
}

#[derive(Serialize)]
struct ConfigInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    config_file: Option<String>,
    log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_dir: Option<String>,
    package_roots: Vec<String>,
    changeset_dir: String,
    prerelease_state_file: String,
}

impl ConfigInfo {
    fn from_config(config: &Config, cwd: &camino::Utf8Path) -> Self {
        Self {
            config_file: config::find_project_config(cwd).map(|p| p.to_string()),
            log_level: config.log_level.as_str().to_string(),
            log_dir: config.log_dir.as_ref().map(|p| p.to_string()),
            package_roots: config.packages.roots.clone(),
            changeset_dir: config.changesets.dir.to_string(),
            prerelease_state_file: config.prerelease.state_file.to_string(),
        }
    }
}

#[derive(Serialize)]
struct FullInfo {
    #[serde(flatten)]
    package: PackageInfo,
    config: ConfigInfo,
    root: String,
    packages: Vec<Package>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discovery_error: Option<String>,
}

/// Print tool, configuration, and package information.
#[instrument(name = "cmd_info", skip_all, fields(json_output))]
pub fn cmd_info(
    _args: InfoArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing info command");

    let root = repo_root(cwd);
    let (packages, discovery_error) = match discover_packages(&root, &config.packages.roots) {
        Ok(packages) => (packages, None),
        Err(e) => {
            warn!(error = %e, "package discovery failed");
            (Vec::new(), Some(e.to_string()))
        }
    };

    let info = FullInfo {
        package: PackageInfo::new(),
        config: ConfigInfo::from_config(config, cwd),
        root: root.to_string(),
        packages,
        discovery_error,
    };

    if global_json {
        return print_json(&info);
    }

    println!("{} {}", info.package.name.bold(), info.package.version.green());
    if !info.package.description.is_empty() {
        println!("{}", info.package.description);
    }
    if !info.package.license.is_empty() {
        println!("{}: {}", "License".dimmed(), info.package.license);
    }
    if !info.package.repository.is_empty() {
        println!("{}: {}", "Repository".dimmed(), info.package.repository.cyan());
    }

    println!();
    println!("{}", "Configuration".bold().underline());
    match info.config.config_file {
        Some(ref path) => println!("{}: {}", "Config file".dimmed(), path.cyan()),
        None => println!("{}: {}", "Config file".dimmed(), "none loaded".yellow()),
    }
    println!("{}: {}", "Log level".dimmed(), info.config.log_level);
    if let Some(ref dir) = info.config.log_dir {
        println!("{}: {}", "Log directory".dimmed(), dir);
    }
    println!(
        "{}: {}",
        "Package roots".dimmed(),
        info.config.package_roots.join(", ")
    );
    println!("{}: {}", "Changesets".dimmed(), info.config.changeset_dir);
    println!(
        "{}: {}",
        "Prerelease state".dimmed(),
        info.config.prerelease_state_file
    );

    println!();
    println!("{}", "Packages".bold().underline());
    println!("{}: {}", "Root".dimmed(), info.root);
    if let Some(ref err) = info.discovery_error {
        println!("  {} {}", "✗".red(), err.red());
    } else if info.packages.is_empty() {
        println!("  {} {}", "○".yellow(), "No packages discovered".yellow());
    }
    for package in &info.packages {
        println!(
            "  {} {} {}",
            package.name.bold(),
            package.current_version.green(),
            format!("({}, {})", package.path, package.ecosystem).dimmed()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cwd() -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from("/tmp")
    }

    #[test]
    fn text_output_succeeds() {
        assert!(cmd_info(InfoArgs::default(), false, &Config::default(), &test_cwd()).is_ok());
    }

    #[test]
    fn json_output_succeeds() {
        assert!(cmd_info(InfoArgs::default(), true, &Config::default(), &test_cwd()).is_ok());
    }

    #[test]
    fn config_info_reports_defaults() {
        let cwd = camino::Utf8PathBuf::from("/nonexistent");
        let info = ConfigInfo::from_config(&Config::default(), &cwd);
        assert!(info.config_file.is_none());
        assert_eq!(info.log_level, "info");
        assert_eq!(info.changeset_dir, ".changeset");
        assert_eq!(info.package_roots, ["packages", "apps"]);
    }
}
