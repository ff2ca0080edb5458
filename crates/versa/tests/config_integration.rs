//! Configuration discovery integration tests
//!
//! Each test builds a directory tree in a tempdir and inspects the resolved
//! configuration through `info --json`.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[allow(deprecated)]
fn cmd() -> Command {
    Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap()
}

/// Run `info --json` in `dir`, isolated from the user's config and log dirs.
fn info_json(dir: &Path) -> serde_json::Value {
    let home = TempDir::new().unwrap();
    let assert = cmd()
        .current_dir(dir)
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("VERSA_LOG_DIR", home.path().join("logs"))
        .args(["info", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    serde_json::from_str(&stdout).expect("info --json should output valid JSON")
}

fn failing_info(dir: &Path) -> assert_cmd::assert::Assert {
    let home = TempDir::new().unwrap();
    cmd()
        .current_dir(dir)
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("VERSA_LOG_DIR", home.path().join("logs"))
        .arg("info")
        .assert()
        .failure()
}

// =============================================================================
// Discovery
// =============================================================================

#[test]
fn runs_without_config_file() {
    let tmp = TempDir::new().unwrap();
    let json = info_json(tmp.path());
    assert!(json["config"]["config_file"].is_null());
    assert_eq!(json["config"]["changeset_dir"], ".changeset");
    assert_eq!(json["config"]["prerelease_state_file"], ".changeset/pre.json");
    assert_eq!(json["config"]["package_roots"][0], "packages");
    assert_eq!(json["config"]["package_roots"][1], "apps");
}

#[test]
fn discovers_dotfile_config_in_current_dir() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".versa.toml"), "log_level = \"debug\"\n").unwrap();
    let json = info_json(tmp.path());
    assert!(
        json["config"]["config_file"]
            .as_str()
            .unwrap()
            .ends_with(".versa.toml")
    );
    assert_eq!(json["config"]["log_level"], "debug");
}

#[test]
fn discovers_regular_config_in_current_dir() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("versa.toml"), "log_level = \"warn\"\n").unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["log_level"], "warn");
}

#[test]
fn discovers_config_in_parent_directory() {
    let tmp = TempDir::new().unwrap();
    let sub = tmp.path().join("packages").join("ui");
    fs::create_dir_all(&sub).unwrap();
    fs::write(
        tmp.path().join(".versa.toml"),
        "[changesets]\ndir = \"changes\"\n",
    )
    .unwrap();
    let json = info_json(&sub);
    assert_eq!(json["config"]["changeset_dir"], "changes");
}

#[test]
fn dotfile_takes_precedence_over_regular_name() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".versa.toml"), "log_level = \"debug\"\n").unwrap();
    fs::write(tmp.path().join("versa.toml"), "log_level = \"error\"\n").unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["log_level"], "debug");
}

#[test]
fn closer_config_takes_precedence() {
    let tmp = TempDir::new().unwrap();
    let sub = tmp.path().join("nested");
    fs::create_dir(&sub).unwrap();
    fs::write(tmp.path().join(".versa.toml"), "log_level = \"error\"\n").unwrap();
    fs::write(sub.join(".versa.toml"), "log_level = \"debug\"\n").unwrap();
    let json = info_json(&sub);
    assert_eq!(json["config"]["log_level"], "debug");
}

// =============================================================================
// Formats
// =============================================================================

#[test]
fn parses_toml_sections() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".versa.toml"),
        r#"
[packages]
roots = ["crates"]

[changesets]
dir = ".changes"
base = "develop"

[prerelease]
state_file = ".changes/pre.json"
"#,
    )
    .unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["package_roots"], serde_json::json!(["crates"]));
    assert_eq!(json["config"]["changeset_dir"], ".changes");
    assert_eq!(json["config"]["prerelease_state_file"], ".changes/pre.json");
}

#[test]
fn parses_yaml_config() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".versa.yaml"),
        "log_level: info\nchangesets:\n  dir: notes\n",
    )
    .unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["log_level"], "info");
    assert_eq!(json["config"]["changeset_dir"], "notes");
}

#[test]
fn parses_yml_config() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".versa.yml"), "log_level: warn\n").unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["log_level"], "warn");
}

#[test]
fn parses_json_config() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".versa.json"),
        r#"{"log_level": "debug", "packages": {"roots": ["libs"]}}"#,
    )
    .unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["log_level"], "debug");
    assert_eq!(json["config"]["package_roots"], serde_json::json!(["libs"]));
}

#[test]
fn toml_preferred_over_yaml_in_same_directory() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".versa.toml"), "log_level = \"error\"\n").unwrap();
    fs::write(tmp.path().join(".versa.yaml"), "log_level: debug\n").unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["log_level"], "error");
}

#[test]
fn configured_package_roots_drive_discovery() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".versa.toml"),
        "[packages]\nroots = [\"libs\"]\n",
    )
    .unwrap();
    let pkg = tmp.path().join("libs").join("core");
    fs::create_dir_all(&pkg).unwrap();
    fs::write(
        pkg.join("Cargo.toml"),
        "[package]\nname = \"core\"\nversion = \"0.2.0\"\n",
    )
    .unwrap();
    let ignored = tmp.path().join("packages").join("ui");
    fs::create_dir_all(&ignored).unwrap();
    fs::write(
        ignored.join("package.json"),
        "{\"name\": \"ui\", \"version\": \"1.0.0\"}\n",
    )
    .unwrap();

    let json = info_json(tmp.path());
    let packages = json["packages"].as_array().unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0]["name"], "core");
    assert_eq!(packages[0]["current_version"], "0.2.0");
}

// =============================================================================
// Invalid Configs
// =============================================================================

#[test]
fn invalid_toml_config_shows_error() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".versa.toml"), "log_level = [unclosed").unwrap();
    failing_info(tmp.path()).stderr(predicate::str::contains("configuration"));
}

#[test]
fn invalid_yaml_config_shows_error() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".versa.yaml"), "log_level: [unclosed\n").unwrap();
    failing_info(tmp.path()).stderr(predicate::str::contains("configuration"));
}

#[test]
fn invalid_log_level_shows_error() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".versa.json"), r#"{"log_level": "loud"}"#).unwrap();
    failing_info(tmp.path()).stderr(predicate::str::contains("configuration"));
}

#[test]
fn unknown_config_field_is_ignored() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join(".versa.toml"),
        "log_level = \"warn\"\nunknown_field = \"ignored\"\n",
    )
    .unwrap();
    let json = info_json(tmp.path());
    assert_eq!(json["config"]["log_level"], "warn");
}

#[test]
fn explicit_config_flag_is_merged() {
    let tmp = TempDir::new().unwrap();
    let extra = tmp.path().join("release.toml");
    fs::write(&extra, "[changesets]\ndir = \"from-flag\"\n").unwrap();
    let home = TempDir::new().unwrap();
    let assert = cmd()
        .current_dir(tmp.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("VERSA_LOG_DIR", home.path().join("logs"))
        .arg("--config")
        .arg(&extra)
        .args(["info", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["config"]["changeset_dir"], "from-flag");
}

// =============================================================================
// Boundary
// =============================================================================

#[test]
fn git_boundary_stops_config_search() {
    let tmp = TempDir::new().unwrap();
    let parent = tmp.path();
    let repo = parent.join("repo");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::write(parent.join(".versa.toml"), "log_level = \"debug\"\n").unwrap();

    let json = info_json(&repo);
    assert!(json["config"]["config_file"].is_null());
    assert_eq!(json["config"]["log_level"], "info");
}

#[test]
fn config_beside_git_is_found_from_subdirectory() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    let sub = repo.join("packages").join("ui");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::create_dir_all(&sub).unwrap();
    fs::write(
        repo.join(".versa.toml"),
        "[changesets]\nbase = \"trunk\"\ndir = \".changes\"\n",
    )
    .unwrap();

    let json = info_json(&sub);
    assert_eq!(json["config"]["changeset_dir"], ".changes");
    assert_eq!(json["root"], repo.to_str().unwrap());
}
