//! CLI integration tests for dbconvert.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for various error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the dbconvert binary.
fn cmd() -> Command {
    Command::cargo_bin("dbconvert").unwrap()
}

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("script"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("engines"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--scope"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--workers"));
}

#[test]
fn test_script_requires_output() {
    cmd()
        .arg("script")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbconvert"));
}

#[test]
fn test_invalid_scope_rejected() {
    cmd()
        .args(["run", "--scope", "everything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

// =============================================================================
// Engine Listing
// =============================================================================

#[test]
fn test_engines_lists_builtins_without_config() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "engines"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mssql"))
        .stdout(predicate::str::contains("mysql"))
        .stdout(predicate::str::contains("postgres"))
        .stdout(predicate::str::contains("sqlite"));
}

#[test]
fn test_engines_json_includes_aliases() {
    cmd()
        .args(["--output-json", "engines"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"aliases\""))
        .stdout(predicate::str::contains("mariadb"));
}

// =============================================================================
// Configuration Errors
// =============================================================================

#[test]
fn test_missing_config_file() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "health-check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_invalid_yaml_exit_code() {
    let file = config_file("source: [\n");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(2);
}

#[test]
fn test_unknown_engine_exit_code() {
    let file = config_file(
        r#"
source:
  engine: oracle
  host: db1
  database: shop
target:
  engine: postgres
  host: db2
  database: shop
"#,
    );
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_zero_workers_override_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = config_file(&format!(
        "source:\n  engine: sqlite\n  path: {}\ntarget:\n  engine: sqlite\n  path: {}\n",
        dir.path().join("source.db").display(),
        dir.path().join("target.db").display()
    ));
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run", "--workers", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("workers"));
}

// =============================================================================
// Dry Run
// =============================================================================

#[test]
fn test_dry_run_on_empty_sqlite_source() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target.db");
    let file = config_file(&format!(
        "source:\n  engine: sqlite\n  path: {}\ntarget:\n  engine: sqlite\n  path: {}\n",
        dir.path().join("source.db").display(),
        target.display()
    ));
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "run",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"run_id\""));
}
