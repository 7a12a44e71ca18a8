use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_config(dir: &Path) -> PathBuf {
    let config = dir.join("config.toml");
    let content = format!(
        r#"
[logging]
level = "warn"

[storage]
database_url = "sqlite:{db}"

[delivery]
outbox_dir = "{outbox}"
"#,
        db = dir.join("jobgate.db").display(),
        outbox = dir.join("outbox").display(),
    );
    std::fs::write(&config, content).unwrap();
    config
}

fn jobgate(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("jobgate").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("jobgate").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("jobgate 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("jobgate").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Quota-aware per-entity job admission and execution",
        ));
}

#[test]
fn test_cli_submit_missing_text() {
    let mut cmd = Command::cargo_bin("jobgate").unwrap();
    cmd.args(["submit", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_init_db() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    jobgate(&config)
        .arg("init-db")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database ready"));
    assert!(dir.path().join("jobgate.db").exists());
}

#[test]
fn test_cli_status_of_new_entity() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    jobgate(&config)
        .args(["status", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"tier\": \"free\""))
        .stdout(predicate::str::contains("\"remaining\": 3"));
}

#[test]
fn test_cli_submit_without_link_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    jobgate(&config)
        .args(["submit", "12", "no link here"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid_resource"));
}

#[test]
fn test_cli_subscribe_then_status() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    jobgate(&config)
        .args(["subscribe", "12", "--payment-ref", "charge_12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("charge_12"));

    jobgate(&config)
        .args(["status", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"tier\": \"premium\""))
        .stdout(predicate::str::contains("\"remaining\": null"));
}

#[test]
fn test_cli_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[quota]\ndaily_free_limit = 0\n").unwrap();

    jobgate(&config)
        .args(["status", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Daily free limit must be > 0"));
}
