use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("indexpilot")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("fk-gaps"));
}

#[test]
fn analyze_requires_connection_arguments() {
    Command::cargo_bin("indexpilot")
        .unwrap()
        .env_remove("POSTGRES_DATABASE")
        .env_remove("POSTGRES_USER")
        .env_remove("POSTGRES_PASSWORD")
        .arg("analyze")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn version_flag_prints_version() {
    Command::cargo_bin("indexpilot")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}
