//! CLI end-to-end tests for the argument surface and init flow.

use assert_cmd::Command;
use predicates::prelude::*;

fn testmind() -> Command {
    Command::cargo_bin("testmind").expect("binary builds")
}

#[test]
fn help_lists_commands() {
    testmind()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("heal"))
        .stdout(predicate::str::contains("stats"));
}

#[test]
fn version_prints() {
    testmind()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("testmind"));
}

#[test]
fn init_writes_config() {
    let dir = tempfile::tempdir().unwrap();

    testmind()
        .args(["--project", dir.path().to_str().unwrap(), "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains(".testmind.yml"));

    let config = std::fs::read_to_string(dir.path().join(".testmind.yml")).unwrap();
    assert!(config.contains("test_framework"));
    assert!(config.contains("llm_provider"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".testmind.yml"), "language: typescript\n").unwrap();

    testmind()
        .args(["--project", dir.path().to_str().unwrap(), "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    testmind()
        .args(["--project", dir.path().to_str().unwrap(), "init", "--force"])
        .assert()
        .success();
}

#[test]
fn generate_requires_a_file_argument() {
    testmind()
        .arg("generate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("FILE").or(predicate::str::contains("file")));
}

#[test]
fn unknown_subcommand_fails() {
    testmind().arg("transmogrify").assert().failure();
}

#[test]
fn heal_with_missing_report_fails() {
    let dir = tempfile::tempdir().unwrap();
    testmind()
        .args([
            "--project",
            dir.path().to_str().unwrap(),
            "heal",
            "no-such-report.json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-such-report.json"));
}

#[test]
fn invalid_config_fails_generate() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".testmind.yml"), "language: cobol\n").unwrap();

    testmind()
        .args([
            "--project",
            dir.path().to_str().unwrap(),
            "generate",
            "src/a.ts",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("language"));
}
