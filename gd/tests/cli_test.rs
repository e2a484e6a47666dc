//! CLI smoke tests for the `gd` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_manifest(dir: &TempDir) {
    std::fs::write(
        dir.path().join("graphdrive.yml"),
        "packages:\n  - name: util\n    version: 1.0.0\n    path: .\n  - name: core\n    path: .\n    dependencies: [util]\n",
    )
    .unwrap();
}

fn gd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gd").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("gd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("recover"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_run_succeeds_and_cleans_checkpoint() {
    let temp = TempDir::new().unwrap();
    write_manifest(&temp);

    gd(&temp)
        .args(["run", "echo hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("done"))
        .stdout(predicate::str::contains("2/2 completed"));

    assert!(!temp.path().join(".graphdrive/checkpoint.json").exists());
}

#[test]
fn test_failed_run_exits_nonzero_and_keeps_checkpoint() {
    let temp = TempDir::new().unwrap();
    write_manifest(&temp);

    gd(&temp)
        .args(["run", "exit 7"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("fail"));

    assert!(temp.path().join(".graphdrive/checkpoint.json").exists());

    gd(&temp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Parallel Execution Status"))
        .stdout(predicate::str::contains("Failed:    1"));
}

#[test]
fn test_status_without_checkpoint() {
    let temp = TempDir::new().unwrap();
    write_manifest(&temp);

    gd(&temp)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoint found"));
}

#[test]
fn test_recover_skip_failed_unblocks_status() {
    let temp = TempDir::new().unwrap();
    write_manifest(&temp);

    gd(&temp).args(["run", "exit 7"]).assert().code(1);

    gd(&temp)
        .args(["recover", "--skip-failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Failed:    0"));

    gd(&temp)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("consistent"));
}

#[test]
fn test_clean_removes_checkpoint() {
    let temp = TempDir::new().unwrap();
    write_manifest(&temp);

    gd(&temp).args(["run", "exit 7"]).assert().code(1);
    assert!(temp.path().join(".graphdrive/checkpoint.json").exists());

    gd(&temp)
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("Checkpoint removed"));

    assert!(!temp.path().join(".graphdrive/checkpoint.json").exists());
}

#[test]
fn test_run_rejects_cyclic_manifest() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("graphdrive.yml"),
        "packages:\n  - name: a\n    dependencies: [b]\n  - name: b\n    dependencies: [a]\n",
    )
    .unwrap();

    gd(&temp).args(["run", "echo hi"]).assert().failure();
}
