use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::Command;

fn monitor_cmd(workdir: &std::path::Path) -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("attendance-monitor");
    let mut cmd = Command::new(bin);
    cmd.current_dir(workdir)
        .env_remove("ATTENDANCE_IDENTIFIER")
        .env_remove("ATTENDANCE_SECRET")
        .env("RUST_LOG", "warn");
    cmd
}

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("attendance.yaml");
    std::fs::write(
        &path,
        "interval_secs: 120\nportal:\n  base_url: http://127.0.0.1:9\n  login_url: http://127.0.0.1:9/Account/Login\n",
    )
    .expect("write config");
    path
}

#[test]
fn help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    monitor_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn config_show_emits_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let assert = monitor_cmd(dir.path())
        .args(["config", "--config", config.to_str().unwrap(), "-o", "json"])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    let value: Value = serde_json::from_str(stdout.trim()).expect("valid json");
    assert_eq!(value["interval_secs"].as_u64(), Some(120));
    assert_eq!(value["portal"]["base_url"].as_str(), Some("http://127.0.0.1:9"));
}

#[test]
fn config_validate_rejects_zero_interval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "interval_secs: 0\n").unwrap();

    monitor_cmd(dir.path())
        .args(["config", "validate", "--config", path.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn doctor_needs_no_driver_for_lightweight() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    monitor_cmd(dir.path())
        .args([
            "doctor",
            "--strategy",
            "lightweight",
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("not needed"));
}

#[test]
fn run_without_credentials_or_terminal_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    monitor_cmd(dir.path())
        .args(["run", "--config", config.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ATTENDANCE_SECRET"));
}
