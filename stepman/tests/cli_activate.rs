//! CLI tests for `stepman activate`.
//!
//! Spawns the binary against a local `file://` library and checks exit codes
//! and the JSON it prints.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use stepman::exit_codes;
use stepman::test_support::FixtureLibrary;

fn stepman(home: &Path, cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_stepman"));
    cmd.current_dir(cwd)
        .env("STEPMAN_HOME", home)
        .env("RUST_LOG", "error")
        .env_remove("STEPMAN_OFFLINE_MODE")
        .env_remove("BITRISE_OFFLINE_MODE");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("spawn stepman")
}

#[test]
fn path_step_activation_prints_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    let step = temp.path().join("my-step");
    fs::create_dir_all(&step).expect("mkdir");
    fs::write(step.join("step.yml"), "title: Mine\n").expect("write");
    fs::write(step.join("step.sh"), "echo hi\n").expect("write");

    let output = run(stepman(&temp.path().join("home"), temp.path()).args([
        "activate",
        "path::./my-step",
        "--step-dir",
        "out/step",
        "--work-dir",
        "out/work",
        "--prepare",
    ]));
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(json["activated"]["step_dir"], "out/step");
    assert_eq!(json["activated"]["did_steplib_update"], false);
    assert_eq!(json["command"]["toolkit"], "bash");
    assert!(temp.path().join("out/step/step.sh").is_file());
    assert!(temp.path().join("out/work/current_step.yml").is_file());
}

#[test]
fn malformed_constraint_exits_with_invalid_reference() {
    let temp = tempfile::tempdir().expect("tempdir");
    let library = FixtureLibrary::new(&temp.path().join("fixture")).expect("fixture");
    library.add_step("script", "1.0.0", "").expect("add");

    let output = run(stepman(&temp.path().join("home"), temp.path()).args([
        "activate",
        &format!("{}::script@1.x.x", library.uri()),
        "--step-dir",
        "step",
        "--work-dir",
        "work",
    ]));
    assert_eq!(output.status.code(), Some(exit_codes::INVALID_REFERENCE));
    assert!(String::from_utf8_lossy(&output.stderr).contains("1.x.x"));
}

#[test]
fn offline_cache_miss_exits_with_offline_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    let library = FixtureLibrary::new(&temp.path().join("fixture")).expect("fixture");
    library.add_step("script", "1.0.0", "").expect("add");

    let setup = run(stepman(&home, temp.path()).args(["setup", "--library", &library.uri()]));
    assert_eq!(
        setup.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&setup.stderr)
    );

    let output = run(stepman(&home, temp.path())
        .env("STEPMAN_OFFLINE_MODE", "true")
        .args([
            "activate",
            "script@1.0.0",
            "--default-library",
            &library.uri(),
            "--step-dir",
            "step",
            "--work-dir",
            "work",
        ]));
    assert_eq!(output.status.code(), Some(exit_codes::OFFLINE_UNAVAILABLE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("offline mode"), "stderr: {stderr}");
    assert!(stderr.contains("(none)"), "stderr: {stderr}");
}
