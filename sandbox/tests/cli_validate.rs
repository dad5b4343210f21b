//! CLI tests for the validation commands.
//!
//! Spawns the sandbox binary in a scratch directory and checks exit codes
//! and the shape of what it prints.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use sandbox::exit_codes;
use sandbox::test_support::{GATED_INGEST, UNGATED_INGEST, VIOLATING_ENTRIES};
use serde_json::Value;

fn sandbox(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sandbox"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run sandbox")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn validate_exit_codes_follow_the_verdict() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("good.py"), GATED_INGEST).expect("write");
    fs::write(temp.path().join("bad.py"), VIOLATING_ENTRIES).expect("write");

    let good = sandbox(temp.path(), &["validate", "good.py"]);
    assert_eq!(good.status.code(), Some(exit_codes::OK));
    assert!(stdout(&good).contains("PASSED"), "{}", stdout(&good));

    let bad = sandbox(temp.path(), &["validate", "bad.py"]);
    assert_eq!(bad.status.code(), Some(exit_codes::REJECTED));
    assert!(stdout(&bad).contains("REJECTED"), "{}", stdout(&bad));
}

#[test]
fn missing_script_is_invalid_input() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = sandbox(temp.path(), &["validate", "nope.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("read script"));
}

#[test]
fn broken_config_is_invalid_input() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("sandbox.toml"), "[ledger]\nvalid_accounts = []\n").expect("write");
    fs::write(temp.path().join("good.py"), GATED_INGEST).expect("write");
    let output = sandbox(temp.path(), &["validate", "good.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn validate_json_reports_diff_against_previous() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("old.py"), GATED_INGEST).expect("write");
    fs::write(temp.path().join("new.py"), UNGATED_INGEST).expect("write");

    let output = sandbox(
        temp.path(),
        &["validate", "new.py", "--previous", "old.py", "--json"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let verdict: Value = serde_json::from_slice(&output.stdout).expect("json verdict");
    assert_eq!(verdict["passed"], Value::Bool(true));
    let changes = verdict["diff_changes"].as_array().expect("diff changes");
    assert!(
        changes
            .iter()
            .any(|c| c["description"] == "Removed primitive call: queue_add_review (was 1x)")
    );
}

#[test]
fn check_rejects_forbidden_constructs() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("evil.py"), "eval('1 + 1')\n").expect("write");
    let output = sandbox(temp.path(), &["check", "evil.py"]);
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(stdout(&output).contains("Forbidden construct: eval("));
}

#[test]
fn responses_file_overrides_synthetic_data() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("scan.py"), "len(importer_scan())\n").expect("write");
    fs::write(temp.path().join("responses.json"), r#"{"importer_scan": []}"#).expect("write");

    let output = sandbox(
        temp.path(),
        &["--responses", "responses.json", "dry-run", "scan.py", "--json"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["output"], Value::from(0));
}

#[test]
fn run_rehearses_through_a_bridge_child() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("ingest.py"), GATED_INGEST).expect("write");

    let output = sandbox(temp.path(), &["run", "ingest.py", "--log", "calls.jsonl"]);
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let result: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(result["commit_hash"], Value::from("abc123"));

    let log = fs::read_to_string(temp.path().join("calls.jsonl")).expect("call log");
    assert!(log.lines().count() > 5);
    assert!(log.lines().all(|line| serde_json::from_str::<Value>(line).is_ok()));
}
