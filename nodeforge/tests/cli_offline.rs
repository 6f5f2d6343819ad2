//! CLI tests for the offline commands.
//!
//! Spawns the nodeforge binary against a local checkout and verifies output
//! and exit codes. Nothing here touches the network.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use nodeforge::exit_codes;
use nodeforge::test_support::{MANIFEST, label_file, node_files};

fn nodeforge(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nodeforge"))
        .current_dir(dir)
        .args(args)
        .args(["--repo-dir", "."])
        .output()
        .expect("run nodeforge")
}

fn write_response(dir: &Path, name: &str, body: &serde_json::Value) {
    fs::write(dir.join(name), body.to_string()).expect("write response");
}

#[test]
fn init_refuses_to_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let run = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_nodeforge"))
            .current_dir(temp.path())
            .args(args)
            .status()
            .expect("run nodeforge")
    };
    assert_eq!(run(&["init"]).code(), Some(exit_codes::OK));
    assert!(temp.path().join("nodeforge.toml").is_file());
    assert_eq!(run(&["init"]).code(), Some(exit_codes::INVALID));
    assert_eq!(run(&["init", "--force"]).code(), Some(exit_codes::OK));
}

#[test]
fn reconcile_prints_the_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = nodeforge(
        temp.path(),
        &["reconcile", "Create a node that sends slack alerts", "--name", "slack alert"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(plan["policy"], "kebab");
    assert_eq!(plan["artifacts"][0]["identifier"], "slack-alert");
    assert_eq!(plan["artifacts"][0]["isNew"], true);
    assert_eq!(plan["artifacts"][0]["resolvedVersion"], "1.0.0");
}

#[test]
fn ambiguous_reconcile_exits_with_reconcile_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = nodeforge(
        temp.path(),
        &[
            "reconcile",
            "Update onboarding",
            "--existing",
            "onboarding@1.0.0,workflow:onboarding",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::RECONCILE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("several existing artifacts"));
}

#[test]
fn validate_reports_rejections_and_accepts_complete_sets() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    fs::write(dir.join("package.json"), MANIFEST).expect("manifest");

    let mut files = node_files("slack-alert", "1.0.0");
    files.push(label_file("slack-alert", "Slack Alert"));
    write_response(
        dir,
        "good.json",
        &serde_json::json!({"files": files, "summary": "Add Slack alert"}),
    );
    let output = nodeforge(
        dir,
        &[
            "validate",
            "Create a node that sends slack alerts",
            "--name",
            "slack alert",
            "--response",
            "good.json",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let change_set: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(change_set["title"], "nodeforge: Add Slack alert");
    assert_eq!(change_set["files"][0]["type"], "config");

    let mut files = node_files("slack-alert", "1.0.0");
    files.pop();
    write_response(
        dir,
        "incomplete.json",
        &serde_json::json!({"files": files, "summary": "Add Slack alert"}),
    );
    let output = nodeforge(
        dir,
        &[
            "validate",
            "Create a node that sends slack alerts",
            "--name",
            "slack alert",
            "--response",
            "incomplete.json",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::VALIDATION));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[missing-required-file] nodes/slack-alert/1.0.0/schema.json"));
}

#[test]
fn malformed_response_exits_with_generation_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("prose.txt"), "Here are the files you asked for.").expect("write");
    let output = nodeforge(
        temp.path(),
        &["validate", "Create a csv reader", "--response", "prose.txt"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::GENERATION));
}

#[test]
fn publish_revalidates_saved_change_sets() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tampered = serde_json::json!({
        "title": "nodeforge: Add PDF parser",
        "summary": "Add PDF parser",
        "files": [
            {"path": "../outside.txt", "content": "x", "type": "config"}
        ],
        "artifacts": []
    });
    write_response(temp.path(), "changeset.json", &tampered);
    let output = nodeforge(temp.path(), &["publish", "--change-set", "changeset.json"]);
    assert_eq!(output.status.code(), Some(exit_codes::VALIDATION));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[unsafe-path] ../outside.txt"));
}
