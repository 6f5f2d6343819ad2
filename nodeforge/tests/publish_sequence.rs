//! Publish sequence properties: strict ordering, halting on the first failed
//! step, and base-branch resolution.

use nodeforge::core::types::{ChangeSet, GeneratedFile};
use nodeforge::io::github::PullRequestDraft;
use nodeforge::publish::{Phase, PublishOptions, publish, publish_with_salt};
use nodeforge::test_support::{HostCall, RecordingHost, node_files};

fn five_file_change_set() -> ChangeSet {
    ChangeSet {
        title: "nodeforge: Add PDF parser".to_string(),
        summary: "Adds a node that extracts text from PDFs".to_string(),
        files: node_files("pdf-parser", "1.0.0")
            .into_iter()
            .map(|file| GeneratedFile::new(file.path, file.content))
            .collect(),
        artifacts: Vec::new(),
    }
}

fn options() -> PublishOptions {
    PublishOptions {
        branch_prefix: "nodeforge".to_string(),
        title_prefix: "nodeforge".to_string(),
        fallback_branch: "main".to_string(),
    }
}

fn kinds(calls: &[HostCall]) -> Vec<&'static str> {
    calls
        .iter()
        .map(|call| match call {
            HostCall::DefaultBranch => "default-branch",
            HostCall::BranchHead(_) => "branch-head",
            HostCall::CreateBranch { .. } => "create-branch",
            HostCall::CreateBlob(_) => "create-blob",
            HostCall::CreateTree { .. } => "create-tree",
            HostCall::CreateCommit { .. } => "create-commit",
            HostCall::UpdateBranch { .. } => "update-branch",
            HostCall::CreatePullRequest(_) => "create-pull-request",
        })
        .collect()
}

#[test]
fn steps_run_in_order_with_one_blob_per_file() {
    let host = RecordingHost::new().with_default_branch("trunk");
    let change_set = five_file_change_set();
    let report = publish_with_salt(&host, &change_set, &options(), "654321").expect("publish");

    assert_eq!(
        kinds(&host.calls()),
        vec![
            "default-branch",
            "branch-head",
            "create-branch",
            "create-blob",
            "create-blob",
            "create-blob",
            "create-blob",
            "create-blob",
            "create-tree",
            "create-commit",
            "update-branch",
            "create-pull-request",
        ]
    );
    assert_eq!(report.commit, "commit-sha");
    assert_eq!(report.pull_request.url, "https://github.test/acme/flows/pull/1");

    let calls = host.calls();
    let Some(HostCall::CreateTree { base_tree, entries }) = calls
        .iter()
        .find(|call| matches!(call, HostCall::CreateTree { .. }))
    else {
        panic!("tree not created");
    };
    assert_eq!(base_tree, "base-sha");
    let tree_paths: Vec<&str> = entries.iter().map(|entry| entry.path.as_str()).collect();
    let file_paths: Vec<&str> = change_set
        .files
        .iter()
        .map(|file| file.path.as_str())
        .collect();
    assert_eq!(tree_paths, file_paths);

    assert_eq!(
        calls.last(),
        Some(&HostCall::CreatePullRequest(PullRequestDraft {
            title: "nodeforge: Add PDF parser".to_string(),
            body: "Adds a node that extracts text from PDFs".to_string(),
            head: "nodeforge/add-pdf-parser-654321".to_string(),
            base: "trunk".to_string(),
        }))
    );
}

#[test]
fn third_blob_failure_halts_before_tree() {
    let host = RecordingHost::new().fail_on("create_blob", 3, "blob rejected");
    let change_set = five_file_change_set();
    let err = publish_with_salt(&host, &change_set, &options(), "7").expect_err("blob 3 fails");

    assert_eq!(err.phase, Phase::CreateBlob);
    assert_eq!(err.subject.as_deref(), Some(change_set.files[2].path.as_str()));
    assert_eq!(err.detail, "blob rejected");
    assert_eq!(err.branch.as_deref(), Some("nodeforge/add-pdf-parser-7"));
    assert_eq!(
        kinds(&host.calls()),
        vec![
            "default-branch",
            "branch-head",
            "create-branch",
            "create-blob",
            "create-blob",
            "create-blob",
        ]
    );
}

#[test]
fn pull_request_failure_is_reported_last() {
    let host = RecordingHost::new().fail_on("create_pull_request", 1, "A pull request already exists");
    let err = publish_with_salt(&host, &five_file_change_set(), &options(), "9")
        .expect_err("pr fails");
    assert_eq!(err.phase, Phase::CreatePullRequest);
    assert_eq!(err.to_string(), "Create PR failed: A pull request already exists");
    assert_eq!(host.calls().len(), 12);
}

#[test]
fn repository_without_default_branch_uses_fallback() {
    let host = RecordingHost::new();
    let report = publish(&host, &five_file_change_set(), &options()).expect("publish");
    assert_eq!(report.base_branch, "main");
    assert_eq!(host.calls()[1], HostCall::BranchHead("main".to_string()));

    let salt = report
        .branch
        .strip_prefix("nodeforge/add-pdf-parser-")
        .expect("prefix");
    assert_eq!(salt.len(), 6);
    assert!(salt.chars().all(|c| c.is_ascii_digit()));
}
