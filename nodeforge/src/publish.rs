//! Transactional publisher.
//!
//! Realizes one [`ChangeSet`] as a single commit on a new branch plus a pull
//! request. The remote API has no transaction primitive: the sequence runs
//! strictly in order, stops at the first failure, and reports the phase that
//! failed. Nothing is rolled back; a retry starts over on a fresh branch.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::branch::{branch_name, time_salt};
use crate::core::types::{ChangeSet, PullRequest};
use crate::io::github::{GitHost, HostError, PullRequestDraft, TreeEntry};

/// Step of the publish sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    ResolveDefaultBranch,
    ReadBaseRef,
    CreateBranch,
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateBranchRef,
    CreatePullRequest,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::ResolveDefaultBranch => "Fetch Repo Info",
            Phase::ReadBaseRef => "Get Base Ref",
            Phase::CreateBranch => "Create Branch",
            Phase::CreateBlob => "Create Blob",
            Phase::CreateTree => "Create Tree",
            Phase::CreateCommit => "Create Commit",
            Phase::UpdateBranchRef => "Update Branch Ref",
            Phase::CreatePullRequest => "Create PR",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A publish step failed. Steps before it took effect and stay in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{phase}{} failed: {detail}", subject_suffix(.subject))]
pub struct PublishError {
    pub phase: Phase,
    /// File path for blob failures, branch name for ref failures.
    pub subject: Option<String>,
    /// Upstream message.
    pub detail: String,
    /// Branch created before the failure, if any.
    pub branch: Option<String>,
}

fn subject_suffix(subject: &Option<String>) -> String {
    subject
        .as_deref()
        .map(|subject| format!(" ({subject})"))
        .unwrap_or_default()
}

/// Naming knobs for the publish sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub branch_prefix: String,
    pub title_prefix: String,
    /// Base branch used when repository metadata names none.
    pub fallback_branch: String,
}

/// Outcome of a completed publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub branch: String,
    pub base_branch: String,
    pub commit: String,
    pub pull_request: PullRequest,
}

/// Publish `change_set`, salting the branch name with the wall clock.
pub fn publish(
    host: &dyn GitHost,
    change_set: &ChangeSet,
    options: &PublishOptions,
) -> Result<PublishReport, PublishError> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    publish_with_salt(host, change_set, options, &time_salt(millis))
}

/// Tracks progress so a failure can name the phase and the branch left behind.
struct Sequence<'a> {
    host: &'a dyn GitHost,
    branch: Option<String>,
}

impl Sequence<'_> {
    fn step<T>(
        &self,
        phase: Phase,
        subject: Option<&str>,
        call: impl FnOnce(&dyn GitHost) -> Result<T, HostError>,
    ) -> Result<T, PublishError> {
        call(self.host).map_err(|err| {
            warn!(phase = %phase, subject, err = %err, "publish step failed");
            PublishError {
                phase,
                subject: subject.map(str::to_string),
                detail: err.message,
                branch: self.branch.clone(),
            }
        })
    }
}

/// Publish with an explicit branch-name salt.
#[instrument(skip_all, fields(files = change_set.files.len(), salt = %salt))]
pub fn publish_with_salt(
    host: &dyn GitHost,
    change_set: &ChangeSet,
    options: &PublishOptions,
    salt: &str,
) -> Result<PublishReport, PublishError> {
    let mut sequence = Sequence { host, branch: None };

    let base_branch = sequence
        .step(Phase::ResolveDefaultBranch, None, |host| host.default_branch())?
        .unwrap_or_else(|| options.fallback_branch.clone());
    let base_sha = sequence.step(Phase::ReadBaseRef, Some(&base_branch), |host| {
        host.branch_head(&base_branch)
    })?;

    let branch = branch_name(
        &options.branch_prefix,
        &change_set.title,
        &options.title_prefix,
        salt,
    );
    sequence.step(Phase::CreateBranch, Some(&branch), |host| {
        host.create_branch(&branch, &base_sha)
    })?;
    sequence.branch = Some(branch.clone());
    info!(branch = %branch, base = %base_branch, "branch created");

    let mut entries = Vec::with_capacity(change_set.files.len());
    for file in &change_set.files {
        let sha = sequence.step(Phase::CreateBlob, Some(&file.path), |host| {
            host.create_blob(&file.content)
        })?;
        entries.push(TreeEntry {
            path: file.path.clone(),
            sha,
        });
    }

    let tree = sequence.step(Phase::CreateTree, None, |host| {
        host.create_tree(&base_sha, &entries)
    })?;
    let commit = sequence.step(Phase::CreateCommit, None, |host| {
        host.create_commit(&change_set.title, &tree, &base_sha)
    })?;
    sequence.step(Phase::UpdateBranchRef, Some(&branch), |host| {
        host.update_branch(&branch, &commit)
    })?;

    let draft = PullRequestDraft {
        title: change_set.title.clone(),
        body: change_set.summary.clone(),
        head: branch.clone(),
        base: base_branch.clone(),
    };
    let pull_request = sequence.step(Phase::CreatePullRequest, None, |host| {
        host.create_pull_request(&draft)
    })?;
    info!(url = %pull_request.url, number = pull_request.number, "pull request opened");

    Ok(PublishReport {
        branch,
        base_branch,
        commit,
        pull_request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GeneratedFile;
    use crate::test_support::{HostCall, RecordingHost};

    fn change_set() -> ChangeSet {
        ChangeSet {
            title: "nodeforge: Add PDF parser".to_string(),
            summary: "Adds a PDF parser node".to_string(),
            files: vec![
                GeneratedFile::new("flow-id-to-label/pdf-parser.txt", "PDF Parser"),
                GeneratedFile::new("nodes/pdf-parser/1.0.0/main.ts", "export default 1"),
            ],
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

    #[test]
    fn runs_the_full_sequence_in_order() {
        let host = RecordingHost::new().with_default_branch("develop");
        let report =
            publish_with_salt(&host, &change_set(), &options(), "123456").expect("publish");

        assert_eq!(report.branch, "nodeforge/add-pdf-parser-123456");
        assert_eq!(report.base_branch, "develop");
        assert_eq!(report.pull_request.number, 1);

        let calls = host.calls();
        assert_eq!(
            calls,
            vec![
                HostCall::DefaultBranch,
                HostCall::BranchHead("develop".to_string()),
                HostCall::CreateBranch {
                    branch: "nodeforge/add-pdf-parser-123456".to_string(),
                    sha: "base-sha".to_string(),
                },
                HostCall::CreateBlob("PDF Parser".to_string()),
                HostCall::CreateBlob("export default 1".to_string()),
                HostCall::CreateTree {
                    base_tree: "base-sha".to_string(),
                    entries: vec![
                        TreeEntry {
                            path: "flow-id-to-label/pdf-parser.txt".to_string(),
                            sha: "blob-1".to_string(),
                        },
                        TreeEntry {
                            path: "nodes/pdf-parser/1.0.0/main.ts".to_string(),
                            sha: "blob-2".to_string(),
                        },
                    ],
                },
                HostCall::CreateCommit {
                    message: "nodeforge: Add PDF parser".to_string(),
                    tree: "tree-sha".to_string(),
                    parent: "base-sha".to_string(),
                },
                HostCall::UpdateBranch {
                    branch: "nodeforge/add-pdf-parser-123456".to_string(),
                    sha: "commit-sha".to_string(),
                },
                HostCall::CreatePullRequest(PullRequestDraft {
                    title: "nodeforge: Add PDF parser".to_string(),
                    body: "Adds a PDF parser node".to_string(),
                    head: "nodeforge/add-pdf-parser-123456".to_string(),
                    base: "develop".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn missing_default_branch_falls_back() {
        let host = RecordingHost::new();
        let report =
            publish_with_salt(&host, &change_set(), &options(), "000001").expect("publish");
        assert_eq!(report.base_branch, "main");
        assert_eq!(host.calls()[1], HostCall::BranchHead("main".to_string()));
    }

    #[test]
    fn failed_blob_halts_and_names_the_file() {
        let host = RecordingHost::new().fail_on("create_blob", 2, "content too large");
        let err =
            publish_with_salt(&host, &change_set(), &options(), "42").expect_err("blob fails");

        assert_eq!(err.phase, Phase::CreateBlob);
        assert_eq!(
            err.subject.as_deref(),
            Some("nodes/pdf-parser/1.0.0/main.ts")
        );
        assert_eq!(err.branch.as_deref(), Some("nodeforge/add-pdf-parser-42"));
        assert_eq!(
            err.to_string(),
            "Create Blob (nodes/pdf-parser/1.0.0/main.ts) failed: content too large"
        );
        assert!(
            !host
                .calls()
                .iter()
                .any(|call| matches!(call, HostCall::CreateTree { .. }))
        );
    }

    #[test]
    fn failed_base_ref_leaves_no_branch() {
        let host = RecordingHost::new().fail_on("branch_head", 1, "Not Found");
        let err = publish_with_salt(&host, &change_set(), &options(), "1").expect_err("fails");
        assert_eq!(err.phase, Phase::ReadBaseRef);
        assert_eq!(err.branch, None);
        assert_eq!(err.to_string(), "Get Base Ref (main) failed: Not Found");
        assert_eq!(host.calls().len(), 2);
    }
}
