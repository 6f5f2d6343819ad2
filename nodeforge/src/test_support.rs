//! Test doubles and fixture builders.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! integration tests under `tests/`.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use crate::core::request::GenerationRequest;
use crate::core::schema::{ArtifactKind, FileRole, artifact_dir, label_path};
use crate::core::types::{GeneratorResponse, PullRequest, RawFile};
use crate::io::generator::{GenerationError, Generator};
use crate::io::github::{DirEntry, GitHost, HostError, PullRequestDraft, RepoReader, TreeEntry};

/// Generator that replays queued results and records every request it saw.
pub struct ScriptedGenerator {
    queue: RefCell<VecDeque<Result<GeneratorResponse, GenerationError>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<GeneratorResponse, GenerationError>>) -> Self {
        Self {
            queue: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratorResponse, GenerationError> {
        self.requests.borrow_mut().push(request.clone());
        self.queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Transport("script exhausted".to_string())))
    }
}

/// One call received by [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    DefaultBranch,
    BranchHead(String),
    CreateBranch { branch: String, sha: String },
    CreateBlob(String),
    CreateTree { base_tree: String, entries: Vec<TreeEntry> },
    CreateCommit { message: String, tree: String, parent: String },
    UpdateBranch { branch: String, sha: String },
    CreatePullRequest(PullRequestDraft),
}

impl HostCall {
    fn kind(&self) -> &'static str {
        match self {
            HostCall::DefaultBranch => "default_branch",
            HostCall::BranchHead(_) => "branch_head",
            HostCall::CreateBranch { .. } => "create_branch",
            HostCall::CreateBlob(_) => "create_blob",
            HostCall::CreateTree { .. } => "create_tree",
            HostCall::CreateCommit { .. } => "create_commit",
            HostCall::UpdateBranch { .. } => "update_branch",
            HostCall::CreatePullRequest(_) => "create_pull_request",
        }
    }
}

/// In-memory git host. Answers with deterministic shas (`base-sha`,
/// `blob-N`, `tree-sha`, `commit-sha`) and can fail the n-th call of one kind.
#[derive(Default)]
pub struct RecordingHost {
    default_branch: Option<String>,
    failure: Option<(&'static str, usize, String)>,
    calls: RefCell<Vec<HostCall>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_branch(mut self, branch: &str) -> Self {
        self.default_branch = Some(branch.to_string());
        self
    }

    /// Fail the `nth` (1-based) call of `kind` (a [`GitHost`] method name).
    pub fn fail_on(mut self, kind: &'static str, nth: usize, message: &str) -> Self {
        self.failure = Some((kind, nth, message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: HostCall) -> Result<usize, HostError> {
        let kind = call.kind();
        let mut calls = self.calls.borrow_mut();
        calls.push(call);
        let seen = calls.iter().filter(|call| call.kind() == kind).count();
        match &self.failure {
            Some((failing, nth, message)) if *failing == kind && *nth == seen => {
                Err(HostError::new(Some(422), message.clone()))
            }
            _ => Ok(seen),
        }
    }
}

impl GitHost for RecordingHost {
    fn default_branch(&self) -> Result<Option<String>, HostError> {
        self.record(HostCall::DefaultBranch)?;
        Ok(self.default_branch.clone())
    }

    fn branch_head(&self, branch: &str) -> Result<String, HostError> {
        self.record(HostCall::BranchHead(branch.to_string()))?;
        Ok("base-sha".to_string())
    }

    fn create_branch(&self, branch: &str, sha: &str) -> Result<(), HostError> {
        self.record(HostCall::CreateBranch {
            branch: branch.to_string(),
            sha: sha.to_string(),
        })?;
        Ok(())
    }

    fn create_blob(&self, content: &str) -> Result<String, HostError> {
        let seen = self.record(HostCall::CreateBlob(content.to_string()))?;
        Ok(format!("blob-{seen}"))
    }

    fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String, HostError> {
        self.record(HostCall::CreateTree {
            base_tree: base_tree.to_string(),
            entries: entries.to_vec(),
        })?;
        Ok("tree-sha".to_string())
    }

    fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String, HostError> {
        self.record(HostCall::CreateCommit {
            message: message.to_string(),
            tree: tree.to_string(),
            parent: parent.to_string(),
        })?;
        Ok("commit-sha".to_string())
    }

    fn update_branch(&self, branch: &str, sha: &str) -> Result<(), HostError> {
        self.record(HostCall::UpdateBranch {
            branch: branch.to_string(),
            sha: sha.to_string(),
        })?;
        Ok(())
    }

    fn create_pull_request(&self, draft: &PullRequestDraft) -> Result<PullRequest, HostError> {
        let seen = self.record(HostCall::CreatePullRequest(draft.clone()))?;
        Ok(PullRequest {
            url: format!("https://github.test/acme/flows/pull/{seen}"),
            number: seen as u64,
        })
    }
}

/// Repository held in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
    files: BTreeMap<String, String>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_files(mut self, files: &[RawFile]) -> Self {
        for file in files {
            self.files.insert(file.path.clone(), file.content.clone());
        }
        self
    }
}

impl RepoReader for MemoryRepo {
    fn check_access(&self) -> Result<(), HostError> {
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, HostError> {
        Ok(self.files.get(path).cloned())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, HostError> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        for key in self.files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => children.insert(dir.to_string(), true),
                None => children.insert(rest.to_string(), false),
            };
        }
        Ok(children
            .into_iter()
            .map(|(name, is_dir)| DirEntry {
                path: format!("{prefix}{name}"),
                name,
                is_dir,
            })
            .collect())
    }
}

/// `main.ts` whose default export takes `{ url: string }`.
pub const NODE_MAIN: &str = "import axios from 'axios';\n\nexport default async function run(input: { url: string }): Promise<{ text: string }> {\n  const res = await axios.get(input.url);\n  return { text: String(res.data) };\n}\n";
pub const NODE_INPUTS: &str =
    r#"{"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}"#;
pub const NODE_OUTPUTS: &str =
    r#"{"type": "object", "properties": {"text": {"type": "string"}}}"#;
pub const MANIFEST: &str = r#"{"name": "flows", "dependencies": {"axios": "^1.6.0"}}"#;

fn role_content(kind: ArtifactKind, role: FileRole, identifier: &str) -> String {
    match role {
        FileRole::Main => NODE_MAIN.to_string(),
        FileRole::InputsSchema => NODE_INPUTS.to_string(),
        FileRole::OutputsSchema => NODE_OUTPUTS.to_string(),
        FileRole::Meta => format!(r#"{{"name": "{identifier}", "kind": "{kind}"}}"#),
        FileRole::FullSchema => {
            format!(r#"{{"inputs": {NODE_INPUTS}, "outputs": {NODE_OUTPUTS}}}"#)
        }
        FileRole::Config => r#"{"retries": 1}"#.to_string(),
        FileRole::Graph => r#"{"nodes": [{"id": "fetch", "nodeId": "pdf-parser@1.0.0"}]}"#.to_string(),
        FileRole::Triggers => r#"[{"id": "inbound", "type": "http"}]"#.to_string(),
    }
}

fn artifact_files(kind: ArtifactKind, dir: &str, identifier: &str) -> Vec<RawFile> {
    kind.required_roles()
        .iter()
        .map(|role| RawFile {
            path: format!("{dir}/{}", role.file_name()),
            content: role_content(kind, *role, identifier),
        })
        .collect()
}

/// Complete, valid file set of a library node.
pub fn node_files(identifier: &str, version: &str) -> Vec<RawFile> {
    let dir = artifact_dir(ArtifactKind::Node, identifier, Some(version), None);
    artifact_files(ArtifactKind::Node, &dir, identifier)
}

/// Complete, valid file set of a workflow.
pub fn workflow_files(identifier: &str) -> Vec<RawFile> {
    let dir = artifact_dir(ArtifactKind::Workflow, identifier, None, None);
    artifact_files(ArtifactKind::Workflow, &dir, identifier)
}

/// Complete, valid file set of a node embedded in `workflow`.
pub fn embedded_node_files(workflow: &str, identifier: &str) -> Vec<RawFile> {
    let dir = artifact_dir(ArtifactKind::EmbeddedNode, identifier, None, Some(workflow));
    artifact_files(ArtifactKind::EmbeddedNode, &dir, identifier)
}

pub fn label_file(identifier: &str, label: &str) -> RawFile {
    RawFile {
        path: label_path(identifier),
        content: format!("{label}\n"),
    }
}

pub fn response(files: Vec<RawFile>, summary: &str) -> GeneratorResponse {
    GeneratorResponse {
        files,
        summary: Some(summary.to_string()),
    }
}

/// Replace the content of `path` in `files`.
pub fn replace_content(files: &mut [RawFile], path: &str, content: &str) {
    if let Some(file) = files.iter_mut().find(|file| file.path == path) {
        file.content = content.to_string();
    }
}
