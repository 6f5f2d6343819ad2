//! Remote repository access.
//!
//! [`GitHost`] covers the write sequence used by the publisher and
//! [`RepoReader`] the reads used to assemble caller context. [`GitHubClient`]
//! implements both over the GitHub REST API; [`LocalRepo`] reads a checkout on
//! disk for offline runs.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::types::PullRequest;

/// File mode for regular files in a git tree.
pub const BLOB_MODE: &str = "100644";

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    /// Accepts `owner/name` or any URL whose last two path segments are the
    /// owner and repository name. A trailing `.git` is ignored.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        let path = if let Some((_, rest)) = trimmed.split_once("://") {
            rest.split_once('/').map_or("", |(_, path)| path)
        } else if let Some((_, rest)) = trimmed.split_once('@') {
            rest.split_once(':').map_or("", |(_, path)| path)
        } else {
            trimmed
        };
        let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
        match segments.as_slice() {
            [.., owner, name] => Ok(Self {
                owner: (*owner).to_string(),
                name: (*name).to_string(),
            }),
            _ => Err(anyhow!(
                "expected owner/name or a repository URL, got `{input}`"
            )),
        }
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Failed remote call: HTTP status (when one was received) and the server's
/// message with any structured `errors` appended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub status: Option<u16>,
    pub message: String,
}

impl HostError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build from an error response body: `message`, then ` - <errors JSON>`
    /// when the server listed field errors.
    pub fn from_body(status: u16, body: Option<&Value>) -> Self {
        let message = body
            .and_then(|body| body.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}"));
        let message = match body.and_then(|body| body.get("errors")) {
            Some(errors) if !errors.is_null() => format!("{message} - {errors}"),
            _ => message,
        };
        Self::new(Some(status), message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// One blob entry of a new tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub sha: String,
}

/// Pull request to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// Write operations of the publish sequence.
pub trait GitHost {
    /// Default branch from repository metadata, if the metadata names one.
    fn default_branch(&self) -> Result<Option<String>, HostError>;
    /// Commit sha at the head of `branch`.
    fn branch_head(&self, branch: &str) -> Result<String, HostError>;
    fn create_branch(&self, branch: &str, sha: &str) -> Result<(), HostError>;
    /// Returns the blob sha.
    fn create_blob(&self, content: &str) -> Result<String, HostError>;
    /// Returns the tree sha.
    fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String, HostError>;
    /// Returns the commit sha.
    fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String, HostError>;
    /// Force `branch` to point at `sha`.
    fn update_branch(&self, branch: &str, sha: &str) -> Result<(), HostError>;
    fn create_pull_request(&self, draft: &PullRequestDraft) -> Result<PullRequest, HostError>;
}

/// Entry of a repository directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type", deserialize_with = "entry_is_dir")]
    pub is_dir: bool,
}

fn entry_is_dir<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let kind = String::deserialize(deserializer)?;
    Ok(kind == "dir")
}

/// Read access to the default branch of a repository.
pub trait RepoReader {
    /// Fails when the repository is missing or the credentials cannot read it.
    fn check_access(&self) -> Result<(), HostError>;
    /// File content, `None` when the path does not exist.
    fn read_file(&self, path: &str) -> Result<Option<String>, HostError>;
    /// Directory entries sorted by name; empty when the directory does not exist.
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, HostError>;
}

/// GitHub REST client bound to one repository.
#[derive(Clone)]
pub struct GitHubClient {
    agent: ureq::Agent,
    api_base: String,
    slug: RepoSlug,
    token: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, slug: RepoSlug, token: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("nodeforge/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            slug,
            token,
        }
    }

    pub fn slug(&self) -> &RepoSlug {
        &self.slug
    }

    fn url(&self, path: &str) -> String {
        let repo = format!(
            "{}/repos/{}/{}",
            self.api_base, self.slug.owner, self.slug.name
        );
        if path.is_empty() {
            repo
        } else {
            format!("{repo}/{}", path.trim_start_matches('/'))
        }
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &self.url(path))
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28")
    }

    fn send(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value, HostError> {
        debug!(method, path, "github request");
        let request = self.request(method, path);
        let response = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match response {
            Ok(response) => response
                .into_json::<Value>()
                .map_err(|err| HostError::new(None, format!("invalid response body: {err}"))),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_json::<Value>().ok();
                Err(HostError::from_body(code, body.as_ref()))
            }
            Err(err) => Err(HostError::new(None, err.to_string())),
        }
    }
}

fn string_field(value: &Value, pointer: &str) -> Result<String, HostError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HostError::new(None, format!("response is missing `{pointer}`")))
}

/// Decode a contents-API payload (base64 with embedded line breaks).
pub fn decode_content(encoded: &str) -> Result<String, HostError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|err| HostError::new(None, format!("invalid base64 content: {err}")))?;
    String::from_utf8(bytes).map_err(|err| HostError::new(None, format!("content is not UTF-8: {err}")))
}

impl GitHost for GitHubClient {
    #[instrument(skip_all)]
    fn default_branch(&self) -> Result<Option<String>, HostError> {
        let repo = self.send("GET", "", None)?;
        Ok(repo
            .get("default_branch")
            .and_then(Value::as_str)
            .filter(|branch| !branch.is_empty())
            .map(str::to_string))
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn branch_head(&self, branch: &str) -> Result<String, HostError> {
        let reference = self.send("GET", &format!("git/ref/heads/{branch}"), None)?;
        string_field(&reference, "/object/sha")
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn create_branch(&self, branch: &str, sha: &str) -> Result<(), HostError> {
        self.send(
            "POST",
            "git/refs",
            Some(json!({ "ref": format!("refs/heads/{branch}"), "sha": sha })),
        )?;
        Ok(())
    }

    #[instrument(skip_all, fields(bytes = content.len()))]
    fn create_blob(&self, content: &str) -> Result<String, HostError> {
        let blob = self.send(
            "POST",
            "git/blobs",
            Some(json!({ "content": content, "encoding": "utf-8" })),
        )?;
        string_field(&blob, "/sha")
    }

    #[instrument(skip_all, fields(entries = entries.len()))]
    fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String, HostError> {
        let tree: Vec<Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "mode": BLOB_MODE,
                    "type": "blob",
                    "sha": entry.sha,
                })
            })
            .collect();
        let created = self.send(
            "POST",
            "git/trees",
            Some(json!({ "base_tree": base_tree, "tree": tree })),
        )?;
        string_field(&created, "/sha")
    }

    #[instrument(skip_all)]
    fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String, HostError> {
        let commit = self.send(
            "POST",
            "git/commits",
            Some(json!({ "message": message, "tree": tree, "parents": [parent] })),
        )?;
        string_field(&commit, "/sha")
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn update_branch(&self, branch: &str, sha: &str) -> Result<(), HostError> {
        self.send(
            "PATCH",
            &format!("git/refs/heads/{branch}"),
            Some(json!({ "sha": sha, "force": true })),
        )?;
        Ok(())
    }

    #[instrument(skip_all, fields(head = %draft.head, base = %draft.base))]
    fn create_pull_request(&self, draft: &PullRequestDraft) -> Result<PullRequest, HostError> {
        let pull = self.send(
            "POST",
            "pulls",
            Some(json!({
                "title": draft.title,
                "body": draft.body,
                "head": draft.head,
                "base": draft.base,
            })),
        )?;
        let number = pull
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| HostError::new(None, "response is missing `/number`"))?;
        Ok(PullRequest {
            url: string_field(&pull, "/html_url")?,
            number,
        })
    }
}

impl RepoReader for GitHubClient {
    #[instrument(skip_all, fields(repo = %self.slug))]
    fn check_access(&self) -> Result<(), HostError> {
        self.send("GET", "", None).map(|_| ())
    }

    #[instrument(skip_all, fields(path = %path))]
    fn read_file(&self, path: &str) -> Result<Option<String>, HostError> {
        let file = match self.send("GET", &format!("contents/{path}"), None) {
            Ok(file) => file,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        match file.get("content").and_then(Value::as_str) {
            Some(encoded) => decode_content(encoded).map(Some),
            // Directories answer with an array.
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(path = %path))]
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, HostError> {
        let listing = match self.send("GET", &format!("contents/{path}"), None) {
            Ok(listing) => listing,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        if !listing.is_array() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<DirEntry> = serde_json::from_value(listing)
            .map_err(|err| HostError::new(None, format!("invalid directory listing: {err}")))?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// Reader over a local checkout of the target repository.
pub struct LocalRepo {
    root: PathBuf,
}

impl LocalRepo {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn io_error(path: &str, err: &std::io::Error) -> HostError {
    HostError::new(None, format!("{path}: {err}"))
}

impl RepoReader for LocalRepo {
    fn check_access(&self) -> Result<(), HostError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(HostError::new(
                None,
                format!("{} is not a directory", self.root.display()),
            ))
        }
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, HostError> {
        match fs::read_to_string(self.root.join(path)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                Ok(None)
            }
            Err(err) => Err(io_error(path, &err)),
        }
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, HostError> {
        let dir = self.root.join(path);
        let read = match fs::read_dir(&dir) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(path, &err)),
        };
        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|err| io_error(path, &err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry
                .file_type()
                .map_err(|err| io_error(path, &err))?
                .is_dir();
            let entry_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{}/{name}", path.trim_end_matches('/'))
            };
            entries.push(DirEntry {
                name,
                path: entry_path,
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
