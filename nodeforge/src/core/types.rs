//! Shared deterministic types for the generation pipeline.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::core::schema::{ArtifactKind, NODES_DIR, WORKFLOWS_DIR, artifact_dir};

/// Coarse classification of a generated file, derived from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    Node,
    Workflow,
    Config,
}

impl FileClass {
    /// Classify by leading directory. Never taken from the generator.
    pub fn from_path(path: &str) -> Self {
        match path.split('/').next() {
            Some(WORKFLOWS_DIR) => FileClass::Workflow,
            Some(NODES_DIR) => FileClass::Node,
            _ => FileClass::Config,
        }
    }
}

/// A `{path, content}` pair exactly as returned by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFile {
    pub path: String,
    pub content: String,
}

/// Structured generator output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorResponse {
    pub files: Vec<RawFile>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// A file accepted by the validator. Its class is always derived from the
/// path, so it is never read back from serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    #[serde(rename = "type")]
    pub class: FileClass,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let class = FileClass::from_path(&path);
        Self {
            path,
            content: content.into(),
            class,
        }
    }
}

/// Reconciler decision for one artifact the request creates or touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledArtifact {
    pub kind: ArtifactKind,
    pub identifier: String,
    pub is_new: bool,
    /// Version the generated files must use (nodes only).
    pub resolved_version: Option<Version>,
    /// Last-known version in the repository (node updates only).
    pub previous_version: Option<Version>,
    /// Human-readable label, when known.
    pub label: Option<String>,
}

impl ReconciledArtifact {
    /// Directory the generated files for this artifact must live in.
    pub fn target_dir(&self) -> String {
        let version = self.resolved_version.as_ref().map(Version::to_string);
        artifact_dir(self.kind, &self.identifier, version.as_deref(), None)
    }

    /// Directory the artifact's current files live in, for updates.
    pub fn previous_dir(&self) -> Option<String> {
        if self.is_new {
            return None;
        }
        let version = self.previous_version.as_ref().map(Version::to_string);
        if self.kind.is_versioned() && version.is_none() {
            return None;
        }
        Some(artifact_dir(
            self.kind,
            &self.identifier,
            version.as_deref(),
            None,
        ))
    }
}

/// Validated, immutable set of files ready for publishing. Only the validator
/// builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub title: String,
    pub summary: String,
    /// Files ordered by path.
    pub files: Vec<GeneratedFile>,
    pub artifacts: Vec<ReconciledArtifact>,
}

/// Handle to an opened pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
}

/// Current repository content of files belonging to existing artifacts,
/// keyed by repository path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorSnapshot {
    files: BTreeMap<String, String>,
}

impl PriorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// True if any file is recorded under `dir/`.
    pub fn has_dir(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(path, _)| path.starts_with(&prefix))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
