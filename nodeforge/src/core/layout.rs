//! Classification of repository-relative paths against the sanctioned layouts.

use std::fmt;

use crate::core::schema::{
    ArtifactKind, EMBEDDED_NODES_DIR, FileRole, ID_MAPPING_DIR, MANIFEST_PATH, NODES_DIR,
    WORKFLOWS_DIR, artifact_dir,
};

/// A recognized repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoPath {
    /// A required-role file of a node, workflow, or embedded node.
    Artifact(ArtifactPath),
    /// `flow-id-to-label/<identifier>.txt`.
    Label { identifier: String },
    /// `package.json`.
    Manifest,
}

/// Artifact file location parsed from a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath {
    pub key: ArtifactKey,
    pub role: FileRole,
}

/// Identity of one artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub identifier: String,
    /// Version segment as written (nodes only).
    pub version: Option<String>,
    /// Owning workflow (embedded nodes only).
    pub workflow: Option<String>,
}

impl ArtifactKey {
    pub fn dir(&self) -> String {
        artifact_dir(
            self.kind,
            &self.identifier,
            self.version.as_deref(),
            self.workflow.as_deref(),
        )
    }

    pub fn role_path(&self, role: FileRole) -> String {
        format!("{}/{}", self.dir(), role.file_name())
    }
}

/// Why a path is not conformant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Absolute, empty-segment, backslash, or dot-segment paths.
    Unsafe(&'static str),
    /// Not one of the sanctioned shapes.
    Unrecognized,
    /// Right directory shape, but the file is not a role of that kind.
    UnknownRole { kind: ArtifactKind, file: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Unsafe(reason) => write!(f, "unsafe path: {reason}"),
            PathError::Unrecognized => f.write_str(
                "path matches none of nodes/<id>/<version>/, workflows/<id>/, \
                 workflows/<id>/nodes/<id>/, flow-id-to-label/<id>.txt, package.json",
            ),
            PathError::UnknownRole { kind, file } => {
                write!(f, "'{file}' is not a required file of a {kind}")
            }
        }
    }
}

/// Parse a repository-relative path into its layout position.
pub fn parse_repo_path(path: &str) -> Result<RepoPath, PathError> {
    check_safe(path)?;
    let segments: Vec<&str> = path.split('/').collect();

    match segments.as_slice() {
        [file] if *file == MANIFEST_PATH => Ok(RepoPath::Manifest),
        [dir, file] if *dir == ID_MAPPING_DIR => match file.strip_suffix(".txt") {
            Some(identifier) if !identifier.is_empty() => Ok(RepoPath::Label {
                identifier: identifier.to_string(),
            }),
            _ => Err(PathError::Unrecognized),
        },
        [dir, id, version, file] if *dir == NODES_DIR => artifact(
            ArtifactKind::Node,
            id,
            Some(*version),
            None,
            file,
        ),
        [dir, id, file] if *dir == WORKFLOWS_DIR => {
            artifact(ArtifactKind::Workflow, id, None, None, file)
        }
        [dir, workflow, sub, id, file] if *dir == WORKFLOWS_DIR && *sub == EMBEDDED_NODES_DIR => {
            artifact(ArtifactKind::EmbeddedNode, id, None, Some(*workflow), file)
        }
        _ => Err(PathError::Unrecognized),
    }
}

fn artifact(
    kind: ArtifactKind,
    identifier: &str,
    version: Option<&str>,
    workflow: Option<&str>,
    file: &str,
) -> Result<RepoPath, PathError> {
    let role = kind
        .role_for_file(file)
        .ok_or_else(|| PathError::UnknownRole {
            kind,
            file: file.to_string(),
        })?;
    Ok(RepoPath::Artifact(ArtifactPath {
        key: ArtifactKey {
            kind,
            identifier: identifier.to_string(),
            version: version.map(str::to_string),
            workflow: workflow.map(str::to_string),
        },
        role,
    }))
}

fn check_safe(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Unsafe("empty path"));
    }
    if path.starts_with('/') {
        return Err(PathError::Unsafe("absolute path"));
    }
    if path.contains('\\') {
        return Err(PathError::Unsafe("backslash separator"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(PathError::Unsafe("empty segment")),
            "." | ".." => return Err(PathError::Unsafe("dot segment")),
            _ if segment.trim() != segment => {
                return Err(PathError::Unsafe("segment with surrounding whitespace"));
            }
            _ => {}
        }
    }
    Ok(())
}
