//! Repository layout definitions: artifact kinds, file roles, and the
//! required-role set for each kind.
//!
//! | Kind | Directory | Required files |
//! |------|-----------|----------------|
//! | node | `nodes/<id>/<version>/` | `main.ts inputs.json output.json meta.json schema.json` |
//! | workflow | `workflows/<id>/` | `nodes.json triggers.json inputs.json output.json meta.json schema.json` |
//! | embedded node | `workflows/<wf>/nodes/<id>/` | `main.ts inputs.json output.json config.json` |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level directory holding global library nodes.
pub const NODES_DIR: &str = "nodes";
/// Top-level directory holding workflows.
pub const WORKFLOWS_DIR: &str = "workflows";
/// Sub-directory of a workflow holding its embedded nodes.
pub const EMBEDDED_NODES_DIR: &str = "nodes";
/// Directory holding one `<id>.txt` label file per identifier.
pub const ID_MAPPING_DIR: &str = "flow-id-to-label";
/// Repository-root dependency manifest.
pub const MANIFEST_PATH: &str = "package.json";

/// Kind of managed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Node,
    Workflow,
    EmbeddedNode,
}

impl ArtifactKind {
    /// File roles that must all be present whenever an artifact of this kind is written.
    pub fn required_roles(self) -> &'static [FileRole] {
        match self {
            ArtifactKind::Node => &[
                FileRole::Main,
                FileRole::InputsSchema,
                FileRole::OutputsSchema,
                FileRole::Meta,
                FileRole::FullSchema,
            ],
            ArtifactKind::Workflow => &[
                FileRole::Graph,
                FileRole::Triggers,
                FileRole::InputsSchema,
                FileRole::OutputsSchema,
                FileRole::Meta,
                FileRole::FullSchema,
            ],
            ArtifactKind::EmbeddedNode => &[
                FileRole::Main,
                FileRole::InputsSchema,
                FileRole::OutputsSchema,
                FileRole::Config,
            ],
        }
    }

    /// Resolve a file name to its role within this kind's layout.
    pub fn role_for_file(self, file_name: &str) -> Option<FileRole> {
        self.required_roles()
            .iter()
            .copied()
            .find(|role| role.file_name() == file_name)
    }

    /// Whether artifacts of this kind carry a version directory.
    pub fn is_versioned(self) -> bool {
        matches!(self, ArtifactKind::Node)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Node => "node",
            ArtifactKind::Workflow => "workflow",
            ArtifactKind::EmbeddedNode => "embedded-node",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a file plays inside an artifact directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileRole {
    /// Executable logic (`main.ts`).
    Main,
    /// Declared inputs (`inputs.json`).
    InputsSchema,
    /// Declared outputs (`output.json`).
    OutputsSchema,
    /// Display metadata (`meta.json`).
    Meta,
    /// Combined schema (`schema.json`).
    FullSchema,
    /// Embedded node configuration (`config.json`).
    Config,
    /// Workflow step graph (`nodes.json`).
    Graph,
    /// Workflow triggers (`triggers.json`).
    Triggers,
}

impl FileRole {
    pub fn file_name(self) -> &'static str {
        match self {
            FileRole::Main => "main.ts",
            FileRole::InputsSchema => "inputs.json",
            FileRole::OutputsSchema => "output.json",
            FileRole::Meta => "meta.json",
            FileRole::FullSchema => "schema.json",
            FileRole::Config => "config.json",
            FileRole::Graph => "nodes.json",
            FileRole::Triggers => "triggers.json",
        }
    }

    /// Whether the file content must be well-formed JSON.
    pub fn is_json(self) -> bool {
        !matches!(self, FileRole::Main)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileRole::Main => "main",
            FileRole::InputsSchema => "inputsSchema",
            FileRole::OutputsSchema => "outputsSchema",
            FileRole::Meta => "meta",
            FileRole::FullSchema => "fullSchema",
            FileRole::Config => "config",
            FileRole::Graph => "graph",
            FileRole::Triggers => "triggers",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory of an artifact, without trailing slash.
///
/// `version` is only used for nodes; `workflow` only for embedded nodes.
pub fn artifact_dir(
    kind: ArtifactKind,
    identifier: &str,
    version: Option<&str>,
    workflow: Option<&str>,
) -> String {
    match kind {
        ArtifactKind::Node => format!(
            "{NODES_DIR}/{identifier}/{}",
            version.unwrap_or("<version>")
        ),
        ArtifactKind::Workflow => format!("{WORKFLOWS_DIR}/{identifier}"),
        ArtifactKind::EmbeddedNode => format!(
            "{WORKFLOWS_DIR}/{}/{EMBEDDED_NODES_DIR}/{identifier}",
            workflow.unwrap_or("<workflow>")
        ),
    }
}

/// Repository path of the label file for `identifier`.
pub fn label_path(identifier: &str) -> String {
    format!("{ID_MAPPING_DIR}/{identifier}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_requires_five_roles() {
        let files: Vec<&str> = ArtifactKind::Node
            .required_roles()
            .iter()
            .map(|role| role.file_name())
            .collect();
        assert_eq!(
            files,
            vec![
                "main.ts",
                "inputs.json",
                "output.json",
                "meta.json",
                "schema.json"
            ]
        );
    }

    #[test]
    fn role_lookup_is_kind_specific() {
        assert_eq!(
            ArtifactKind::Workflow.role_for_file("nodes.json"),
            Some(FileRole::Graph)
        );
        assert_eq!(ArtifactKind::Node.role_for_file("nodes.json"), None);
        assert_eq!(
            ArtifactKind::EmbeddedNode.role_for_file("config.json"),
            Some(FileRole::Config)
        );
        assert_eq!(ArtifactKind::EmbeddedNode.role_for_file("meta.json"), None);
    }

    #[test]
    fn artifact_dirs_follow_layout() {
        assert_eq!(
            artifact_dir(ArtifactKind::Node, "pdf-parser", Some("1.0.1"), None),
            "nodes/pdf-parser/1.0.1"
        );
        assert_eq!(
            artifact_dir(ArtifactKind::Workflow, "onboarding", None, None),
            "workflows/onboarding"
        );
        assert_eq!(
            artifact_dir(
                ArtifactKind::EmbeddedNode,
                "send-mail",
                None,
                Some("onboarding")
            ),
            "workflows/onboarding/nodes/send-mail"
        );
        assert_eq!(label_path("pdf-parser"), "flow-id-to-label/pdf-parser.txt");
    }
}
