//! Caller context assembled from the target repository.
//!
//! The reconciler and validator never read the repository themselves. This
//! module lists the repository through a [`RepoReader`] and hands them plain
//! strings plus a [`PriorSnapshot`] of the artifacts being updated.

use tracing::{debug, instrument};

use crate::core::schema::{ID_MAPPING_DIR, MANIFEST_PATH, NODES_DIR, WORKFLOWS_DIR};
use crate::core::types::{PriorSnapshot, ReconciledArtifact};
use crate::core::version::highest;
use crate::io::github::{HostError, RepoReader};

/// Raw caller context, in the shapes the reconciler accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoContext {
    /// Current `package.json`.
    pub manifest: Option<String>,
    /// `id: label` lines, one per label file.
    pub id_mapping: Option<String>,
    /// `node@version` and `workflow:name` strings.
    pub existing: Vec<String>,
}

impl RepoContext {
    /// Apply command-line overrides: a supplied manifest or mapping replaces
    /// the fetched one, extra identifiers are added to the fetched ones.
    pub fn with_overrides(
        mut self,
        manifest: Option<String>,
        id_mapping: Option<String>,
        existing: Vec<String>,
    ) -> Self {
        if manifest.is_some() {
            self.manifest = manifest;
        }
        if id_mapping.is_some() {
            self.id_mapping = id_mapping;
        }
        self.existing.extend(existing);
        self
    }
}

/// List nodes (with their highest version), workflows, the manifest and the
/// label files of the repository's default branch.
#[instrument(skip_all)]
pub fn fetch_repo_context(reader: &dyn RepoReader) -> Result<RepoContext, HostError> {
    let mut existing = Vec::new();

    for node in reader.list_dir(NODES_DIR)?.into_iter().filter(|e| e.is_dir) {
        let versions = reader.list_dir(&node.path)?;
        let version = highest(
            versions
                .iter()
                .filter(|entry| entry.is_dir)
                .map(|entry| entry.name.as_str()),
        );
        existing.push(match version {
            Some(version) => format!("{}@{version}", node.name),
            None => node.name,
        });
    }
    for workflow in reader
        .list_dir(WORKFLOWS_DIR)?
        .into_iter()
        .filter(|e| e.is_dir)
    {
        existing.push(format!("workflow:{}", workflow.name));
    }

    let manifest = reader.read_file(MANIFEST_PATH)?;

    let mut lines = Vec::new();
    for entry in reader.list_dir(ID_MAPPING_DIR)? {
        let Some(identifier) = entry.name.strip_suffix(".txt") else {
            continue;
        };
        if entry.is_dir {
            continue;
        }
        let Some(content) = reader.read_file(&entry.path)? else {
            continue;
        };
        if let Some(label) = content.lines().map(str::trim).find(|line| !line.is_empty()) {
            lines.push(format!("{identifier}: {label}"));
        }
    }
    let id_mapping = (!lines.is_empty()).then(|| lines.join("\n"));

    debug!(
        existing = existing.len(),
        labels = lines.len(),
        has_manifest = manifest.is_some(),
        "repository context fetched"
    );
    Ok(RepoContext {
        manifest,
        id_mapping,
        existing,
    })
}

/// Read every file under the current directory of each updated artifact.
#[instrument(skip_all, fields(artifacts = plan.len()))]
pub fn fetch_prior_snapshot(
    reader: &dyn RepoReader,
    plan: &[ReconciledArtifact],
) -> Result<PriorSnapshot, HostError> {
    let mut prior = PriorSnapshot::new();
    for dir in plan.iter().filter_map(ReconciledArtifact::previous_dir) {
        collect_files(reader, &dir, &mut prior)?;
    }
    debug!(files = prior.len(), "prior snapshot fetched");
    Ok(prior)
}

fn collect_files(
    reader: &dyn RepoReader,
    dir: &str,
    prior: &mut PriorSnapshot,
) -> Result<(), HostError> {
    for entry in reader.list_dir(dir)? {
        if entry.is_dir {
            collect_files(reader, &entry.path, prior)?;
        } else if let Some(content) = reader.read_file(&entry.path)? {
            prior.insert(entry.path, content);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use semver::Version;

    use super::*;
    use crate::core::schema::ArtifactKind;
    use crate::io::github::LocalRepo;

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
        fs::write(full, content).expect("write");
    }

    fn sample_repo(root: &Path) {
        write(root, "nodes/pdf-parser/1.0.0/main.ts", "v1");
        write(root, "nodes/pdf-parser/1.0.10/main.ts", "v10");
        write(root, "nodes/pdf-parser/1.0.9/main.ts", "v9");
        write(root, "nodes/scratch/notes.md", "no versions");
        write(root, "workflows/onboarding/nodes.json", "[]");
        write(root, "workflows/onboarding/nodes/send-mail/main.ts", "mail");
        write(root, "flow-id-to-label/pdf-parser.txt", "\nPDF Parser\n");
        write(root, "flow-id-to-label/README.md", "ignored");
        write(root, "package.json", r#"{"dependencies": {}}"#);
    }

    #[test]
    fn context_lists_highest_versions_and_labels() {
        let temp = tempfile::tempdir().expect("tempdir");
        sample_repo(temp.path());
        let reader = LocalRepo::new(temp.path().to_path_buf());

        let context = fetch_repo_context(&reader).expect("context");
        assert_eq!(
            context.existing,
            vec![
                "pdf-parser@1.0.10".to_string(),
                "scratch".to_string(),
                "workflow:onboarding".to_string(),
            ]
        );
        assert_eq!(context.id_mapping.as_deref(), Some("pdf-parser: PDF Parser"));
        assert_eq!(
            context.manifest.as_deref(),
            Some(r#"{"dependencies": {}}"#)
        );
    }

    #[test]
    fn empty_repository_yields_empty_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let reader = LocalRepo::new(temp.path().to_path_buf());
        assert_eq!(
            fetch_repo_context(&reader).expect("context"),
            RepoContext::default()
        );
    }

    #[test]
    fn overrides_replace_and_extend() {
        let context = RepoContext {
            manifest: Some("{}".to_string()),
            id_mapping: None,
            existing: vec!["a@1.0.0".to_string()],
        }
        .with_overrides(None, Some("a: A".to_string()), vec!["b".to_string()]);
        assert_eq!(context.manifest.as_deref(), Some("{}"));
        assert_eq!(context.id_mapping.as_deref(), Some("a: A"));
        assert_eq!(context.existing, vec!["a@1.0.0", "b"]);
    }

    #[test]
    fn prior_snapshot_reads_previous_dirs_recursively() {
        let temp = tempfile::tempdir().expect("tempdir");
        sample_repo(temp.path());
        let reader = LocalRepo::new(temp.path().to_path_buf());
        let plan = vec![
            ReconciledArtifact {
                kind: ArtifactKind::Node,
                identifier: "pdf-parser".to_string(),
                is_new: false,
                resolved_version: Some(Version::new(1, 0, 11)),
                previous_version: Some(Version::new(1, 0, 10)),
                label: None,
            },
            ReconciledArtifact {
                kind: ArtifactKind::Workflow,
                identifier: "onboarding".to_string(),
                is_new: false,
                resolved_version: None,
                previous_version: None,
                label: None,
            },
            ReconciledArtifact {
                kind: ArtifactKind::Node,
                identifier: "brand-new".to_string(),
                is_new: true,
                resolved_version: Some(Version::new(1, 0, 0)),
                previous_version: None,
                label: None,
            },
        ];

        let prior = fetch_prior_snapshot(&reader, &plan).expect("prior");
        assert_eq!(prior.len(), 3);
        assert_eq!(prior.get("nodes/pdf-parser/1.0.10/main.ts"), Some("v10"));
        assert_eq!(
            prior.get("workflows/onboarding/nodes/send-mail/main.ts"),
            Some("mail")
        );
        assert!(prior.has_dir("workflows/onboarding/nodes/send-mail"));
    }
}
