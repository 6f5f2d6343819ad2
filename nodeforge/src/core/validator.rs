//! Post-generation gate.
//!
//! Four checks run in order; the first one that finds anything stops
//! validation and reports every violation it found. A response that passes all
//! four becomes the [`ChangeSet`] handed to the publisher. Validation is pure:
//! the same response and context always produce the same verdict.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::compat::{check_manifest, check_role};
use crate::core::identifier::{IdPolicy, conforms};
use crate::core::layout::{ArtifactKey, PathError, RepoPath, parse_repo_path};
use crate::core::manifest::{Manifest, imported_packages, parse_manifest};
use crate::core::policy::{Check, Rule, Subject, policy_for};
use crate::core::reconcile::{ExistingArtifactIndex, IdMapping};
use crate::core::schema::{ArtifactKind, FileRole, MANIFEST_PATH, artifact_dir, label_path};
use crate::core::types::{
    ChangeSet, GeneratedFile, GeneratorResponse, PriorSnapshot, RawFile, ReconciledArtifact,
};
use crate::core::version::INITIAL_VERSION;

/// Summary used when the generator supplies none.
pub const DEFAULT_SUMMARY: &str = "Automated update";

/// One rule broken by one file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Violation {
    pub rule: Rule,
    pub path: String,
    pub detail: String,
}

/// The first failing check and everything it found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{check} check failed with {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub check: Check,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Human-readable multi-line report.
    pub fn report(&self) -> String {
        let mut out = format!("{self}\n");
        for violation in &self.violations {
            out.push_str(&format!(
                "  [{}] {}: {}\n",
                violation.rule, violation.path, violation.detail
            ));
        }
        out
    }
}

/// Caller context the response is judged against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub plan: &'a [ReconciledArtifact],
    pub policy: IdPolicy,
    pub index: &'a ExistingArtifactIndex,
    pub mapping: &'a IdMapping,
    /// Current `package.json`, if the repository has one.
    pub manifest: Option<&'a str>,
    /// Current content of files belonging to updated artifacts.
    pub prior: &'a PriorSnapshot,
    /// Prefix for the change-set title (`<prefix>: <summary line>`).
    pub title_prefix: &'a str,
}

/// Validate a generator response and build the change set.
pub fn validate(
    response: &GeneratorResponse,
    ctx: &ValidationContext<'_>,
) -> Result<ChangeSet, ValidationError> {
    let files = Files::parse(&response.files);

    for check in Check::ORDER {
        let mut violations = match check {
            Check::Completeness => completeness(&files, ctx),
            Check::Placement => placement(&files, ctx),
            Check::Auxiliary => auxiliary(&files, ctx),
            Check::MutationSafety => mutation_safety(&files, ctx),
        };
        if !violations.is_empty() {
            violations.sort();
            violations.dedup();
            return Err(ValidationError { check, violations });
        }
    }

    Ok(change_set(response, ctx))
}

fn violation(rule: Rule, path: impl Into<String>, detail: impl Into<String>) -> Violation {
    Violation {
        rule,
        path: path.into(),
        detail: detail.into(),
    }
}

struct Entry<'a> {
    file: &'a RawFile,
    parsed: Result<RepoPath, PathError>,
}

/// Response files with their layout positions.
struct Files<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> Files<'a> {
    fn parse(raw: &'a [RawFile]) -> Self {
        Self {
            entries: raw
                .iter()
                .map(|file| Entry {
                    file,
                    parsed: parse_repo_path(&file.path),
                })
                .collect(),
        }
    }

    fn artifacts(&self) -> impl Iterator<Item = (&'a RawFile, &ArtifactKey, FileRole)> + '_ {
        self.entries.iter().filter_map(|entry| match &entry.parsed {
            Ok(RepoPath::Artifact(artifact)) => Some((entry.file, &artifact.key, artifact.role)),
            _ => None,
        })
    }

    fn keys(&self) -> BTreeSet<&ArtifactKey> {
        self.artifacts().map(|(_, key, _)| key).collect()
    }

    fn labels(&self) -> impl Iterator<Item = (&'a RawFile, &str)> + '_ {
        self.entries.iter().filter_map(|entry| match &entry.parsed {
            Ok(RepoPath::Label { identifier }) => Some((entry.file, identifier.as_str())),
            _ => None,
        })
    }

    fn label_for(&self, identifier: &str) -> Option<&'a RawFile> {
        self.labels()
            .find(|(_, labelled)| *labelled == identifier)
            .map(|(file, _)| file)
    }

    fn manifest(&self) -> Option<&'a RawFile> {
        self.entries
            .iter()
            .find(|entry| matches!(entry.parsed, Ok(RepoPath::Manifest)))
            .map(|entry| entry.file)
    }
}

fn planned<'p>(
    ctx: &ValidationContext<'p>,
    kind: ArtifactKind,
    identifier: &str,
) -> Option<&'p ReconciledArtifact> {
    ctx.plan
        .iter()
        .find(|artifact| artifact.kind == kind && artifact.identifier == identifier)
}

fn planned_key(artifact: &ReconciledArtifact) -> ArtifactKey {
    ArtifactKey {
        kind: artifact.kind,
        identifier: artifact.identifier.clone(),
        version: artifact.resolved_version.as_ref().map(ToString::to_string),
        workflow: None,
    }
}

// ---------------------------------------------------------------------------
// 1. completeness

fn completeness(files: &Files<'_>, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut present: BTreeMap<ArtifactKey, BTreeSet<FileRole>> = BTreeMap::new();
    for (_, key, role) in files.artifacts() {
        present.entry(key.clone()).or_default().insert(role);
    }
    for artifact in ctx.plan {
        present.entry(planned_key(artifact)).or_default();
    }

    let mut violations = Vec::new();
    for (key, roles) in &present {
        for role in key.kind.required_roles() {
            if !roles.contains(role) {
                violations.push(violation(
                    Rule::MissingRequiredFile,
                    key.role_path(*role),
                    format!(
                        "{} '{}' is missing its {} file ({})",
                        key.kind,
                        key.identifier,
                        role,
                        role.file_name()
                    ),
                ));
            }
        }
    }
    violations
}

// ---------------------------------------------------------------------------
// 2. placement

fn placement(files: &Files<'_>, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut seen = BTreeSet::new();
    for entry in &files.entries {
        if !seen.insert(entry.file.path.as_str()) {
            violations.push(violation(
                Rule::DuplicatePath,
                &entry.file.path,
                "path appears more than once in the response",
            ));
        }
    }

    let keys = files.keys();
    let workflows_in_set: BTreeSet<&str> = keys
        .iter()
        .filter(|key| key.kind == ArtifactKind::Workflow)
        .map(|key| key.identifier.as_str())
        .collect();
    let known_ids: BTreeSet<&str> = keys
        .iter()
        .map(|key| key.identifier.as_str())
        .chain(ctx.plan.iter().map(|artifact| artifact.identifier.as_str()))
        .collect();

    for entry in &files.entries {
        let path = entry.file.path.as_str();
        match &entry.parsed {
            Err(PathError::Unsafe(reason)) => {
                violations.push(violation(Rule::UnsafePath, path, *reason));
            }
            Err(err @ PathError::Unrecognized) => {
                violations.push(violation(Rule::UnrecognizedPath, path, err.to_string()));
            }
            Err(err @ PathError::UnknownRole { .. }) => {
                violations.push(violation(Rule::UnknownFileRole, path, err.to_string()));
            }
            Ok(RepoPath::Label { identifier }) => {
                if !known_ids.contains(identifier.as_str()) {
                    violations.push(violation(
                        Rule::StrayLabel,
                        path,
                        format!("label for '{identifier}', which this change does not touch"),
                    ));
                }
            }
            Ok(RepoPath::Manifest) => {
                if let Err(err) = parse_manifest(&entry.file.content) {
                    violations.push(violation(
                        Rule::MalformedJson,
                        path,
                        format!("not a package manifest: {err}"),
                    ));
                }
            }
            Ok(RepoPath::Artifact(artifact)) => {
                if artifact.role.is_json()
                    && let Err(err) =
                        serde_json::from_str::<serde_json::Value>(&entry.file.content)
                {
                    violations.push(violation(Rule::MalformedJson, path, err.to_string()));
                }
            }
        }
    }

    for key in &keys {
        violations.extend(place_artifact(key, &workflows_in_set, ctx));
    }
    violations
}

/// Identity and version rules for one artifact directory.
fn place_artifact(
    key: &ArtifactKey,
    workflows_in_set: &BTreeSet<&str>,
    ctx: &ValidationContext<'_>,
) -> Vec<Violation> {
    let dir = key.dir();
    let mut violations = Vec::new();

    match key.kind {
        ArtifactKind::Node | ArtifactKind::Workflow => {
            if let Some(artifact) = planned(ctx, key.kind, &key.identifier) {
                let expected = artifact.resolved_version.as_ref().map(ToString::to_string);
                if key.kind.is_versioned() && key.version != expected {
                    violations.push(violation(
                        Rule::WrongVersion,
                        &dir,
                        format!(
                            "{} '{}' must be written to {}",
                            key.kind,
                            key.identifier,
                            artifact.target_dir()
                        ),
                    ));
                }
                return violations;
            }

            if let Some(existing) = ctx.index.get(key.kind, &key.identifier) {
                violations.push(violation(
                    Rule::UnplannedArtifact,
                    &dir,
                    format!("changes existing {existing}, which the request does not target"),
                ));
                return violations;
            }

            let initial = INITIAL_VERSION.to_string();
            if key.kind.is_versioned() && key.version.as_deref() != Some(initial.as_str()) {
                violations.push(violation(
                    Rule::WrongVersion,
                    &dir,
                    format!("new {} '{}' must start at {initial}", key.kind, key.identifier),
                ));
            }
        }
        ArtifactKind::EmbeddedNode => {
            let owner = key.workflow.as_deref().unwrap_or_default();
            let owner_planned = planned(ctx, ArtifactKind::Workflow, owner).is_some();
            if !owner_planned && !workflows_in_set.contains(owner) {
                violations.push(violation(
                    Rule::UnplannedArtifact,
                    &dir,
                    format!("embedded node belongs to workflow '{owner}', which this change does not write"),
                ));
                return violations;
            }
            if ctx.prior.has_dir(&dir) {
                return violations;
            }
        }
    }

    if !conforms(ctx.policy, &key.identifier) {
        violations.push(violation(
            Rule::NonConformingIdentifier,
            &dir,
            format!(
                "new identifier '{}' does not follow the {} identifier policy",
                key.identifier, ctx.policy
            ),
        ));
    }
    violations
}

// ---------------------------------------------------------------------------
// 3. auxiliary files

fn auxiliary(files: &Files<'_>, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (file, identifier) in files.labels() {
        let lines: Vec<&str> = file
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.len() != 1 {
            violations.push(violation(
                Rule::MalformedLabel,
                &file.path,
                format!(
                    "label for '{identifier}' must be a single non-empty line, found {} lines",
                    lines.len()
                ),
            ));
        }
    }

    for identifier in new_identifiers(files, ctx) {
        if ctx.mapping.contains(&identifier) || files.label_for(&identifier).is_some() {
            continue;
        }
        violations.push(violation(
            Rule::MissingLabel,
            label_path(&identifier),
            format!("new identifier '{identifier}' needs a label file"),
        ));
    }

    violations.extend(dependencies(files, ctx));
    violations
}

/// Identifiers this change introduces to the repository.
fn new_identifiers(files: &Files<'_>, ctx: &ValidationContext<'_>) -> BTreeSet<String> {
    let mut ids: BTreeSet<String> = ctx
        .plan
        .iter()
        .filter(|artifact| artifact.is_new)
        .map(|artifact| artifact.identifier.clone())
        .collect();

    for key in files.keys() {
        let is_new = match key.kind {
            ArtifactKind::Node | ArtifactKind::Workflow => {
                planned(ctx, key.kind, &key.identifier).is_none()
                    && ctx.index.get(key.kind, &key.identifier).is_none()
            }
            ArtifactKind::EmbeddedNode => !ctx.prior.has_dir(&key.dir()),
        };
        if is_new {
            ids.insert(key.identifier.clone());
        }
    }
    ids
}

fn dependencies(files: &Files<'_>, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let updated = files.manifest();
    // An emitted manifest is the authority even when it declares nothing.
    let effective: Option<Manifest> = match updated {
        Some(file) => Some(parse_manifest(&file.content).unwrap_or_default()),
        None => ctx.manifest.and_then(|raw| parse_manifest(raw).ok()),
    };
    let Some(manifest) = effective else {
        return Vec::new();
    };

    let mut violations = Vec::new();
    for (file, _, role) in files.artifacts() {
        if role != FileRole::Main {
            continue;
        }
        for package in imported_packages(&file.content) {
            if manifest.declares(&package) {
                continue;
            }
            let (rule, detail) = match updated {
                Some(_) => (
                    Rule::UndeclaredDependency,
                    format!("'{package}' is imported by {} but not declared", file.path),
                ),
                None => (
                    Rule::MissingManifest,
                    format!(
                        "'{package}' is imported by {} but not declared; include the updated {MANIFEST_PATH}",
                        file.path
                    ),
                ),
            };
            violations.push(violation(rule, MANIFEST_PATH, detail));
        }
    }
    violations
}

// ---------------------------------------------------------------------------
// 4. mutation safety

fn mutation_safety(files: &Files<'_>, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (file, key, role) in files.artifacts() {
        let Some(prior_path) = prior_path(key, role, ctx) else {
            continue;
        };
        let Some(old) = ctx.prior.get(&prior_path) else {
            continue;
        };
        let Some(policy) = policy_for(Subject::Role(role)) else {
            continue;
        };
        for breach in check_role(role, old, &file.content) {
            if policy.forbids(breach.rule) {
                violations.push(violation(breach.rule, &file.path, breach.detail));
            }
        }
    }

    if let (Some(updated), Some(current)) = (files.manifest(), ctx.manifest)
        && let Some(policy) = policy_for(Subject::Manifest)
    {
        for breach in check_manifest(current, &updated.content) {
            if policy.forbids(breach.rule) {
                violations.push(violation(breach.rule, &updated.path, breach.detail));
            }
        }
    }
    violations
}

/// Where the previous revision of a file lives.
///
/// Node updates move to a new version directory; everything else is updated
/// in place.
fn prior_path(key: &ArtifactKey, role: FileRole, ctx: &ValidationContext<'_>) -> Option<String> {
    match key.kind {
        ArtifactKind::Node => {
            let artifact = planned(ctx, ArtifactKind::Node, &key.identifier)?;
            let previous = artifact.previous_version.as_ref()?.to_string();
            Some(format!(
                "{}/{}",
                artifact_dir(key.kind, &key.identifier, Some(&previous), None),
                role.file_name()
            ))
        }
        ArtifactKind::Workflow | ArtifactKind::EmbeddedNode => Some(key.role_path(role)),
    }
}

// ---------------------------------------------------------------------------

fn change_set(response: &GeneratorResponse, ctx: &ValidationContext<'_>) -> ChangeSet {
    let summary = response
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|summary| !summary.is_empty())
        .unwrap_or(DEFAULT_SUMMARY)
        .to_string();
    let headline = summary
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(DEFAULT_SUMMARY);
    let prefix = ctx.title_prefix.trim();
    let title = if prefix.is_empty() {
        headline.to_string()
    } else {
        format!("{prefix}: {headline}")
    };

    let mut files: Vec<GeneratedFile> = response
        .files
        .iter()
        .map(|file| GeneratedFile::new(file.path.clone(), file.content.clone()))
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    ChangeSet {
        title,
        summary,
        files,
        artifacts: ctx.plan.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileClass;
    use semver::Version;

    const MAIN_V1: &str = "import axios from 'axios';\n\nexport default async function run({ url }: Inputs): Promise<Output> {\n  return { text: '' };\n}\n";
    const INPUTS_V1: &str = r#"{"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}"#;
    const OUTPUT_V1: &str = r#"{"type": "object", "properties": {"text": {"type": "string"}}}"#;
    const MANIFEST: &str = r#"{"dependencies": {"axios": "^1.6.0"}}"#;

    fn raw(path: &str, content: &str) -> RawFile {
        RawFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn node_files(dir: &str) -> Vec<RawFile> {
        vec![
            raw(&format!("{dir}/main.ts"), MAIN_V1),
            raw(&format!("{dir}/inputs.json"), INPUTS_V1),
            raw(&format!("{dir}/output.json"), OUTPUT_V1),
            raw(&format!("{dir}/meta.json"), r#"{"name": "PDF Parser"}"#),
            raw(&format!("{dir}/schema.json"), "{}"),
        ]
    }

    fn new_node_plan() -> Vec<ReconciledArtifact> {
        vec![ReconciledArtifact {
            kind: ArtifactKind::Node,
            identifier: "pdf-parser".to_string(),
            is_new: true,
            resolved_version: Some(INITIAL_VERSION),
            previous_version: None,
            label: Some("PDF Parser".to_string()),
        }]
    }

    fn update_plan() -> Vec<ReconciledArtifact> {
        vec![ReconciledArtifact {
            kind: ArtifactKind::Node,
            identifier: "pdf-parser".to_string(),
            is_new: false,
            resolved_version: Some(Version::new(1, 0, 1)),
            previous_version: Some(Version::new(1, 0, 0)),
            label: Some("PDF Parser".to_string()),
        }]
    }

    struct Fixture {
        plan: Vec<ReconciledArtifact>,
        index: ExistingArtifactIndex,
        mapping: IdMapping,
        prior: PriorSnapshot,
        manifest: Option<&'static str>,
    }

    impl Fixture {
        fn new_node() -> Self {
            Self {
                plan: new_node_plan(),
                index: ExistingArtifactIndex::default(),
                mapping: IdMapping::default(),
                prior: PriorSnapshot::new(),
                manifest: Some(MANIFEST),
            }
        }

        fn update() -> Self {
            let mut prior = PriorSnapshot::new();
            for file in node_files("nodes/pdf-parser/1.0.0") {
                prior.insert(file.path, file.content);
            }
            let mut mapping = IdMapping::default();
            mapping.insert("pdf-parser", "PDF Parser");
            Self {
                plan: update_plan(),
                index: ExistingArtifactIndex::from_identifiers(["pdf-parser@1.0.0"]),
                mapping,
                prior,
                manifest: Some(MANIFEST),
            }
        }

        fn run(&self, files: Vec<RawFile>) -> Result<ChangeSet, ValidationError> {
            let response = GeneratorResponse {
                files,
                summary: Some("Add PDF parser\n\nExtracts text from PDFs.".to_string()),
            };
            validate(
                &response,
                &ValidationContext {
                    plan: &self.plan,
                    policy: IdPolicy::Kebab,
                    index: &self.index,
                    mapping: &self.mapping,
                    manifest: self.manifest,
                    prior: &self.prior,
                    title_prefix: "nodeforge",
                },
            )
        }
    }

    fn rules(err: &ValidationError) -> Vec<Rule> {
        err.violations.iter().map(|violation| violation.rule).collect()
    }

    #[test]
    fn complete_new_node_becomes_change_set() {
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser\n"));
        let set = Fixture::new_node().run(files).expect("valid");

        assert_eq!(set.title, "nodeforge: Add PDF parser");
        assert!(set.summary.contains("Extracts text"));
        assert_eq!(set.files.len(), 6);
        assert_eq!(set.files[0].path, "flow-id-to-label/pdf-parser.txt");
        assert_eq!(set.files[0].class, FileClass::Config);
        assert!(set.files.windows(2).all(|pair| pair[0].path < pair[1].path));
        assert_eq!(set.artifacts, new_node_plan());
    }

    #[test]
    fn missing_role_fails_completeness_first() {
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files.retain(|file| !file.path.ends_with("meta.json"));
        files.push(raw("src/index.ts", "export {}"));
        let err = Fixture::new_node().run(files).expect_err("incomplete");
        assert_eq!(err.check, Check::Completeness);
        assert_eq!(rules(&err), vec![Rule::MissingRequiredFile]);
        assert_eq!(err.violations[0].path, "nodes/pdf-parser/1.0.0/meta.json");
    }

    #[test]
    fn planned_artifact_without_files_is_incomplete() {
        let err = Fixture::new_node()
            .run(vec![raw("flow-id-to-label/pdf-parser.txt", "PDF Parser")])
            .expect_err("incomplete");
        assert_eq!(err.check, Check::Completeness);
        assert_eq!(err.violations.len(), 5);
    }

    #[test]
    fn stray_and_unsafe_paths_fail_placement() {
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser"));
        files.push(raw("src/index.ts", "export {}"));
        files.push(raw("nodes/../etc/passwd", "x"));
        files.push(raw("nodes/pdf-parser/1.0.0/README.md", "# hi"));
        let err = Fixture::new_node().run(files).expect_err("misplaced");
        assert_eq!(err.check, Check::Placement);
        let got = rules(&err);
        assert!(got.contains(&Rule::UnrecognizedPath));
        assert!(got.contains(&Rule::UnsafePath));
        assert!(got.contains(&Rule::UnknownFileRole));
    }

    #[test]
    fn update_must_use_bumped_version() {
        let files = node_files("nodes/pdf-parser/1.0.0");
        let err = Fixture::update().run(files).expect_err("wrong version");
        // The planned 1.0.1 directory is empty, so completeness reports first.
        assert_eq!(err.check, Check::Completeness);

        let mut files = node_files("nodes/pdf-parser/1.0.1");
        files.extend(node_files("nodes/pdf-parser/1.0.0"));
        let err = Fixture::update().run(files).expect_err("wrong version");
        assert_eq!(err.check, Check::Placement);
        assert_eq!(rules(&err), vec![Rule::WrongVersion]);
    }

    #[test]
    fn new_node_must_start_at_initial_version() {
        let mut fixture = Fixture::new_node();
        fixture.plan.clear();
        let mut files = node_files("nodes/pdf-parser/1.2.0");
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser"));
        let err = fixture.run(files).expect_err("wrong version");
        assert_eq!(rules(&err), vec![Rule::WrongVersion]);
    }

    #[test]
    fn unplanned_existing_artifact_is_rejected() {
        let mut fixture = Fixture::new_node();
        fixture.index = ExistingArtifactIndex::from_identifiers(["mailer@1.0.0"]);
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files.extend(node_files("nodes/mailer/1.0.1"));
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser"));
        let err = fixture.run(files).expect_err("unplanned");
        assert_eq!(rules(&err), vec![Rule::UnplannedArtifact]);
        assert_eq!(err.violations[0].path, "nodes/mailer/1.0.1");
    }

    #[test]
    fn malformed_json_role_fails_placement() {
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files[1].content = "{ not json".to_string();
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser"));
        let err = Fixture::new_node().run(files).expect_err("malformed");
        assert_eq!(rules(&err), vec![Rule::MalformedJson]);
        assert_eq!(err.violations[0].path, "nodes/pdf-parser/1.0.0/inputs.json");
    }

    #[test]
    fn opaque_policy_rejects_kebab_names() {
        let fixture = Fixture {
            plan: Vec::new(),
            ..Fixture::new_node()
        };
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser"));
        let response = GeneratorResponse {
            files,
            summary: None,
        };
        let err = validate(
            &response,
            &ValidationContext {
                plan: &fixture.plan,
                policy: IdPolicy::Opaque,
                index: &fixture.index,
                mapping: &fixture.mapping,
                manifest: fixture.manifest,
                prior: &fixture.prior,
                title_prefix: "",
            },
        )
        .expect_err("non-conforming");
        assert_eq!(rules(&err), vec![Rule::NonConformingIdentifier]);
    }

    #[test]
    fn new_identifier_needs_single_line_label() {
        let files = node_files("nodes/pdf-parser/1.0.0");
        let err = Fixture::new_node().run(files).expect_err("no label");
        assert_eq!(err.check, Check::Auxiliary);
        assert_eq!(rules(&err), vec![Rule::MissingLabel]);
        assert_eq!(err.violations[0].path, "flow-id-to-label/pdf-parser.txt");

        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF\nParser"));
        let err = Fixture::new_node().run(files).expect_err("two lines");
        assert_eq!(rules(&err), vec![Rule::MalformedLabel]);
    }

    #[test]
    fn mapped_identifier_needs_no_label_file() {
        let mut fixture = Fixture::new_node();
        fixture.mapping.insert("pdf-parser", "PDF Parser");
        assert!(fixture.run(node_files("nodes/pdf-parser/1.0.0")).is_ok());
    }

    #[test]
    fn new_import_requires_manifest_update() {
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files[0].content = format!("import pdf from 'pdf-parse';\n{MAIN_V1}");
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser"));
        let err = Fixture::new_node()
            .run(files.clone())
            .expect_err("undeclared");
        assert_eq!(rules(&err), vec![Rule::MissingManifest]);

        files.push(raw(MANIFEST_PATH, r#"{"dependencies": {"axios": "^1.6.0"}}"#));
        let err = Fixture::new_node()
            .run(files.clone())
            .expect_err("still undeclared");
        assert_eq!(rules(&err), vec![Rule::UndeclaredDependency]);

        files.pop();
        files.push(raw(
            MANIFEST_PATH,
            r#"{"dependencies": {"axios": "^1.6.0", "pdf-parse": "^1.1.1"}}"#,
        ));
        assert!(Fixture::new_node().run(files).is_ok());
    }

    #[test]
    fn absent_manifest_skips_dependency_check() {
        let mut fixture = Fixture::new_node();
        fixture.manifest = None;
        let mut files = node_files("nodes/pdf-parser/1.0.0");
        files[0].content = format!("import pdf from 'pdf-parse';\n{MAIN_V1}");
        files.push(raw("flow-id-to-label/pdf-parser.txt", "PDF Parser"));
        assert!(fixture.run(files).is_ok());
    }

    #[test]
    fn compatible_update_passes() {
        let mut files = node_files("nodes/pdf-parser/1.0.1");
        files[1].content = r#"{"type": "object", "properties": {"url": {"type": "string"}, "pages": {"type": "number"}}, "required": ["url"]}"#.to_string();
        let set = Fixture::update().run(files).expect("valid");
        assert_eq!(set.artifacts[0].resolved_version, Some(Version::new(1, 0, 1)));
    }

    #[test]
    fn breaking_update_fails_mutation_safety() {
        let mut files = node_files("nodes/pdf-parser/1.0.1");
        files[0].content = MAIN_V1.replace("Promise<Output>", "Promise<string>");
        files[1].content =
            r#"{"type": "object", "properties": {"link": {"type": "string"}}}"#.to_string();
        let err = Fixture::update().run(files).expect_err("breaking");
        assert_eq!(err.check, Check::MutationSafety);
        let got = rules(&err);
        assert!(got.contains(&Rule::SignatureChanged));
        assert!(got.contains(&Rule::InputRemoved));
    }

    #[test]
    fn removing_dependency_fails_mutation_safety() {
        let mut files = node_files("nodes/pdf-parser/1.0.1");
        files[0].content = MAIN_V1.replace("import axios from 'axios';\n", "");
        files.push(raw(MANIFEST_PATH, r#"{"dependencies": {}}"#));
        let err = Fixture::update().run(files).expect_err("dependency removed");
        assert_eq!(rules(&err), vec![Rule::DependencyRemoved]);
    }

    #[test]
    fn manifest_with_wrong_shape_fails_placement() {
        let mut fixture = Fixture::update();
        fixture.manifest = Some(r#"{"dependencies": {"axios": "^1.6.0", "zod": "^3"}}"#);
        let mut files = node_files("nodes/pdf-parser/1.0.1");
        files[0].content = format!("import Stripe from 'stripe';\n{MAIN_V1}");
        files.push(raw(MANIFEST_PATH, r#"{"dependencies": []}"#));
        let err = fixture.run(files).expect_err("not a manifest");
        assert_eq!(err.check, Check::Placement);
        assert_eq!(rules(&err), vec![Rule::MalformedJson]);
        assert_eq!(err.violations[0].path, MANIFEST_PATH);
        assert!(err.violations[0].detail.starts_with("not a package manifest"));
    }

    #[test]
    fn revalidation_is_deterministic() {
        let mut files = node_files("nodes/pdf-parser/1.0.1");
        files[0].content = MAIN_V1.replace("Promise<Output>", "Promise<string>");
        let fixture = Fixture::update();
        let first = fixture.run(files.clone());
        let second = fixture.run(files);
        assert_eq!(first, second);
    }

    #[test]
    fn report_lists_every_violation() {
        let err = ValidationError {
            check: Check::Placement,
            violations: vec![
                violation(Rule::UnsafePath, "/abs", "absolute path"),
                violation(Rule::DuplicatePath, "a", "dup"),
            ],
        };
        let report = err.report();
        assert!(report.starts_with("placement check failed with 2 violation(s)"));
        assert!(report.contains("[unsafe-path] /abs: absolute path"));
    }

    #[test]
    fn embedded_node_requires_written_owner() {
        let mut fixture = Fixture::new_node();
        fixture.plan.clear();
        fixture.index = ExistingArtifactIndex::from_identifiers(["workflow:onboarding"]);
        let files = vec![
            raw("workflows/onboarding/nodes/send-mail/main.ts", MAIN_V1),
            raw("workflows/onboarding/nodes/send-mail/inputs.json", INPUTS_V1),
            raw("workflows/onboarding/nodes/send-mail/output.json", OUTPUT_V1),
            raw("workflows/onboarding/nodes/send-mail/config.json", "{}"),
        ];
        let err = fixture.run(files).expect_err("owner not written");
        assert_eq!(rules(&err), vec![Rule::UnplannedArtifact]);
    }
}
