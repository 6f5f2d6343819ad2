//! Context reconciliation: decide, per requested entity, whether the request
//! creates something new or updates an existing artifact.
//!
//! Matching works on normalized tokens (lower-cased, split on anything that is
//! not alphanumeric). An artifact is matched exactly when its identifier or its
//! mapped label appears as a contiguous phrase in the request; otherwise it is a
//! fuzzy candidate when every significant token of its identifier or label
//! appears somewhere in the request. Two or more fuzzy candidates are reported,
//! never guessed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use semver::Version;

use crate::core::identifier::{
    IdPolicy, PolicyError, PolicySetting, kebab_case, label_from_name, mint, resolve_policy,
};
use crate::core::schema::{ArtifactKind, NODES_DIR, WORKFLOWS_DIR};
use crate::core::types::ReconciledArtifact;
use crate::core::version::{INITIAL_VERSION, bump_patch, parse_version};

/// Words dropped when deriving a name for a new artifact.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "add", "build", "called", "can", "create", "for", "from", "generate", "i",
    "in", "into", "it", "make", "me", "my", "named", "new", "node", "of", "on", "please", "that",
    "the", "to", "want", "which", "with", "workflow", "workflows", "write",
];

/// Longest derived name, in tokens.
const MAX_NAME_TOKENS: usize = 4;

/// Minimum length of a token that counts towards a fuzzy match.
const MIN_SIGNIFICANT_LEN: usize = 3;

/// One artifact already present in the target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingArtifact {
    pub kind: ArtifactKind,
    /// Identifier exactly as it appears in the repository.
    pub identifier: String,
    /// Highest known version (nodes only).
    pub version: Option<Version>,
}

impl fmt::Display for ExistingArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.identifier)?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

/// Identifier index built fresh for every request from caller-supplied strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingArtifactIndex {
    entries: BTreeMap<(ArtifactKind, String), ExistingArtifact>,
}

impl ExistingArtifactIndex {
    /// Build from strings such as `pdf-parser`, `pdf-parser@1.0.2`,
    /// `nodes/pdf-parser/1.0.2`, `workflow:onboarding` or `workflows/onboarding`.
    ///
    /// Repeated identifiers keep their highest version.
    pub fn from_identifiers<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::default();
        for item in raw {
            if let Some(artifact) = parse_existing(item.as_ref()) {
                index.insert(artifact);
            }
        }
        index
    }

    pub fn insert(&mut self, artifact: ExistingArtifact) {
        let key = (artifact.kind, artifact.identifier.to_lowercase());
        match self.entries.get_mut(&key) {
            Some(current) => {
                if artifact.version > current.version {
                    current.version = artifact.version;
                }
            }
            None => {
                self.entries.insert(key, artifact);
            }
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, kind: ArtifactKind, identifier: &str) -> Option<&ExistingArtifact> {
        self.entries.get(&(kind, identifier.to_lowercase()))
    }

    /// Every artifact with `identifier`, regardless of kind.
    pub fn find(&self, identifier: &str) -> Vec<&ExistingArtifact> {
        let wanted = identifier.to_lowercase();
        self.entries
            .iter()
            .filter(|((_, id), _)| *id == wanted)
            .map(|(_, artifact)| artifact)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExistingArtifact> {
        self.entries.values()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|artifact| artifact.identifier.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_existing(raw: &str) -> Option<ExistingArtifact> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }

    let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("workflow:") {
        (ArtifactKind::Workflow, rest)
    } else if let Some(rest) = trimmed.strip_prefix(&format!("{WORKFLOWS_DIR}/")) {
        (ArtifactKind::Workflow, rest)
    } else if let Some(rest) = trimmed.strip_prefix("node:") {
        (ArtifactKind::Node, rest)
    } else if let Some(rest) = trimmed.strip_prefix(&format!("{NODES_DIR}/")) {
        (ArtifactKind::Node, rest)
    } else {
        (ArtifactKind::Node, trimmed)
    };

    let (name, version) = match rest.split_once('@').or_else(|| rest.split_once('/')) {
        Some((name, version)) => (name.trim(), parse_version(version)),
        None => (rest.trim(), None),
    };
    if name.is_empty() {
        return None;
    }

    Some(ExistingArtifact {
        kind,
        identifier: name.to_string(),
        version: match kind {
            ArtifactKind::Node => version,
            _ => None,
        },
    })
}

/// Identifier to human-label mapping (`flow-id-to-label`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping {
    labels: BTreeMap<String, String>,
}

impl IdMapping {
    /// Parse a JSON object (`{"id": "Label"}`) or `id: label` / `id=label` lines.
    pub fn parse(raw: Option<&str>) -> Result<Self, ReconcileError> {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(Self::default());
        };

        let mut mapping = Self::default();
        if raw.starts_with('{') {
            let object: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)
                .map_err(|err| ReconcileError::MalformedMapping(err.to_string()))?;
            for (identifier, value) in object {
                if let Some(label) = value.as_str() {
                    mapping.insert(identifier, label);
                }
            }
            return Ok(mapping);
        }

        for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let Some((identifier, label)) = line.split_once(':').or_else(|| line.split_once('='))
            else {
                return Err(ReconcileError::MalformedMapping(format!(
                    "expected 'id: label', got '{line}'"
                )));
            };
            mapping.insert(identifier.trim(), label.trim());
        }
        Ok(mapping)
    }

    pub fn insert(&mut self, identifier: impl Into<String>, label: impl Into<String>) {
        let label = label.into();
        if !label.trim().is_empty() {
            self.labels.insert(identifier.into(), label.trim().to_string());
        }
    }

    pub fn label(&self, identifier: &str) -> Option<&str> {
        self.labels.get(identifier).map(String::as_str)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.labels.contains_key(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .map(|(identifier, label)| (identifier.as_str(), label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Reconciliation failed; the request cannot proceed without a human decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("request matches several existing artifacts: {}", .candidates.join(", "))]
    Ambiguous { candidates: Vec<String> },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("malformed id-to-label mapping: {0}")]
    MalformedMapping(String),
    #[error("'{identifier}' is at version {version}; its patch number cannot be incremented")]
    VersionExhausted { identifier: String, version: Version },
}

/// Everything the reconciler looks at.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInput<'a> {
    pub request: &'a str,
    /// Explicit name for the artifact, overriding the derived one.
    pub name_hint: Option<&'a str>,
    pub index: &'a ExistingArtifactIndex,
    pub mapping: &'a IdMapping,
    pub policy: PolicySetting,
    pub default_policy: IdPolicy,
}

/// Reconciler output: the plan the generator must realize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub policy: IdPolicy,
    pub artifacts: Vec<ReconciledArtifact>,
}

/// Decide NEW vs UPDATE for the entities named by the request.
pub fn reconcile(input: &ReconcileInput<'_>) -> Result<Reconciliation, ReconcileError> {
    let policy = resolve_policy(input.policy, input.default_policy, input.index.identifiers())?;

    if let Some(hint) = input.name_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        let mut named = input.index.find(hint);
        if named.is_empty() {
            named = input.index.find(&kebab_case(hint));
        }
        match named.as_slice() {
            [] => {}
            [existing] => {
                return Ok(Reconciliation {
                    policy,
                    artifacts: vec![plan_update(existing, input.mapping)?],
                });
            }
            _ => return Err(ambiguous(named)),
        }
    }

    let tokens = tokenize(input.request);

    let exact = exact_matches(&tokens, input.index, input.mapping)?;
    if !exact.is_empty() {
        let artifacts = exact
            .into_iter()
            .map(|existing| plan_update(existing, input.mapping))
            .collect::<Result<_, _>>()?;
        return Ok(Reconciliation { policy, artifacts });
    }

    let fuzzy = fuzzy_candidates(&tokens, input.index, input.mapping);
    match fuzzy.as_slice() {
        [] => Ok(Reconciliation {
            policy,
            artifacts: vec![plan_new(input, &tokens, policy)],
        }),
        [existing] => Ok(Reconciliation {
            policy,
            artifacts: vec![plan_update(existing, input.mapping)?],
        }),
        _ => Err(ambiguous(fuzzy)),
    }
}

/// Re-derive a previously saved plan against the current repository.
///
/// Artifacts that now exist become updates from their current version; the
/// rest stay new. Saved versions and flags are never trusted.
pub fn replan(
    saved: &[ReconciledArtifact],
    index: &ExistingArtifactIndex,
    mapping: &IdMapping,
    setting: PolicySetting,
    default_policy: IdPolicy,
) -> Result<Reconciliation, ReconcileError> {
    let policy = resolve_policy(setting, default_policy, index.identifiers())?;
    let artifacts = saved
        .iter()
        .map(|artifact| match index.get(artifact.kind, &artifact.identifier) {
            Some(existing) => plan_update(existing, mapping),
            None => Ok(ReconciledArtifact {
                kind: artifact.kind,
                identifier: artifact.identifier.clone(),
                is_new: true,
                resolved_version: artifact.kind.is_versioned().then_some(INITIAL_VERSION),
                previous_version: None,
                label: mapping
                    .label(&artifact.identifier)
                    .map(str::to_string)
                    .or_else(|| artifact.label.clone()),
            }),
        })
        .collect::<Result<_, _>>()?;
    Ok(Reconciliation { policy, artifacts })
}

fn ambiguous(candidates: Vec<&ExistingArtifact>) -> ReconcileError {
    ReconcileError::Ambiguous {
        candidates: candidates.iter().map(ToString::to_string).collect(),
    }
}

fn plan_update(
    existing: &ExistingArtifact,
    mapping: &IdMapping,
) -> Result<ReconciledArtifact, ReconcileError> {
    let (previous_version, resolved_version) = match existing.kind {
        ArtifactKind::Node => {
            let previous = existing.version.clone().unwrap_or(INITIAL_VERSION);
            let Some(resolved) = bump_patch(&previous) else {
                return Err(ReconcileError::VersionExhausted {
                    identifier: existing.identifier.clone(),
                    version: previous,
                });
            };
            (Some(previous), Some(resolved))
        }
        _ => (None, None),
    };
    Ok(ReconciledArtifact {
        kind: existing.kind,
        identifier: existing.identifier.clone(),
        is_new: false,
        resolved_version,
        previous_version,
        label: mapping.label(&existing.identifier).map(str::to_string),
    })
}

fn plan_new(input: &ReconcileInput<'_>, tokens: &[String], policy: IdPolicy) -> ReconciledArtifact {
    let kind = if tokens
        .iter()
        .any(|token| token == "workflow" || token == "workflows")
    {
        ArtifactKind::Workflow
    } else {
        ArtifactKind::Node
    };

    let hint = input.name_hint.map(str::trim).filter(|hint| !hint.is_empty());
    let name = match hint {
        Some(hint) => hint.to_string(),
        None => derive_name(tokens),
    };

    let taken: BTreeSet<String> = input
        .index
        .identifiers()
        .map(str::to_lowercase)
        .chain(input.mapping.iter().map(|(identifier, _)| identifier.to_lowercase()))
        .collect();
    let identifier = mint(policy, &name, &taken);

    let label = match hint {
        Some(hint) => hint.to_string(),
        None if name.is_empty() => "Untitled".to_string(),
        None => label_from_name(&name),
    };

    ReconciledArtifact {
        kind,
        identifier,
        is_new: true,
        resolved_version: kind.is_versioned().then_some(INITIAL_VERSION),
        previous_version: None,
        label: Some(label),
    }
}

fn derive_name(tokens: &[String]) -> String {
    tokens
        .iter()
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .take(MAX_NAME_TOKENS)
        .cloned()
        .collect::<Vec<_>>()
        .join("-")
}

/// Lower-cased alphanumeric runs.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_significant(token: &str) -> bool {
    token.len() >= MIN_SIGNIFICANT_LEN && !token.chars().all(|ch| ch.is_ascii_digit())
}

/// Token phrases that name an artifact: its identifier and its label.
fn phrases(existing: &ExistingArtifact, mapping: &IdMapping) -> Vec<Vec<String>> {
    let mut phrases = vec![tokenize(&existing.identifier)];
    if let Some(label) = mapping.label(&existing.identifier) {
        let label = tokenize(label);
        if !label.is_empty() && !phrases.contains(&label) {
            phrases.push(label);
        }
    }
    phrases.retain(|phrase| !phrase.is_empty());
    phrases
}

fn find_phrase(tokens: &[String], phrase: &[String]) -> Option<usize> {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return None;
    }
    tokens.windows(phrase.len()).position(|window| window == phrase)
}

struct Mention<'a> {
    start: usize,
    len: usize,
    artifact: &'a ExistingArtifact,
}

impl Mention<'_> {
    fn overlaps(&self, other: &Mention<'_>) -> bool {
        self.start < other.start + other.len && other.start < self.start + self.len
    }
}

/// Whole-phrase mentions; overlapping mentions keep the longest.
fn exact_matches<'a>(
    tokens: &[String],
    index: &'a ExistingArtifactIndex,
    mapping: &IdMapping,
) -> Result<Vec<&'a ExistingArtifact>, ReconcileError> {
    let mut mentions: Vec<Mention<'a>> = Vec::new();
    for artifact in index.iter() {
        let best = phrases(artifact, mapping)
            .iter()
            .filter_map(|phrase| {
                find_phrase(tokens, phrase).map(|start| Mention {
                    start,
                    len: phrase.len(),
                    artifact,
                })
            })
            .max_by_key(|mention| mention.len);
        if let Some(mention) = best {
            mentions.push(mention);
        }
    }
    mentions.sort_by(|a, b| b.len.cmp(&a.len).then(a.start.cmp(&b.start)));

    let mut accepted: Vec<Mention<'a>> = Vec::new();
    for mention in mentions {
        let Some(clash) = accepted.iter().find(|kept| kept.overlaps(&mention)) else {
            accepted.push(mention);
            continue;
        };
        if clash.start == mention.start && clash.len == mention.len {
            return Err(ambiguous(vec![clash.artifact, mention.artifact]));
        }
    }

    accepted.sort_by_key(|mention| mention.start);
    Ok(accepted.into_iter().map(|mention| mention.artifact).collect())
}

fn fuzzy_candidates<'a>(
    tokens: &[String],
    index: &'a ExistingArtifactIndex,
    mapping: &IdMapping,
) -> Vec<&'a ExistingArtifact> {
    let present: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
    index
        .iter()
        .filter(|artifact| {
            phrases(artifact, mapping).iter().any(|phrase| {
                let significant: Vec<&String> =
                    phrase.iter().filter(|token| is_significant(token)).collect();
                !significant.is_empty()
                    && significant
                        .iter()
                        .all(|token| present.contains(token.as_str()))
            })
        })
        .collect()
}
