//! Generation request assembly.
//!
//! Pure: the same reconciled plan and context always render the same request.
//! Instruction text is derived from the layout and policy tables so the
//! generator is told exactly what the validator will enforce.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::core::identifier::IdPolicy;
use crate::core::policy::{POLICIES, Subject};
use crate::core::reconcile::{ExistingArtifactIndex, IdMapping};
use crate::core::schema::{ArtifactKind, artifact_dir};
use crate::core::types::ReconciledArtifact;
use crate::core::validator::ValidationError;

const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md");
const PROMPT_TEMPLATE: &str = include_str!("prompts/prompt.md");
const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");
const RESPONSE_SCHEMA: &str = include_str!("../../schemas/generator_response.schema.json");

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("instructions", INSTRUCTIONS_TEMPLATE)
        .expect("instructions template should be valid");
    env.add_template("prompt", PROMPT_TEMPLATE)
        .expect("prompt template should be valid");
    env.add_template("feedback", FEEDBACK_TEMPLATE)
        .expect("feedback template should be valid");
    env
});

/// JSON Schema every generator response must satisfy.
pub fn response_schema() -> Value {
    serde_json::from_str(RESPONSE_SCHEMA).expect("response schema should be valid JSON")
}

/// Everything the builder needs.
#[derive(Debug, Clone, Copy)]
pub struct RequestInputs<'a> {
    pub request: &'a str,
    pub policy: IdPolicy,
    pub plan: &'a [ReconciledArtifact],
    pub index: &'a ExistingArtifactIndex,
    pub mapping: &'a IdMapping,
    pub manifest: Option<&'a str>,
}

/// Fully rendered request for the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub instructions: String,
    pub prompt: String,
    pub response_schema: Value,
}

impl GenerationRequest {
    /// Instructions followed by the prompt, for single-channel generators.
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.instructions.trim_end(), self.prompt.trim_end())
    }

    /// Same request with the rejection of a previous attempt appended.
    pub fn with_feedback(&self, error: &ValidationError) -> Result<Self, minijinja::Error> {
        let feedback = ENV.get_template("feedback")?.render(context! {
            check => error.check.as_str(),
            violations => error.violations.iter().map(|violation| context! {
                rule => violation.rule.as_str(),
                path => violation.path.as_str(),
                detail => violation.detail.as_str(),
            }).collect::<Vec<_>>(),
        })?;
        Ok(Self {
            instructions: self.instructions.clone(),
            prompt: format!("{}\n{}", self.prompt.trim_end(), feedback.trim_end()),
            response_schema: self.response_schema.clone(),
        })
    }
}

#[derive(Serialize)]
struct LayoutEntry {
    kind: &'static str,
    dir: String,
    files: Vec<&'static str>,
}

#[derive(Serialize)]
struct RuleEntry {
    subject: String,
    allowed: &'static str,
    forbidden: Vec<&'static str>,
}

#[derive(Serialize)]
struct PlanEntry<'a> {
    action: &'static str,
    kind: &'static str,
    identifier: &'a str,
    label: Option<&'a str>,
    dir: String,
    previous_dir: Option<String>,
}

#[derive(Serialize)]
struct LabelEntry<'a> {
    id: &'a str,
    label: &'a str,
}

/// Render instructions and prompt for one request.
pub fn build_request(input: &RequestInputs<'_>) -> Result<GenerationRequest, minijinja::Error> {
    let layout: Vec<LayoutEntry> = [
        ArtifactKind::Node,
        ArtifactKind::Workflow,
        ArtifactKind::EmbeddedNode,
    ]
    .into_iter()
    .map(|kind| LayoutEntry {
        kind: kind.as_str(),
        dir: artifact_dir(kind, "<id>", None, None),
        files: kind
            .required_roles()
            .iter()
            .map(|role| role.file_name())
            .collect(),
    })
    .collect();

    let rules: Vec<RuleEntry> = POLICIES
        .iter()
        .map(|policy| RuleEntry {
            subject: match policy.subject {
                Subject::Role(role) => role.file_name().to_string(),
                Subject::Manifest => policy.subject.to_string(),
            },
            allowed: policy.allowed,
            forbidden: policy.forbidden.iter().map(|rule| rule.prohibition()).collect(),
        })
        .collect();

    let instructions = ENV.get_template("instructions")?.render(context! {
        layout => layout,
        policy => input.policy.to_string(),
        rules => rules,
    })?;

    let plan: Vec<PlanEntry> = input
        .plan
        .iter()
        .map(|artifact| PlanEntry {
            action: if artifact.is_new { "create" } else { "update" },
            kind: artifact.kind.as_str(),
            identifier: &artifact.identifier,
            label: artifact.label.as_deref(),
            dir: artifact.target_dir(),
            previous_dir: artifact
                .previous_dir()
                .filter(|previous| *previous != artifact.target_dir()),
        })
        .collect();
    let labels: Vec<LabelEntry> = input
        .mapping
        .iter()
        .map(|(id, label)| LabelEntry { id, label })
        .collect();
    let existing: Vec<String> = input.index.iter().map(ToString::to_string).collect();

    let prompt = ENV.get_template("prompt")?.render(context! {
        request => input.request.trim(),
        plan => plan,
        manifest => input.manifest.map(str::trim).filter(|raw| !raw.is_empty()),
        labels => labels,
        existing => existing,
    })?;

    Ok(GenerationRequest {
        instructions,
        prompt,
        response_schema: response_schema(),
    })
}
