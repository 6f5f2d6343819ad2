//! Orchestration of one prompt-to-pull-request run.
//!
//! caller context → reconcile → build request → generate → validate (one
//! retry with feedback) → publish. Every step except generation and
//! publishing is pure; the run log records what each step saw.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::reconcile::{
    ExistingArtifactIndex, IdMapping, ReconcileError, ReconcileInput, Reconciliation, reconcile,
    replan,
};
use crate::core::request::{GenerationRequest, RequestInputs, build_request};
use crate::core::types::{
    ChangeSet, GeneratorResponse, PriorSnapshot, RawFile, ReconciledArtifact,
};
use crate::core::validator::{ValidationContext, ValidationError, validate};
use crate::exit_codes;
use crate::io::config::{ForgeConfig, PolicyConfig};
use crate::io::context::{RepoContext, fetch_prior_snapshot};
use crate::io::generator::{GenerationError, Generator};
use crate::io::github::{GitHost, RepoReader};
use crate::io::run_log::RunLog;
use crate::publish::{PublishError, PublishOptions, PublishReport, publish};

/// Terminal failure of a run, by stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Reconcile(_) => exit_codes::RECONCILE,
            PipelineError::Generation(_) => exit_codes::GENERATION,
            PipelineError::Validation(_) => exit_codes::VALIDATION,
            PipelineError::Publish(_) => exit_codes::PUBLISH,
            PipelineError::Other(_) => exit_codes::INVALID,
        }
    }
}

/// Caller context parsed into the reconciler's inputs, plus its decision.
#[derive(Debug, Clone)]
pub struct Plan {
    pub index: ExistingArtifactIndex,
    pub mapping: IdMapping,
    pub reconciliation: Reconciliation,
}

impl Plan {
    pub fn artifacts(&self) -> &[ReconciledArtifact] {
        &self.reconciliation.artifacts
    }
}

/// Parse the caller context and reconcile `request` against it.
#[instrument(skip_all, fields(existing = context.existing.len()))]
pub fn plan(
    context: &RepoContext,
    request: &str,
    name_hint: Option<&str>,
    policy: &PolicyConfig,
) -> Result<Plan, ReconcileError> {
    let index = ExistingArtifactIndex::from_identifiers(&context.existing);
    let mapping = IdMapping::parse(context.id_mapping.as_deref())?;
    let reconciliation = reconcile(&ReconcileInput {
        request,
        name_hint,
        index: &index,
        mapping: &mapping,
        policy: policy.identifiers,
        default_policy: policy.default_identifiers,
    })?;
    for artifact in &reconciliation.artifacts {
        info!(
            kind = %artifact.kind,
            identifier = %artifact.identifier,
            new = artifact.is_new,
            dir = %artifact.target_dir(),
            "reconciled"
        );
    }
    Ok(Plan {
        index,
        mapping,
        reconciliation,
    })
}

/// Render the generation request for a plan.
pub fn request_for(
    plan: &Plan,
    request: &str,
    manifest: Option<&str>,
) -> anyhow::Result<GenerationRequest> {
    build_request(&RequestInputs {
        request,
        policy: plan.reconciliation.policy,
        plan: plan.artifacts(),
        index: &plan.index,
        mapping: &plan.mapping,
        manifest,
    })
    .context("render generation request")
}

/// Judge one generator response against a plan.
pub fn check_response(
    plan: &Plan,
    response: &GeneratorResponse,
    manifest: Option<&str>,
    prior: &PriorSnapshot,
    title_prefix: &str,
) -> Result<ChangeSet, ValidationError> {
    validate(
        response,
        &ValidationContext {
            plan: plan.artifacts(),
            policy: plan.reconciliation.policy,
            index: &plan.index,
            mapping: &plan.mapping,
            manifest,
            prior,
            title_prefix,
        },
    )
}

/// A `changeset.json` from an earlier run, read back as untrusted input.
///
/// File classes and the title are dropped; both are derived again.
#[derive(Debug, Clone, Deserialize)]
pub struct SavedChangeSet {
    pub summary: String,
    pub files: Vec<RawFile>,
    pub artifacts: Vec<ReconciledArtifact>,
}

/// Re-validate a saved change set against the repository as it is now.
#[instrument(skip_all, fields(files = saved.files.len()))]
pub fn revalidate(
    saved: SavedChangeSet,
    context: &RepoContext,
    reader: &dyn RepoReader,
    config: &ForgeConfig,
) -> Result<ChangeSet, PipelineError> {
    let index = ExistingArtifactIndex::from_identifiers(&context.existing);
    let mapping = IdMapping::parse(context.id_mapping.as_deref())?;
    let reconciliation = replan(
        &saved.artifacts,
        &index,
        &mapping,
        config.policy.identifiers,
        config.policy.default_identifiers,
    )?;
    let plan = Plan {
        index,
        mapping,
        reconciliation,
    };
    let prior = fetch_prior_snapshot(reader, plan.artifacts())
        .map_err(|err| anyhow!("read current artifact files: {err}"))?;
    let response = GeneratorResponse {
        files: saved.files,
        summary: Some(saved.summary),
    };
    let change_set = check_response(
        &plan,
        &response,
        context.manifest.as_deref(),
        &prior,
        &config.publish.title_prefix,
    )?;
    Ok(change_set)
}

/// What a run was asked to do.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub request: String,
    /// Explicit artifact name, overriding the one derived from the request.
    pub name_hint: Option<String>,
    pub context: RepoContext,
}

/// Collaborators of a run. Without a host the run stops after validation.
pub struct PipelineDeps<'a> {
    pub generator: &'a dyn Generator,
    pub reader: &'a dyn RepoReader,
    pub host: Option<&'a dyn GitHost>,
    pub run_log: Option<&'a RunLog>,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    pub artifacts: Vec<ReconciledArtifact>,
    pub change_set: ChangeSet,
    /// Generator calls made, feedback retry included.
    pub attempts: u32,
    /// `None` for dry runs.
    pub published: Option<PublishReport>,
}

#[derive(Serialize)]
struct RunResult<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    published: Option<&'a PublishReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Run the whole pipeline for one request.
#[instrument(skip_all)]
pub fn run_pipeline(
    request: &PipelineRequest,
    config: &ForgeConfig,
    deps: &PipelineDeps<'_>,
) -> Result<PipelineOutcome, PipelineError> {
    let result = run_stages(request, config, deps);
    if let Some(log) = deps.run_log {
        let record = match &result {
            Ok(outcome) => RunResult {
                status: if outcome.published.is_some() {
                    "published"
                } else {
                    "validated"
                },
                published: outcome.published.as_ref(),
                error: None,
            },
            Err(err) => RunResult {
                status: "failed",
                published: None,
                error: Some(err.to_string()),
            },
        };
        if let Err(err) = log.write_result(&record) {
            warn!(err = %err, "failed to write run result");
        }
    }
    result
}

fn run_stages(
    request: &PipelineRequest,
    config: &ForgeConfig,
    deps: &PipelineDeps<'_>,
) -> Result<PipelineOutcome, PipelineError> {
    let manifest = request.context.manifest.as_deref();
    let plan = plan(
        &request.context,
        &request.request,
        request.name_hint.as_deref(),
        &config.policy,
    )?;
    let prior = fetch_prior_snapshot(deps.reader, plan.artifacts())
        .map_err(|err| anyhow!("read current artifact files: {err}"))?;

    let mut generation = request_for(&plan, &request.request, manifest)?;
    let max_attempts = if config.retry_with_feedback { 2 } else { 1 };
    let mut attempt = 0;
    let change_set = loop {
        attempt += 1;
        if let Some(log) = deps.run_log {
            log.write_request(attempt, &generation.render())?;
        }

        info!(attempt, "requesting generation");
        let response = match deps.generator.generate(&generation) {
            Ok(response) => response,
            Err(err) => {
                if let (Some(log), Some(raw)) = (deps.run_log, err.raw()) {
                    log.write_response(attempt, raw)?;
                }
                return Err(err.into());
            }
        };
        if let Some(log) = deps.run_log {
            let raw = serde_json::to_string_pretty(&response).context("serialize response")?;
            log.write_response(attempt, &raw)?;
        }

        match check_response(
            &plan,
            &response,
            manifest,
            &prior,
            &config.publish.title_prefix,
        ) {
            Ok(change_set) => break change_set,
            Err(err) => {
                warn!(attempt, check = %err.check, violations = err.violations.len(), "generated files rejected");
                if let Some(log) = deps.run_log {
                    log.write_validation(attempt, &err.report())?;
                }
                if attempt >= max_attempts {
                    return Err(err.into());
                }
                generation = generation
                    .with_feedback(&err)
                    .context("render validation feedback")?;
            }
        }
    };
    info!(files = change_set.files.len(), attempt, "change set accepted");
    if let Some(log) = deps.run_log {
        log.write_change_set(&change_set)?;
    }

    let published = match deps.host {
        Some(host) => Some(publish(
            host,
            &change_set,
            &PublishOptions {
                branch_prefix: config.publish.branch_prefix.clone(),
                title_prefix: config.publish.title_prefix.clone(),
                fallback_branch: config.publish.fallback_branch.clone(),
            },
        )?),
        None => None,
    };

    Ok(PipelineOutcome {
        artifacts: plan.reconciliation.artifacts,
        change_set,
        attempts: attempt,
        published,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::Check;
    use crate::test_support::{
        MemoryRepo, RecordingHost, ScriptedGenerator, label_file, node_files, response,
    };

    fn new_node_response() -> GeneratorResponse {
        let mut files = node_files("pdf-parser", "1.0.0");
        files.push(label_file("pdf-parser", "PDF Parser"));
        response(files, "Add PDF parser")
    }

    fn request(text: &str) -> PipelineRequest {
        PipelineRequest {
            request: text.to_string(),
            name_hint: Some("pdf parser".to_string()),
            context: RepoContext::default(),
        }
    }

    #[test]
    fn dry_run_stops_after_validation() {
        let generator = ScriptedGenerator::new(vec![Ok(new_node_response())]);
        let reader = MemoryRepo::new();
        let outcome = run_pipeline(
            &request("Create a node that extracts text from a PDF"),
            &ForgeConfig::default(),
            &PipelineDeps {
                generator: &generator,
                reader: &reader,
                host: None,
                run_log: None,
            },
        )
        .expect("run");
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.published.is_none());
        assert_eq!(outcome.change_set.title, "nodeforge: Add PDF parser");
        assert_eq!(outcome.artifacts[0].identifier, "pdf-parser");
    }

    #[test]
    fn rejection_without_retry_is_terminal() {
        let mut files = node_files("pdf-parser", "1.0.0");
        files.retain(|file| !file.path.ends_with("meta.json"));
        files.push(label_file("pdf-parser", "PDF Parser"));
        let generator = ScriptedGenerator::new(vec![Ok(response(files, "Add"))]);
        let reader = MemoryRepo::new();
        let config = ForgeConfig {
            retry_with_feedback: false,
            ..ForgeConfig::default()
        };
        let host = RecordingHost::new();
        let err = run_pipeline(
            &request("Create a pdf parser node"),
            &config,
            &PipelineDeps {
                generator: &generator,
                reader: &reader,
                host: Some(&host),
                run_log: None,
            },
        )
        .expect_err("rejected");
        match &err {
            PipelineError::Validation(validation) => {
                assert_eq!(validation.check, Check::Completeness);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), exit_codes::VALIDATION);
        assert_eq!(generator.requests().len(), 1);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn generation_failure_maps_to_exit_code() {
        let generator = ScriptedGenerator::new(Vec::new());
        let reader = MemoryRepo::new();
        let err = run_pipeline(
            &request("Create a pdf parser node"),
            &ForgeConfig::default(),
            &PipelineDeps {
                generator: &generator,
                reader: &reader,
                host: None,
                run_log: None,
            },
        )
        .expect_err("exhausted");
        assert_eq!(err.exit_code(), exit_codes::GENERATION);
    }

    #[test]
    fn run_log_records_each_stage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), "run-1").expect("log");
        let generator = ScriptedGenerator::new(vec![Ok(new_node_response())]);
        let reader = MemoryRepo::new();
        let host = RecordingHost::new();
        run_pipeline(
            &request("Create a node that extracts text from a PDF"),
            &ForgeConfig::default(),
            &PipelineDeps {
                generator: &generator,
                reader: &reader,
                host: Some(&host),
                run_log: Some(&log),
            },
        )
        .expect("run");

        let paths = log.paths();
        assert!(paths.request_path(1).is_file());
        assert!(paths.response_path(1).is_file());
        assert!(paths.change_set_path.is_file());
        let result = std::fs::read_to_string(&paths.result_path).expect("result");
        assert!(result.contains("\"published\""));
    }

    #[test]
    fn run_log_keeps_every_attempt_request() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), "run-2").expect("log");
        let mut incomplete = node_files("pdf-parser", "1.0.0");
        incomplete.retain(|file| !file.path.ends_with("meta.json"));
        incomplete.push(label_file("pdf-parser", "PDF Parser"));
        let generator = ScriptedGenerator::new(vec![
            Ok(response(incomplete, "Add PDF parser")),
            Ok(new_node_response()),
        ]);
        let reader = MemoryRepo::new();
        let outcome = run_pipeline(
            &request("Create a node that extracts text from a PDF"),
            &ForgeConfig::default(),
            &PipelineDeps {
                generator: &generator,
                reader: &reader,
                host: None,
                run_log: Some(&log),
            },
        )
        .expect("run");
        assert_eq!(outcome.attempts, 2);

        let paths = log.paths();
        let first = std::fs::read_to_string(paths.request_path(1)).expect("first request");
        let second = std::fs::read_to_string(paths.request_path(2)).expect("second request");
        assert!(!first.contains("Previous attempt rejected"));
        assert!(second.contains("[missing-required-file]"));
        assert!(paths.validation_path(1).is_file());
        let result = std::fs::read_to_string(&paths.result_path).expect("result");
        assert!(result.contains("\"validated\""));
    }

    #[test]
    fn saved_change_set_is_validated_again() {
        let reader = MemoryRepo::new();
        let saved: SavedChangeSet = serde_json::from_value(serde_json::json!({
            "title": "nodeforge: Add PDF parser",
            "summary": "Add PDF parser",
            "files": [
                {"path": "../outside.txt", "content": "x", "type": "node"},
                {"path": "flow-id-to-label/pdf-parser.txt", "content": "PDF Parser", "type": "node"}
            ],
            "artifacts": []
        }))
        .expect("saved");
        let err = revalidate(saved, &RepoContext::default(), &reader, &ForgeConfig::default())
            .expect_err("tampered");
        let PipelineError::Validation(validation) = &err else {
            panic!("expected validation failure, got {err}");
        };
        assert_eq!(validation.check, Check::Placement);
        assert!(
            validation
                .violations
                .iter()
                .any(|violation| violation.path == "../outside.txt")
        );
        assert_eq!(err.exit_code(), exit_codes::VALIDATION);
    }

    #[test]
    fn saved_change_set_classes_are_derived() {
        let reader = MemoryRepo::new();
        let first = run_pipeline(
            &request("Create a node that extracts text from a PDF"),
            &ForgeConfig::default(),
            &PipelineDeps {
                generator: &ScriptedGenerator::new(vec![Ok(new_node_response())]),
                reader: &reader,
                host: None,
                run_log: None,
            },
        )
        .expect("run");
        let mut written = serde_json::to_value(&first.change_set).expect("serialize");
        for file in written["files"].as_array_mut().expect("files") {
            file["type"] = serde_json::json!("workflow");
        }
        let saved: SavedChangeSet = serde_json::from_value(written).expect("saved");

        let change_set = revalidate(saved, &RepoContext::default(), &reader, &ForgeConfig::default())
            .expect("still valid");
        assert_eq!(change_set, first.change_set);
    }
}
