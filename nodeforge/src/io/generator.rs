//! Generator abstraction.
//!
//! The [`Generator`] trait is the only boundary to the generative model: a
//! rendered [`GenerationRequest`] goes in, a schema-checked
//! [`GeneratorResponse`] comes out. [`CommandGenerator`] spawns a configured
//! agent command; tests use scripted generators that return canned responses.

use std::cell::Cell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use jsonschema::Draft;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::core::request::GenerationRequest;
use crate::core::types::GeneratorResponse;
use crate::io::config::{GeneratorConfig, OUTPUT_PLACEHOLDER, SCHEMA_PLACEHOLDER};
use crate::io::process::run_command_with_timeout;
use crate::io::run_log::RunLog;

/// The generator could not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The generator could not be reached or did not finish.
    #[error("generator failed: {0}")]
    Transport(String),
    /// The generator answered with something that is not a valid response.
    #[error("generator response malformed: {reason}")]
    Malformed { reason: String, raw: String },
}

impl GenerationError {
    /// Raw response text, when the generator produced one.
    pub fn raw(&self) -> Option<&str> {
        match self {
            GenerationError::Malformed { raw, .. } => Some(raw),
            GenerationError::Transport(_) => None,
        }
    }
}

/// Abstraction over generation backends.
pub trait Generator {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratorResponse, GenerationError>;
}

/// Generator that runs an external agent command.
///
/// The rendered request is written to the command's stdin. Each argument may
/// carry `{schema}` (path of the response JSON Schema) and `{output}` (path
/// the agent writes its final message to). Without an output file the
/// command's stdout is taken as the response. Scratch files live only for the
/// duration of one call.
pub struct CommandGenerator {
    config: GeneratorConfig,
    workdir: PathBuf,
    scratch_dir: PathBuf,
    run_log: Option<RunLog>,
    attempts: Cell<u32>,
}

impl CommandGenerator {
    pub fn new(config: GeneratorConfig, workdir: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            config,
            workdir,
            scratch_dir,
            run_log: None,
            attempts: Cell::new(0),
        }
    }

    /// Record each command transcript (`transcript-N.txt`) in `run_log`.
    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    fn scratch_file(&self, prefix: &str) -> anyhow::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".json")
            .tempfile_in(&self.scratch_dir)
            .with_context(|| format!("create scratch file in {}", self.scratch_dir.display()))
    }

    fn prepare(&self, request: &GenerationRequest) -> anyhow::Result<(NamedTempFile, NamedTempFile)> {
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("create scratch dir {}", self.scratch_dir.display()))?;
        let mut schema_file = self.scratch_file("schema-")?;
        let output_file = self.scratch_file("output-")?;
        let schema = serde_json::to_string_pretty(&request.response_schema)
            .context("serialize response schema")?;
        schema_file
            .write_all(schema.as_bytes())
            .and_then(|()| schema_file.flush())
            .with_context(|| format!("write response schema {}", schema_file.path().display()))?;
        Ok((schema_file, output_file))
    }

    fn command(&self, schema_path: &Path, output_path: &Path) -> Command {
        let args: Vec<String> = self
            .config
            .command
            .iter()
            .map(|arg| {
                arg.replace(SCHEMA_PLACEHOLDER, &schema_path.display().to_string())
                    .replace(OUTPUT_PLACEHOLDER, &output_path.display().to_string())
            })
            .collect();
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]).current_dir(&self.workdir);
        cmd
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(timeout_secs = self.config.timeout_secs))]
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratorResponse, GenerationError> {
        if self.config.command.is_empty() {
            return Err(GenerationError::Transport(
                "generator.command is empty".to_string(),
            ));
        }
        let attempt = self.attempts.get() + 1;
        self.attempts.set(attempt);
        let (schema_file, output_file) = self
            .prepare(request)
            .map_err(|err| GenerationError::Transport(format!("{err:#}")))?;

        let program = &self.config.command[0];
        info!(program = %program, attempt, "starting generator");
        let output = run_command_with_timeout(
            self.command(schema_file.path(), output_file.path()),
            Some(request.render().as_bytes()),
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .map_err(|err| GenerationError::Transport(format!("{err:#}")))?;

        if let Some(log) = &self.run_log
            && let Err(err) = log.write_transcript(attempt, &output.transcript(program))
        {
            warn!(err = %err, "failed to write generator transcript");
        }

        if output.timed_out {
            warn!(timeout_secs = self.config.timeout_secs, "generator timed out");
            return Err(GenerationError::Transport(format!(
                "timed out after {}s",
                self.config.timeout_secs
            )));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            let tail = output.stderr_tail().unwrap_or_default();
            return Err(GenerationError::Transport(format!(
                "exited with status {:?}: {tail}",
                output.status.code()
            )));
        }

        let raw = match fs::read_to_string(output_file.path()) {
            Ok(contents) if !contents.trim().is_empty() => contents,
            _ => String::from_utf8_lossy(&output.stdout).into_owned(),
        };

        debug!(bytes = raw.len(), "generator finished");
        parse_response(&raw, &request.response_schema)
    }
}

/// Strip Markdown code fences, check against `schema`, and deserialize.
pub fn parse_response(raw: &str, schema: &Value) -> Result<GeneratorResponse, GenerationError> {
    let malformed = |reason: String| GenerationError::Malformed {
        reason,
        raw: raw.to_string(),
    };

    let text = strip_fences(raw);
    if text.is_empty() {
        return Err(malformed("empty response".to_string()));
    }
    let value: Value =
        serde_json::from_str(text).map_err(|err| malformed(format!("invalid JSON: {err}")))?;

    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| malformed(format!("invalid response schema: {err}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(malformed(format!(
            "schema validation failed: {}",
            messages.join("; ")
        )));
    }

    serde_json::from_value(value).map_err(|err| malformed(err.to_string()))
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if any.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) if rest[..newline].trim().chars().all(char::is_alphanumeric) => {
            &rest[newline + 1..]
        }
        _ => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}
