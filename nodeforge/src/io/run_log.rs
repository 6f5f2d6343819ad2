//! Run logging for `<runs_dir>/<run-id>/`.
//!
//! Product artifacts, always written, independent of `RUST_LOG`: per attempt
//! the rendered request, generator transcript, raw response and validation
//! report; then the accepted change set and the publish result.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tracing::debug;

/// `YYYYMMDD_HHMMSS-xxxxxx`, sortable by start time.
pub fn new_run_id() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{stamp}-{suffix}")
}

/// Resolved file names of one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub change_set_path: PathBuf,
    pub result_path: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            dir: dir.clone(),
            change_set_path: dir.join("changeset.json"),
            result_path: dir.join("result.json"),
        }
    }

    /// Rendered generation request of attempt `attempt` (1-based).
    pub fn request_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("request-{attempt}.md"))
    }

    /// Generator command stdout and stderr of attempt `attempt`.
    pub fn transcript_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("transcript-{attempt}.txt"))
    }

    /// Raw generator output of attempt `attempt` (1-based).
    pub fn response_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("response-{attempt}.txt"))
    }

    /// Validation report of attempt `attempt` (1-based).
    pub fn validation_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("validation-{attempt}.txt"))
    }
}

/// Writer bound to one run directory.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    paths: RunPaths,
}

impl RunLog {
    pub fn create(runs_dir: &Path, run_id: &str) -> Result<Self> {
        let paths = RunPaths::new(runs_dir, run_id);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create run dir {}", paths.dir.display()))?;
        debug!(dir = %paths.dir.display(), "run log created");
        Ok(Self {
            run_id: run_id.to_string(),
            paths,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn write_request(&self, attempt: u32, rendered: &str) -> Result<()> {
        write_text(&self.paths.request_path(attempt), rendered)
    }

    pub fn write_transcript(&self, attempt: u32, transcript: &str) -> Result<()> {
        write_text(&self.paths.transcript_path(attempt), transcript)
    }

    pub fn write_response(&self, attempt: u32, raw: &str) -> Result<()> {
        write_text(&self.paths.response_path(attempt), raw)
    }

    pub fn write_validation(&self, attempt: u32, report: &str) -> Result<()> {
        write_text(&self.paths.validation_path(attempt), report)
    }

    pub fn write_change_set<T: Serialize>(&self, change_set: &T) -> Result<()> {
        write_json(&self.paths.change_set_path, change_set)
    }

    pub fn write_result<T: Serialize>(&self, result: &T) -> Result<()> {
        write_json(&self.paths.result_path, result)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
