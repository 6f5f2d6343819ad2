//! nodeforge configuration stored in `nodeforge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::identifier::{IdPolicy, PolicySetting};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "nodeforge.toml";

/// Placeholder replaced with the response schema path in `generator.command`.
pub const SCHEMA_PLACEHOLDER: &str = "{schema}";
/// Placeholder replaced with the output file path in `generator.command`.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// nodeforge configuration (TOML).
///
/// Edited by humans; every field has a default so a missing file or a partial
/// file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Re-run the generator once with validation feedback before giving up.
    pub retry_with_feedback: bool,

    /// Directory receiving one sub-directory of artifacts per run.
    pub runs_dir: PathBuf,

    pub github: GithubConfig,
    pub generator: GeneratorConfig,
    pub policy: PolicyConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    /// REST API root.
    pub api_base: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command line of the generator agent. The prompt is written to stdin;
    /// `{schema}` and `{output}` are replaced with file paths.
    pub command: Vec<String>,
    /// Wall-clock budget for one generation.
    pub timeout_secs: u64,
    /// Truncate captured generator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// `infer`, `kebab` or `opaque`.
    pub identifiers: PolicySetting,
    /// Policy used by `infer` when the repository has no artifacts yet.
    pub default_identifiers: IdPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Branch names are `<branch_prefix>/<slug>-<salt>`.
    pub branch_prefix: String,
    /// Pull request titles are `<title_prefix>: <summary line>`.
    pub title_prefix: String,
    /// Base branch used when repository metadata has no default branch.
    pub fallback_branch: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                SCHEMA_PLACEHOLDER,
                "--output-last-message",
                OUTPUT_PLACEHOLDER,
                "-",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 2_000_000,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            identifiers: PolicySetting::Infer,
            default_identifiers: IdPolicy::Kebab,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "nodeforge".to_string(),
            title_prefix: "nodeforge".to_string(),
            fallback_branch: "main".to_string(),
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            retry_with_feedback: true,
            runs_dir: PathBuf::from(".nodeforge").join("runs"),
            github: GithubConfig::default(),
            generator: GeneratorConfig::default(),
            policy: PolicyConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl GithubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.github.api_base.trim().is_empty() {
            return Err(anyhow!("github.api_base must not be empty"));
        }
        if !self.github.api_base.starts_with("http://")
            && !self.github.api_base.starts_with("https://")
        {
            return Err(anyhow!("github.api_base must be an http(s) URL"));
        }
        if self.github.token_env.trim().is_empty() {
            return Err(anyhow!("github.token_env must not be empty"));
        }
        if self.github.timeout_secs == 0 {
            return Err(anyhow!("github.timeout_secs must be > 0"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.publish.branch_prefix.contains(char::is_whitespace) {
            return Err(anyhow!("publish.branch_prefix must not contain whitespace"));
        }
        if self.publish.fallback_branch.trim().is_empty() {
            return Err(anyhow!("publish.fallback_branch must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
