//! Prompt-to-pull-request generator.
//!
//! Turns a natural-language request into node and workflow files for a
//! low-code automation repository, validates them against the repository's
//! layout and backward-compatibility rules, and opens a pull request.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use nodeforge::core::request::response_schema;
use nodeforge::exit_codes;
use nodeforge::io::config::{CONFIG_FILE, ForgeConfig, load_config, write_config};
use nodeforge::io::context::{RepoContext, fetch_prior_snapshot, fetch_repo_context};
use nodeforge::io::generator::{CommandGenerator, parse_response};
use nodeforge::io::github::{GitHubClient, GitHost, LocalRepo, RepoReader, RepoSlug};
use nodeforge::io::run_log::{RunLog, new_run_id};
use nodeforge::logging;
use nodeforge::pipeline::{
    PipelineDeps, PipelineError, PipelineRequest, SavedChangeSet, check_response, plan,
    request_for, revalidate, run_pipeline,
};
use nodeforge::publish::{PublishOptions, publish};

#[derive(Parser)]
#[command(
    name = "nodeforge",
    version,
    about = "Generate node and workflow changes from a prompt and open them as a pull request"
)]
struct Cli {
    /// Config file.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Check config and repository access, and summarize the repository.
    Check {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Print the NEW/UPDATE decision for a request.
    Reconcile {
        request: String,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Print the generation request for a request.
    Prompt {
        request: String,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Validate a saved generator response and print the change set.
    Validate {
        request: String,
        /// Generator response (JSON, optionally fenced).
        #[arg(long)]
        response: PathBuf,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Generate, validate and publish.
    Run {
        request: String,
        /// Stop after validation; nothing is written to the repository.
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Publish a saved change set.
    Publish {
        /// `changeset.json` from a previous run.
        #[arg(long)]
        change_set: PathBuf,
        #[command(flatten)]
        repo: RepoArgs,
    },
}

/// Where the target repository is and any caller context overriding it.
#[derive(Args, Debug, Clone, Default)]
struct RepoArgs {
    /// Target repository (`owner/name` or URL).
    #[arg(long)]
    repo: Option<String>,
    /// Token for the target repository; defaults to the configured env var.
    #[arg(long)]
    token: Option<String>,
    /// Read repository context from a local checkout instead of the API.
    #[arg(long)]
    repo_dir: Option<PathBuf>,
    /// `package.json` to use instead of the repository's.
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Id-to-label mapping (JSON object or `id: label` lines).
    #[arg(long)]
    id_mapping: Option<PathBuf>,
    /// Additional existing identifiers (`name`, `name@1.0.2`, `workflow:name`).
    #[arg(long, value_delimiter = ',')]
    existing: Vec<String>,
    /// Name for the artifact, overriding the one derived from the request.
    #[arg(long)]
    name: Option<String>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let load = || load_config(&cli.config);
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Check { repo } => cmd_check(&load()?, &repo),
        Command::Reconcile { request, repo } => cmd_reconcile(&load()?, &repo, &request),
        Command::Prompt { request, repo } => cmd_prompt(&load()?, &repo, &request),
        Command::Validate {
            request,
            response,
            repo,
        } => cmd_validate(&load()?, &repo, &request, &response),
        Command::Run {
            request,
            dry_run,
            repo,
        } => cmd_run(&load()?, &repo, &request, dry_run),
        Command::Publish { change_set, repo } => cmd_publish(&load()?, &repo, &change_set),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ForgeConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(config: &ForgeConfig, args: &RepoArgs) -> Result<i32> {
    let target = Target::open(config, args)?;
    target
        .reader()
        .check_access()
        .map_err(|err| anyhow!("repository is not readable: {err}"))?;
    let context = load_context(args, target.reader())?;
    println!("existing artifacts: {}", context.existing.len());
    println!(
        "package.json: {}",
        if context.manifest.is_some() { "found" } else { "missing" }
    );
    println!(
        "labels: {}",
        context.id_mapping.as_deref().map_or(0, |raw| raw.lines().count())
    );
    Ok(exit_codes::OK)
}

fn cmd_reconcile(config: &ForgeConfig, args: &RepoArgs, request: &str) -> Result<i32> {
    let target = Target::open(config, args)?;
    let context = load_context(args, target.reader())?;
    let plan = match plan(&context, request, args.name.as_deref(), &config.policy) {
        Ok(plan) => plan,
        Err(err) => return Ok(report_failure(&PipelineError::Reconcile(err))),
    };
    print_json(&json!({
        "policy": plan.reconciliation.policy,
        "artifacts": plan.artifacts(),
    }))?;
    Ok(exit_codes::OK)
}

fn cmd_prompt(config: &ForgeConfig, args: &RepoArgs, request: &str) -> Result<i32> {
    let target = Target::open(config, args)?;
    let context = load_context(args, target.reader())?;
    let plan = match plan(&context, request, args.name.as_deref(), &config.policy) {
        Ok(plan) => plan,
        Err(err) => return Ok(report_failure(&PipelineError::Reconcile(err))),
    };
    let generation = request_for(&plan, request, context.manifest.as_deref())?;
    println!("{}", generation.render());
    Ok(exit_codes::OK)
}

fn cmd_validate(
    config: &ForgeConfig,
    args: &RepoArgs,
    request: &str,
    response_path: &Path,
) -> Result<i32> {
    let target = Target::open(config, args)?;
    let context = load_context(args, target.reader())?;
    let plan = match plan(&context, request, args.name.as_deref(), &config.policy) {
        Ok(plan) => plan,
        Err(err) => return Ok(report_failure(&PipelineError::Reconcile(err))),
    };
    let raw = read_text(response_path)?;
    let response = match parse_response(&raw, &response_schema()) {
        Ok(response) => response,
        Err(err) => return Ok(report_failure(&PipelineError::Generation(err))),
    };
    let prior = fetch_prior_snapshot(target.reader(), plan.artifacts())
        .map_err(|err| anyhow!("read current artifact files: {err}"))?;
    match check_response(
        &plan,
        &response,
        context.manifest.as_deref(),
        &prior,
        &config.publish.title_prefix,
    ) {
        Ok(change_set) => {
            print_json(&change_set)?;
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprint!("{}", err.report());
            Ok(exit_codes::VALIDATION)
        }
    }
}

fn cmd_run(config: &ForgeConfig, args: &RepoArgs, request: &str, dry_run: bool) -> Result<i32> {
    let target = Target::open(config, args)?;
    let host = if dry_run {
        None
    } else {
        Some(target.host()?)
    };
    let context = load_context(args, target.reader())?;

    let run_id = new_run_id();
    let log = RunLog::create(&config.runs_dir, &run_id)?;
    eprintln!("run {run_id}: {}", log.paths().dir.display());
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let generator = CommandGenerator::new(
        config.generator.clone(),
        workdir,
        log.paths().dir.join("scratch"),
    )
    .with_run_log(log.clone());

    let outcome = run_pipeline(
        &PipelineRequest {
            request: request.to_string(),
            name_hint: args.name.clone(),
            context,
        },
        config,
        &PipelineDeps {
            generator: &generator,
            reader: target.reader(),
            host,
            run_log: Some(&log),
        },
    );
    match outcome {
        Ok(outcome) => {
            match &outcome.published {
                Some(report) => println!("{}", report.pull_request.url),
                None => {
                    for file in &outcome.change_set.files {
                        println!("{}", file.path);
                    }
                }
            }
            Ok(exit_codes::OK)
        }
        Err(err) => Ok(report_failure(&err)),
    }
}

fn cmd_publish(config: &ForgeConfig, args: &RepoArgs, path: &Path) -> Result<i32> {
    let raw = read_text(path)?;
    let saved: SavedChangeSet =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    if saved.files.is_empty() {
        bail!("{} contains no files", path.display());
    }
    let target = Target::open(config, args)?;
    let context = load_context(args, target.reader())?;
    let change_set = match revalidate(saved, &context, target.reader(), config) {
        Ok(change_set) => change_set,
        Err(err) => return Ok(report_failure(&err)),
    };
    let options = PublishOptions {
        branch_prefix: config.publish.branch_prefix.clone(),
        title_prefix: config.publish.title_prefix.clone(),
        fallback_branch: config.publish.fallback_branch.clone(),
    };
    match publish(target.host()?, &change_set, &options) {
        Ok(report) => {
            println!("{}", report.pull_request.url);
            Ok(exit_codes::OK)
        }
        Err(err) => Ok(report_failure(&PipelineError::Publish(err))),
    }
}

/// Repository the command reads from and, when a slug is given, writes to.
struct Target {
    reader: Box<dyn RepoReader>,
    client: Option<GitHubClient>,
}

impl Target {
    fn open(config: &ForgeConfig, args: &RepoArgs) -> Result<Self> {
        let client = match &args.repo {
            Some(repo) => {
                let slug = RepoSlug::parse(repo)?;
                let token = match &args.token {
                    Some(token) => token.clone(),
                    None => std::env::var(&config.github.token_env).with_context(|| {
                        format!("{} is not set and --token was not given", config.github.token_env)
                    })?,
                };
                debug!(repo = %slug, "using GitHub repository");
                Some(GitHubClient::new(
                    &config.github.api_base,
                    slug,
                    token,
                    config.github.timeout(),
                ))
            }
            None => None,
        };
        let reader: Box<dyn RepoReader> = match (&args.repo_dir, &client) {
            (Some(dir), _) => Box::new(LocalRepo::new(dir.clone())),
            (None, Some(client)) => Box::new(client.clone()),
            (None, None) => Box::new(LocalRepo::new(PathBuf::from("."))),
        };
        Ok(Self { reader, client })
    }

    fn reader(&self) -> &dyn RepoReader {
        self.reader.as_ref()
    }

    fn host(&self) -> Result<&dyn GitHost> {
        self.client
            .as_ref()
            .map(|client| client as &dyn GitHost)
            .ok_or_else(|| anyhow!("--repo is required to publish"))
    }
}

fn load_context(args: &RepoArgs, reader: &dyn RepoReader) -> Result<RepoContext> {
    let fetched =
        fetch_repo_context(reader).map_err(|err| anyhow!("read repository context: {err}"))?;
    let manifest = args.manifest.as_deref().map(read_text).transpose()?;
    let id_mapping = args.id_mapping.as_deref().map(read_text).transpose()?;
    Ok(fetched.with_overrides(manifest, id_mapping, args.existing.clone()))
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize json")?
    );
    Ok(())
}

fn report_failure(err: &PipelineError) -> i32 {
    match err {
        PipelineError::Validation(validation) => eprint!("{}", validation.report()),
        other => eprintln!("{other:#}"),
    }
    err.exit_code()
}
