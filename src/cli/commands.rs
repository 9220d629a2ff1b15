//! CLI command definitions for reprobench.
//!
//! Three commands mirror the three phases of the pipeline: `reproduce` runs a
//! submission in a sandbox and collects its artifacts, `grade` scores an
//! artifact tree against a rubric, and `evaluate` compares a graded tree
//! against ground truth.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::grading::judge::{create_judge, JudgeConfig, JudgeKind};
use crate::grading::{artifact_listing, evaluate, Grader};
use crate::llm::{LlmClient, ReasoningEffort};
use crate::reproduce::{ReproductionConfig, ReproductionRunner};
use crate::rubric::TaskTree;
use crate::sandbox::{DockerSandbox, LocalExecutor, RemoteExecutor, SandboxConfig};
use crate::transfer::DEFAULT_MAX_FILE_BYTES;

/// Default judge model.
const DEFAULT_MODEL: &str = "openai/gpt-5.2";

/// Default output directory for reproduction runs.
const DEFAULT_OUTPUT_DIR: &str = "./reprobench-output";

/// Reproduction and rubric-grading harness for AI-agent submissions.
#[derive(Parser)]
#[command(name = "reprobench")]
#[command(about = "Run AI-agent submissions in a sandbox and grade the artifacts")]
#[command(version)]
#[command(
    long_about = "reprobench executes agent submissions inside an isolated sandbox, collects \
the resulting artifacts through a size-bounded archive protocol, and grades them against \
hierarchical rubrics.\n\nExample usage:\n  reprobench reproduce --submission ./submission --output ./run-1\n  reprobench grade --rubric rubric.json --artifacts ./run-1/submission --output graded.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a submission's entrypoint in a sandbox and collect its artifacts.
    #[command(alias = "run")]
    Reproduce(ReproduceArgs),

    /// Grade an artifact tree against a rubric.
    Grade(GradeArgs),

    /// Compare a graded rubric tree against ground truth.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),
}

/// Arguments for `reprobench reproduce`.
#[derive(Parser, Debug)]
pub struct ReproduceArgs {
    /// Directory holding the submission to run.
    #[arg(short, long)]
    pub submission: PathBuf,

    /// Output directory for collected artifacts and the run record.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Entrypoint script, relative to the submission root.
    #[arg(long, default_value = "reproduce.sh")]
    pub entrypoint: String,

    /// Wall-clock limit in seconds (default: 7 days).
    #[arg(long, default_value = "604800")]
    pub timeout_secs: u64,

    /// Restart the entrypoint if its log grows by nothing for this long.
    #[arg(long, default_value = "3600")]
    pub retry_threshold_secs: u64,

    /// Seconds between observations of the running entrypoint.
    #[arg(long, default_value = "15")]
    pub poll_interval_secs: u64,

    /// Command run in the sandbox before the submission is uploaded.
    /// May be given multiple times; commands run in order. When omitted,
    /// the default verifies the archive tooling (tar, gzip, find) and
    /// installs it if missing.
    #[arg(long = "install")]
    pub install_commands: Vec<String>,

    /// Per-file size threshold in bytes for artifact collection.
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_BYTES)]
    pub max_file_bytes: u64,

    /// Docker image for the sandbox.
    #[arg(long, default_value = "python:3.12-slim")]
    pub image: String,

    /// Memory limit for the sandbox container.
    #[arg(long, default_value = "16g")]
    pub memory: String,

    /// Run on the local host instead of a Docker sandbox. No isolation;
    /// development only.
    #[arg(long)]
    pub local: bool,
}

/// Arguments for `reprobench grade`.
#[derive(Parser, Debug)]
pub struct GradeArgs {
    /// Rubric JSON file.
    #[arg(short, long)]
    pub rubric: PathBuf,

    /// Directory of collected artifacts to grade.
    #[arg(short, long)]
    pub artifacts: PathBuf,

    /// Where to write the graded rubric tree.
    #[arg(short, long, default_value = "graded.json")]
    pub output: PathBuf,

    /// Judge implementation to use.
    #[arg(short, long, value_enum, default_value = "dummy")]
    pub judge: JudgeKind,

    /// Backing model for the simple judge.
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Reasoning effort for models that support it.
    #[arg(long, value_enum)]
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Grade from code alone, without reproduction run output.
    #[arg(long)]
    pub code_only: bool,

    /// The agent was given the paper's reference resources.
    #[arg(long)]
    pub resources_provided: bool,

    /// Cap on prior sibling scores shown to the judge per leaf.
    #[arg(long)]
    pub max_prior_nodes: Option<usize>,

    /// Subject identifier; registered subjects override --max-prior-nodes.
    #[arg(long)]
    pub subject: Option<String>,

    /// API key for the judge model (can also be set via REPROBENCH_API_KEY).
    #[arg(long, env = "REPROBENCH_API_KEY")]
    pub api_key: Option<String>,
}

/// Arguments for `reprobench evaluate`.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Graded rubric tree to evaluate.
    #[arg(short, long)]
    pub predicted: PathBuf,

    /// Ground-truth rubric tree of the same shape.
    #[arg(short, long)]
    pub expected: PathBuf,

    /// Where to write the evaluation report; stdout if omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Parse CLI arguments without running the command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Reproduce(args) => run_reproduce_command(args).await,
        Commands::Grade(args) => run_grade_command(args).await,
        Commands::Evaluate(args) => run_evaluate_command(args).await,
    }
}

async fn run_reproduce_command(args: ReproduceArgs) -> anyhow::Result<()> {
    if !args.submission.is_dir() {
        return Err(anyhow::anyhow!(
            "Submission directory does not exist: {}",
            args.submission.display()
        ));
    }
    let entrypoint = args.submission.join(&args.entrypoint);
    if !entrypoint.is_file() {
        return Err(anyhow::anyhow!(
            "Submission has no entrypoint: {}",
            entrypoint.display()
        ));
    }

    let mut config = ReproductionConfig::new()
        .with_timeout(Duration::from_secs(args.timeout_secs))
        .with_retry_threshold(Duration::from_secs(args.retry_threshold_secs))
        .with_poll_interval(Duration::from_secs(args.poll_interval_secs))
        .with_entrypoint(args.entrypoint)
        .with_max_file_bytes(args.max_file_bytes);
    if !args.install_commands.is_empty() {
        config = config.with_install_commands(args.install_commands);
    }
    let runner = ReproductionRunner::new(config);

    let output = if args.local {
        let exec = LocalExecutor::default();
        runner.run(&exec, &args.submission, &args.output).await?
    } else {
        let sandbox_config = SandboxConfig::new()
            .with_image(args.image)
            .with_memory(args.memory);
        let submission_id = args
            .submission
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "submission".to_string());
        let sandbox = DockerSandbox::start(&submission_id, sandbox_config).await?;
        let result = runner
            .run(&sandbox as &dyn RemoteExecutor, &args.submission, &args.output)
            .await;
        sandbox.destroy().await;
        result?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    if !output.success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_grade_command(args: GradeArgs) -> anyhow::Result<()> {
    if !args.artifacts.is_dir() {
        return Err(anyhow::anyhow!(
            "Artifact directory does not exist: {}",
            args.artifacts.display()
        ));
    }
    let mut tree = TaskTree::from_json_file(&args.rubric)?;

    let judge_config = JudgeConfig {
        model: args.model,
        reasoning_effort: args.reasoning_effort,
        code_only: args.code_only,
        resources_provided: args.resources_provided,
        max_prior_nodes: args.max_prior_nodes,
    };
    let client = args.api_key.map(|key| {
        let api_base = std::env::var("REPROBENCH_API_BASE")
            .unwrap_or_else(|_| crate::llm::DEFAULT_API_BASE.to_string());
        Arc::new(LlmClient::new(api_base, key))
    });
    let judge = create_judge(args.judge, judge_config.clone(), client)?;

    let mut grader = Grader::new(judge).with_max_prior_nodes(judge_config.max_prior_nodes);
    if let Some(subject) = &args.subject {
        grader = grader.for_subject(subject);
    }

    let summary = grader
        .grade(&mut tree, &artifact_listing(&args.artifacts))
        .await;
    info!(
        graded = summary.graded,
        errors = summary.errors.len(),
        "Grading finished"
    );
    for error in &summary.errors {
        tracing::warn!(node = %error.id, message = %error.message, "Leaf not graded");
    }
    tree.rollup_mean();

    let json = serde_json::to_string_pretty(&tree.to_spec())?;
    std::fs::write(&args.output, json)?;
    info!(output = %args.output.display(), "Graded tree written");
    Ok(())
}

async fn run_evaluate_command(args: EvaluateArgs) -> anyhow::Result<()> {
    let predicted = TaskTree::from_json_file(&args.predicted)?;
    let expected = TaskTree::from_json_file(&args.expected)?;

    let report = evaluate(&predicted, &expected)?;
    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json)?;
            info!(output = %path.display(), "Evaluation report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
