// evalctl-cli/src/main.rs
// ============================================================================
// Module: Eval Orchestrator CLI Entry Point
// Description: Command dispatcher for the evalctl use-case and model
//              evaluation workflow.
// Purpose: Provide operators and submitting teams a local front door onto
//          the orchestration core: create use cases, register models,
//          upload artifacts, inspect the task queue, and run the worker
//          pool that drains it.
// Dependencies: clap, evalctl-core, evalctl-store, evalctl-collab,
//               evalctl-tasks, serde_json, thiserror, tracing,
//               tracing-subscriber.
// ============================================================================

//! ## Overview
//! Every subcommand opens the same three things in the same order: a
//! validated [`evalctl_cli::config::EngineConfig`], a `SqliteStore`, and a
//! `Collaborators` bundle. `serve` then hands those to a `WorkerPool` and
//! blocks until interrupted; every other subcommand performs one
//! synchronous operation and exits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use evalctl_cli::config::EngineConfig;
use evalctl_collab::Collaborators;
use evalctl_core::{
    EngineError, ModelEvaluation, ModelEvaluationState, ModelId, ModelRepository, TaskQueue,
    UseCase, UseCaseId, UseCaseRepository, UseCaseState,
};
use evalctl_store::{SqliteStore, SqliteStoreConfig};
use evalctl_tasks::{
    get_upload_requirements, upload_config, upload_dataset, upload_predictions, WorkerPool,
    WorkerPoolConfig,
};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "evalctl", arg_required_else_help = true)]
struct Cli {
    /// Path to a TOML configuration file. Falls back to built-in defaults
    /// and environment overrides if omitted.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker pool until interrupted.
    Serve(ServeCommand),
    /// Use-case management.
    UseCase {
        /// Selected use-case subcommand.
        #[command(subcommand)]
        command: UseCaseCommand,
    },
    /// Model evaluation registration.
    Model {
        /// Selected model subcommand.
        #[command(subcommand)]
        command: ModelCommand,
    },
    /// Artifact uploads.
    Upload {
        /// Selected upload subcommand.
        #[command(subcommand)]
        command: UploadCommand,
    },
    /// Task queue inspection and maintenance.
    Task {
        /// Selected task subcommand.
        #[command(subcommand)]
        command: TaskCommand,
    },
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Number of worker threads, overriding the configured default.
    #[arg(long)]
    workers: Option<usize>,
}

/// Use-case subcommands.
#[derive(Subcommand, Debug)]
enum UseCaseCommand {
    /// Create a new use case awaiting its configuration upload.
    Create(UseCaseCreateCommand),
    /// Fetch one use case by id.
    Get(UseCaseIdArg),
    /// List use cases, optionally filtered by state.
    List(UseCaseListCommand),
}

/// Arguments for `use-case create`.
#[derive(Args, Debug)]
struct UseCaseCreateCommand {
    /// Human-readable name for the use case.
    #[arg(long)]
    name: String,
    /// Contact address for the submitting team.
    #[arg(long)]
    team_email: String,
}

/// Arguments identifying a single use case.
#[derive(Args, Debug)]
struct UseCaseIdArg {
    /// The use case's opaque identifier.
    #[arg(long)]
    id: String,
}

/// Arguments for `use-case list`.
#[derive(Args, Debug)]
struct UseCaseListCommand {
    /// Restrict the listing to a single lifecycle state, e.g.
    /// `AwaitingConfig`.
    #[arg(long)]
    state: Option<String>,
    /// Maximum number of rows to return.
    #[arg(long, default_value_t = 50)]
    limit: usize,
    /// Number of rows to skip.
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

/// Model subcommands.
#[derive(Subcommand, Debug)]
enum ModelCommand {
    /// Register a model evaluation against an existing use case.
    Register(ModelRegisterCommand),
}

/// Arguments for `model register`.
#[derive(Args, Debug)]
struct ModelRegisterCommand {
    /// The owning use case's identifier.
    #[arg(long)]
    use_case_id: String,
    /// Name of the model under evaluation.
    #[arg(long)]
    model_name: String,
    /// Version or checkpoint identifier of the model.
    #[arg(long)]
    version: String,
}

/// Upload subcommands.
#[derive(Subcommand, Debug)]
enum UploadCommand {
    /// Upload a use case's configuration file.
    Config(UploadConfigCommand),
    /// Upload a model's dataset.
    Dataset(UploadModelCommand),
    /// Upload a model's predictions.
    Predictions(UploadModelCommand),
    /// Report which artifacts are expected next.
    Requirements(UploadRequirementsCommand),
}

/// Arguments for `upload config`.
#[derive(Args, Debug)]
struct UploadConfigCommand {
    /// The owning use case's identifier.
    #[arg(long)]
    use_case_id: String,
    /// Path to the file to upload.
    #[arg(long)]
    file: PathBuf,
}

/// Arguments shared by `upload dataset` and `upload predictions`.
#[derive(Args, Debug)]
struct UploadModelCommand {
    /// The owning use case's identifier.
    #[arg(long)]
    use_case_id: String,
    /// The model's identifier.
    #[arg(long)]
    model_id: String,
    /// Path to the file to upload.
    #[arg(long)]
    file: PathBuf,
}

/// Arguments for `upload requirements`.
#[derive(Args, Debug)]
struct UploadRequirementsCommand {
    /// The owning use case's identifier.
    #[arg(long)]
    use_case_id: String,
    /// Optional model identifier to also report model-level requirements
    /// for.
    #[arg(long)]
    model_id: Option<String>,
}

/// Task subcommands.
#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// Report how many tasks sit in each status.
    List,
    /// Delete terminal tasks older than the given age.
    Cleanup {
        /// Age in days beyond which terminal tasks are eligible for
        /// deletion.
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper around any failure surfaced to the operator.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a message.
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<evalctl_cli::config::ConfigError> for CliError {
    fn from(err: evalctl_cli::config::ConfigError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<evalctl_store::SqliteStoreError> for CliError {
    fn from(err: evalctl_store::SqliteStoreError) -> Self {
        Self::new(err.to_string())
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    init_tracing(&config);

    let store_config = SqliteStoreConfig::new(config.database_path.clone());
    let store = SqliteStore::open(&store_config)?;
    let collaborators = Collaborators::with_builtins(&config.storage_root)?;

    match cli.command {
        Commands::Serve(command) => command_serve(&config, store, collaborators, command),
        Commands::UseCase { command } => command_use_case(&store, command),
        Commands::Model { command } => command_model(&store, command),
        Commands::Upload { command } => command_upload(&store, &collaborators, command),
        Commands::Task { command } => command_task(&store, command),
    }
}

/// Initializes the global `tracing` subscriber from the resolved
/// configuration.
fn init_tracing(config: &EngineConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    // A subscriber may already be installed under a test harness; that is
    // not an error worth surfacing to the operator.
    let _ = match config.log_format {
        evalctl_cli::config::LogFormat::Json => subscriber.json().try_init(),
        evalctl_cli::config::LogFormat::Text => subscriber.try_init(),
    };
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Runs the worker pool until interrupted with Ctrl-C.
fn command_serve(
    config: &EngineConfig,
    store: SqliteStore,
    collaborators: Collaborators,
    command: ServeCommand,
) -> CliResult<ExitCode> {
    let reenqueued = evalctl_store::reconcile_pending_work(&store)?;
    if reenqueued > 0 {
        tracing::info!(reenqueued, "reconciled pending work on startup");
    }

    let worker_count = command.workers.unwrap_or(config.worker_count);
    let pool_config = WorkerPoolConfig {
        worker_count,
        poll_interval: Duration::from_millis(config.worker_poll_interval_ms),
    };
    let store = Arc::new(store);
    let collaborators = Arc::new(collaborators);
    let pool = WorkerPool::spawn(Arc::clone(&store), Arc::clone(&collaborators), pool_config);

    ctrlc_channel().recv().map_err(|err| CliError::new(format!("signal channel closed: {err}")))?;
    tracing::info!("shutdown signal received, draining workers");
    pool.shutdown().map_err(|err| CliError::new(format!("worker pool shutdown failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Builds a channel that receives one message when the process is asked to
/// interrupt, so `serve` can block without busy-waiting.
fn ctrlc_channel() -> std::sync::mpsc::Receiver<()> {
    let (sender, receiver) = std::sync::mpsc::channel();
    // A full channel send means a previous signal is still being handled;
    // dropping the duplicate is fine, one shutdown request is enough.
    let handler = move || {
        let _ = sender.send(());
    };
    install_signal_handler(handler);
    receiver
}

/// Registers `handler` to run once on the process's interrupt signal. A
/// failure to install (a second handler already registered in-process) is
/// logged rather than treated as fatal, since `serve` is the only
/// subcommand that ever calls this.
fn install_signal_handler(handler: impl Fn() + Send + 'static) {
    if let Err(err) = ctrlc::set_handler(handler) {
        tracing::error!(error = %err, "failed to install interrupt handler");
    }
}

// ============================================================================
// SECTION: Use-Case Commands
// ============================================================================

/// Dispatches a `use-case` subcommand.
fn command_use_case(store: &SqliteStore, command: UseCaseCommand) -> CliResult<ExitCode> {
    match command {
        UseCaseCommand::Create(args) => command_use_case_create(store, &args),
        UseCaseCommand::Get(args) => command_use_case_get(store, &args),
        UseCaseCommand::List(args) => command_use_case_list(store, &args),
    }
}

/// Creates a new use case in `AWAITING_CONFIG`.
fn command_use_case_create(store: &SqliteStore, args: &UseCaseCreateCommand) -> CliResult<ExitCode> {
    let now = OffsetDateTime::now_utc();
    let use_case = UseCase {
        id: UseCaseId::new(),
        name: args.name.clone(),
        team_email: args.team_email.clone(),
        state: UseCaseState::AwaitingConfig,
        config_file_key: None,
        dataset_file_key: None,
        quality_issues: Vec::new(),
        evaluation_results: BTreeMap::new(),
        metadata: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    };
    UseCaseRepository::create(store, &use_case)?;
    print_json(&use_case)
}

/// Fetches and prints one use case.
fn command_use_case_get(store: &SqliteStore, args: &UseCaseIdArg) -> CliResult<ExitCode> {
    let use_case = UseCaseRepository::get(store, &UseCaseId::from_raw(args.id.clone()))?;
    print_json(&use_case)
}

/// Lists use cases, optionally filtered by state.
fn command_use_case_list(store: &SqliteStore, args: &UseCaseListCommand) -> CliResult<ExitCode> {
    let state = args.state.as_deref().map(parse_use_case_state).transpose()?;
    let use_cases = UseCaseRepository::list(store, state, args.limit, args.offset)?;
    print_json(&use_cases)
}

/// Parses a use-case state name supplied on the command line.
fn parse_use_case_state(name: &str) -> CliResult<UseCaseState> {
    serde_json::from_value(serde_json::Value::String(name.to_owned()))
        .map_err(|_| CliError::new(format!("unrecognized use-case state {name:?}")))
}

// ============================================================================
// SECTION: Model Commands
// ============================================================================

/// Dispatches a `model` subcommand.
fn command_model(store: &SqliteStore, command: ModelCommand) -> CliResult<ExitCode> {
    match command {
        ModelCommand::Register(args) => command_model_register(store, &args),
    }
}

/// Registers a new model evaluation in `REGISTERED`.
fn command_model_register(store: &SqliteStore, args: &ModelRegisterCommand) -> CliResult<ExitCode> {
    let use_case_id = UseCaseId::from_raw(args.use_case_id.clone());
    UseCaseRepository::get(store, &use_case_id)?;

    let now = OffsetDateTime::now_utc();
    let model = ModelEvaluation {
        id: ModelId::new(),
        use_case_id,
        model_name: args.model_name.clone(),
        version: args.version.clone(),
        current_state: ModelEvaluationState::Registered,
        dataset_file_key: None,
        predictions_file_key: None,
        quality_issues: Vec::new(),
        metadata: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    };
    ModelRepository::create(store, &model)?;
    print_json(&model)
}

// ============================================================================
// SECTION: Upload Commands
// ============================================================================

/// Dispatches an `upload` subcommand.
fn command_upload(
    store: &SqliteStore,
    collaborators: &Collaborators,
    command: UploadCommand,
) -> CliResult<ExitCode> {
    match command {
        UploadCommand::Config(args) => command_upload_config(store, collaborators, &args),
        UploadCommand::Dataset(args) => command_upload_dataset(store, collaborators, &args),
        UploadCommand::Predictions(args) => command_upload_predictions(store, collaborators, &args),
        UploadCommand::Requirements(args) => command_upload_requirements(store, &args),
    }
}

/// Reads the file named by `path`, mapping I/O failures to a [`CliError`].
fn read_upload_file(path: &PathBuf) -> CliResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| CliError::new(format!("failed to read {}: {err}", path.display())))
}

/// Executes `upload config`.
fn command_upload_config(
    store: &SqliteStore,
    collaborators: &Collaborators,
    args: &UploadConfigCommand,
) -> CliResult<ExitCode> {
    let bytes = read_upload_file(&args.file)?;
    let use_case_id = UseCaseId::from_raw(args.use_case_id.clone());
    let task_id = upload_config(store, collaborators, &use_case_id, &bytes)?;
    write_stdout_line(&format!("enqueued task {task_id}"))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `upload dataset`.
fn command_upload_dataset(
    store: &SqliteStore,
    collaborators: &Collaborators,
    args: &UploadModelCommand,
) -> CliResult<ExitCode> {
    let bytes = read_upload_file(&args.file)?;
    let use_case_id = UseCaseId::from_raw(args.use_case_id.clone());
    let model_id = ModelId::from_raw(args.model_id.clone());
    match upload_dataset(store, collaborators, &use_case_id, &model_id, &bytes)? {
        Some(task_id) => write_stdout_line(&format!("enqueued task {task_id}"))?,
        None => write_stdout_line("dataset replaced, quality check already pending")?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes `upload predictions`.
fn command_upload_predictions(
    store: &SqliteStore,
    collaborators: &Collaborators,
    args: &UploadModelCommand,
) -> CliResult<ExitCode> {
    let bytes = read_upload_file(&args.file)?;
    let use_case_id = UseCaseId::from_raw(args.use_case_id.clone());
    let model_id = ModelId::from_raw(args.model_id.clone());
    let task_id = upload_predictions(store, collaborators, &use_case_id, &model_id, &bytes)?;
    write_stdout_line(&format!("enqueued task {task_id}"))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `upload requirements`.
fn command_upload_requirements(
    store: &SqliteStore,
    args: &UploadRequirementsCommand,
) -> CliResult<ExitCode> {
    let use_case_id = UseCaseId::from_raw(args.use_case_id.clone());
    let model_id = args.model_id.as_ref().map(|id| ModelId::from_raw(id.clone()));
    let requirements = get_upload_requirements(store, &use_case_id, model_id.as_ref())?;
    print_json(&requirements)
}

// ============================================================================
// SECTION: Task Commands
// ============================================================================

/// Dispatches a `task` subcommand.
fn command_task(store: &SqliteStore, command: TaskCommand) -> CliResult<ExitCode> {
    match command {
        TaskCommand::List => {
            let stats = TaskQueue::queue_stats(store)?;
            print_json(&stats)
        }
        TaskCommand::Cleanup { older_than_days } => {
            let deleted = TaskQueue::cleanup(store, older_than_days)?;
            write_stdout_line(&format!("deleted {deleted} terminal tasks"))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Prints a value as pretty-printed JSON to stdout.
fn print_json(value: &impl serde::Serialize) -> CliResult<ExitCode> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to render output: {err}")))?;
    write_stdout_line(&rendered)?;
    Ok(ExitCode::SUCCESS)
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    use std::io::Write;
    writeln!(std::io::stdout(), "{message}")
        .map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    writeln!(std::io::stderr(), "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
