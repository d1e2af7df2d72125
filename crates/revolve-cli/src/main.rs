// crates/revolve-cli/src/main.rs
// ============================================================================
// Module: Revolve CLI Entry Point
// Description: Command dispatcher for administering the policy evolution
// workspace: inspecting and driving rollout state, bootstrapping the first
// active policy, resolving the policy for a run context, and feeding a run
// signal through the Learning Controller offline.
// Dependencies: clap, revolve-core, revolve-store, revolve-runtime,
// revolve-evolution, revolve-rollout, revolve-controller, revolve-config,
// serde_json, thiserror, tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! Every subcommand opens a fresh [`FsArtifactStore`] rooted at
//! `--store-root` (or the configured `store.root_dir`) and a
//! [`RevolveConfig`] loaded from `--config` (or the usual resolution order),
//! then performs exactly one operation before exiting. There is no daemon
//! mode; the Learning Controller's `on_run_completed` hook is meant to be
//! called in-process by the run path, and `revolve ingest` exists to drive
//! that same hook offline for operators and tests.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use revolve_config::RevolveConfig;
use revolve_controller::LearningController;
use revolve_controller::LearningOutcome;
use revolve_core::Policy;
use revolve_core::RunSignal;
use revolve_core::identifiers::PolicyId;
use revolve_core::identifiers::ProjectId;
use revolve_core::identifiers::RunId;
use revolve_core::identifiers::TaskId;
use revolve_core::identifiers::UserId;
use revolve_evolution::EvolutionError;
use revolve_evolution::ShadowRunOutcome;
use revolve_evolution::ShadowRunner;
use revolve_rollout::RolloutManager;
use revolve_rollout::RunContext;
use revolve_rollout::pick_policy;
use revolve_runtime::SignalCollector;
use revolve_runtime::signal_collector::DEFAULT_MAX_SIGNALS;
use revolve_store::FsArtifactStore;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a JSON input file this CLI will read.
const MAX_INPUT_BYTES: u64 = 8 * 1024 * 1024;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "revolve", disable_help_subcommand = true)]
struct Cli {
    /// Root directory of the artifact store (overrides `store.root_dir`).
    #[arg(long, value_name = "DIR", global = true)]
    store_root: Option<PathBuf>,
    /// Config file path (defaults to `revolve.toml` or `REVOLVE_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolves the policy id a run context would be routed to.
    PickPolicy(PickPolicyCommand),
    /// Shows the current rollout state, if any.
    RolloutStatus,
    /// Bootstraps the registry's active version from a policy JSON file.
    Bootstrap(BootstrapCommand),
    /// Feeds a run signal through the Learning Controller's completion hook.
    Ingest(IngestCommand),
    /// Forces an in-progress rollout to roll back, regardless of KPIs.
    Rollback,
    /// Clears any in-progress rollout and returns to idle on `--active`.
    ResetToIdle(ResetToIdleCommand),
}

/// Arguments for `pick-policy`.
#[derive(Args, Debug)]
struct PickPolicyCommand {
    /// External task identifier (highest routing priority).
    #[arg(long, value_name = "TASK_ID")]
    task_id: Option<String>,
    /// Run identifier (second routing priority).
    #[arg(long, value_name = "RUN_ID")]
    run_id: Option<String>,
    /// External project identifier.
    #[arg(long, value_name = "PROJECT_ID")]
    project_id: Option<String>,
    /// External user identifier, paired with `--project-id`.
    #[arg(long, value_name = "USER_ID")]
    user_id: Option<String>,
    /// Policy id to fall back to if no rollout has ever started.
    #[arg(long, value_name = "POLICY_ID")]
    default_active: String,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// Arguments for `bootstrap`.
#[derive(Args, Debug)]
struct BootstrapCommand {
    /// Path to a JSON-encoded `Policy`.
    #[arg(long, value_name = "PATH")]
    policy: PathBuf,
}

/// Arguments for `ingest`.
#[derive(Args, Debug)]
struct IngestCommand {
    /// Path to a JSON-encoded `RunSignal`.
    #[arg(long, value_name = "PATH")]
    signal: PathBuf,
    /// Output format for the resulting outcome.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// Arguments for `reset-to-idle`.
#[derive(Args, Debug)]
struct ResetToIdleCommand {
    /// Policy id to become the sole active policy.
    #[arg(long, value_name = "POLICY_ID")]
    active: String,
}

/// Output formats for CLI commands.
#[derive(ValueEnum, Copy, Clone, Debug)]
enum OutputFormat {
    /// Canonical pretty-printed JSON output.
    Json,
    /// Human-readable single-line text output.
    Text,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for command-dispatch failures.
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

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = RevolveConfig::load(cli.config.as_deref()).map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    let store_root = cli.store_root.unwrap_or_else(|| PathBuf::from(&config.store.root_dir));
    let store = FsArtifactStore::open(&store_root).map_err(|err| CliError::new(format!("failed to open store at {}: {err}", store_root.display())))?;

    match cli.command {
        Commands::PickPolicy(command) => command_pick_policy(&store, &config, command),
        Commands::RolloutStatus => command_rollout_status(&store),
        Commands::Bootstrap(command) => command_bootstrap(&store, &config, command),
        Commands::Ingest(command) => command_ingest(&store, &config, command),
        Commands::Rollback => command_rollback(&store),
        Commands::ResetToIdle(command) => command_reset_to_idle(&store, &config, command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `pick-policy`.
fn command_pick_policy(store: &FsArtifactStore, config: &RevolveConfig, command: PickPolicyCommand) -> CliResult<()> {
    let ctx = RunContext {
        task_id: command.task_id.map(TaskId::new),
        run_id: command.run_id.map(RunId::new),
        project_id: command.project_id.map(ProjectId::new),
        user_id: command.user_id.map(UserId::new),
    };
    let default_active = PolicyId::new(command.default_active);
    let active_override = config.router.active_policy_override.clone().map(PolicyId::new);
    let resolved = pick_policy(store, &ctx, active_override.as_ref(), &|| default_active.clone())
        .map_err(|err| CliError::new(format!("pick_policy failed: {err}")))?;
    match command.format {
        OutputFormat::Json => write_json(&serde_json::json!({ "policy_id": resolved.as_str() }))?,
        OutputFormat::Text => write_stdout_line(resolved.as_str())?,
    }
    Ok(())
}

/// Executes `rollout-status`.
fn command_rollout_status(store: &FsArtifactStore) -> CliResult<()> {
    let rollout = RolloutManager::new(store);
    let state = rollout.current().map_err(|err| CliError::new(format!("failed to read rollout state: {err}")))?;
    match state {
        Some(state) => write_json(&state),
        None => write_stdout_line("no rollout has ever started"),
    }
}

/// Executes `bootstrap`.
fn command_bootstrap(store: &FsArtifactStore, config: &RevolveConfig, command: BootstrapCommand) -> CliResult<()> {
    let bytes = read_bytes_with_limit(&command.policy, MAX_INPUT_BYTES)?;
    let policy: Policy = serde_json::from_slice(&bytes).map_err(|err| CliError::new(format!("failed to parse policy JSON: {err}")))?;
    let controller = LearningController::new(store, config.clone());
    let state = controller.bootstrap_active_policy(&policy).map_err(|err| CliError::new(format!("bootstrap failed: {err}")))?;
    write_json(&state)
}

/// Executes `ingest`.
fn command_ingest(store: &FsArtifactStore, config: &RevolveConfig, command: IngestCommand) -> CliResult<()> {
    let bytes = read_bytes_with_limit(&command.signal, MAX_INPUT_BYTES)?;
    let signal: RunSignal = serde_json::from_slice(&bytes).map_err(|err| CliError::new(format!("failed to parse run signal JSON: {err}")))?;

    let collector = SignalCollector::new(store, DEFAULT_MAX_SIGNALS);
    collector.persist(&signal).map_err(|err| CliError::new(format!("failed to persist run signal: {err}")))?;

    let controller = LearningController::new(store, config.clone());
    let runner = PassthroughRunner;
    let outcome = controller.on_run_completed(&signal, &runner, &runner);
    match command.format {
        OutputFormat::Json => write_json(&outcome_json(&outcome))?,
        OutputFormat::Text => write_stdout_line(&outcome_text(&outcome))?,
    }
    Ok(())
}

/// Executes `rollback`.
fn command_rollback(store: &FsArtifactStore) -> CliResult<()> {
    let rollout = RolloutManager::new(store);
    let state = rollout.force_rollback().map_err(|err| CliError::new(format!("rollback failed: {err}")))?;
    write_json(&state)
}

/// Executes `reset-to-idle`.
fn command_reset_to_idle(store: &FsArtifactStore, config: &RevolveConfig, command: ResetToIdleCommand) -> CliResult<()> {
    let controller = LearningController::new(store, config.clone());
    let state = controller.reset_to_idle(PolicyId::new(command.active)).map_err(|err| CliError::new(format!("reset_to_idle failed: {err}")))?;
    write_json(&state)
}

// ============================================================================
// SECTION: Shadow runner
// ============================================================================

/// A runner that treats the run signal's own recorded outcome as the shadow
/// outcome, used by `ingest` since there is no live policy interpreter to
/// invoke offline. Passing it as both the active and candidate runner means
/// every aggregate comparison the gate sees is identical; this is accepted
/// here because `ingest` is an offline replay tool, not the production
/// shadow-evaluation path.
struct PassthroughRunner;

impl ShadowRunner for PassthroughRunner {
    fn run(&self, signal: &RunSignal) -> Result<ShadowRunOutcome, EvolutionError> {
        Ok(ShadowRunOutcome {
            decision_code: 0,
            cost_usd: signal.cost_usd,
            latency_ms: signal.latency_ms as f64,
            success: signal.run_success,
            evidence_pass: signal.evidence_usage_rate >= 0.5,
        })
    }
}

// ============================================================================
// SECTION: Output rendering
// ============================================================================

/// Renders a [`LearningOutcome`] as a JSON value for `--format json`.
fn outcome_json(outcome: &LearningOutcome) -> serde_json::Value {
    match outcome {
        LearningOutcome::RolloutChecked { state } => serde_json::json!({ "outcome": "rollout_checked", "state": state }),
        LearningOutcome::Skipped { reason } => serde_json::json!({ "outcome": "skipped", "reason": reason }),
        LearningOutcome::SkippedIdenticalVersion { policy_version } => {
            serde_json::json!({ "outcome": "skipped_identical_version", "policy_version": policy_version })
        }
        LearningOutcome::Promoted { policy_version, state } => {
            serde_json::json!({ "outcome": "promoted", "policy_version": policy_version, "state": state })
        }
        LearningOutcome::Blocked { policy_version, reasons } => {
            serde_json::json!({ "outcome": "blocked", "policy_version": policy_version, "reasons": reasons })
        }
        LearningOutcome::Failed { reason } => serde_json::json!({ "outcome": "failed", "reason": reason }),
    }
}

/// Renders a [`LearningOutcome`] as a single human-readable line.
fn outcome_text(outcome: &LearningOutcome) -> String {
    match outcome {
        LearningOutcome::RolloutChecked { state } => format!("rollout checked: stage={:?}", state.stage),
        LearningOutcome::Skipped { reason } => format!("skipped: {reason}"),
        LearningOutcome::SkippedIdenticalVersion { policy_version } => {
            format!("skipped: trained policy version {policy_version} matched the active version")
        }
        LearningOutcome::Promoted { policy_version, state } => {
            format!("promoted policy version {policy_version}: stage={:?}", state.stage)
        }
        LearningOutcome::Blocked { policy_version, reasons } => {
            format!("blocked policy version {policy_version}: {}", reasons.join("; "))
        }
        LearningOutcome::Failed { reason } => format!("failed: {reason}"),
    }
}

// ============================================================================
// SECTION: I/O helpers
// ============================================================================

/// An error reading an input file under its size limit.
#[derive(Debug, Error)]
enum ReadLimitError {
    /// The file could not be opened, read, or stat'd.
    #[error("{0}")]
    Io(std::io::Error),
    /// The file exceeded `limit` bytes.
    #[error("file is {size} bytes, exceeding the {limit}-byte limit")]
    TooLarge {
        /// The file's actual size.
        size: u64,
        /// The configured limit.
        limit: u64,
    },
}

/// Reads `path` into memory, refusing files larger than `limit` bytes.
fn read_bytes_with_limit(path: &Path, limit: u64) -> CliResult<Vec<u8>> {
    let metadata = fs::metadata(path).map_err(ReadLimitError::Io).map_err(|err| CliError::new(format!("failed to stat {}: {err}", path.display())))?;
    if metadata.len() > limit {
        return Err(CliError::new(ReadLimitError::TooLarge { size: metadata.len(), limit }.to_string()));
    }
    fs::read(path).map_err(|err| CliError::new(format!("failed to read {}: {err}", path.display())))
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}").map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Writes a value as pretty-printed JSON to stdout.
fn write_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|err| CliError::new(format!("failed to serialize output: {err}")))?;
    write_stdout_line(&text)
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
