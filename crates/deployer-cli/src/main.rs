// crates/deployer-cli/src/main.rs
// ============================================================================
// Crate: deployer-cli (binary: orgaform)
// Description: Command-line entry point wiring deployer-config, -core,
// -engines, and -state into the six normative subcommands.
// Purpose: Thin command dispatch over `pipeline::build_pipeline` and
// `deployer_core::scheduler::run`; all orchestration logic lives in the
// library modules below.
// Dependencies: clap, deployer_config, deployer_core, deployer_engines,
// deployer_state, thiserror, time, tokio, tracing, tracing-subscriber
// ============================================================================

// ============================================================================
// SECTION: Modules
// ============================================================================

mod error;
mod inventory_source;
mod output;
mod pipeline;
mod routing;
mod scope_filter;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use std::time::Instant;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use deployer_core::Action;
use deployer_core::CancellationStage;
use deployer_core::CurrentState;
use deployer_core::DeploymentKey;
use deployer_core::InventoryCache;
use deployer_core::SchedulerConfig;
use deployer_core::StepRunRecord;
use deployer_core::StepState;
use deployer_core::TargetState;
use deployer_config::PackageDefinition;
use deployer_engines::TokioProcessRunner;
use deployer_state::CheckpointSchedule;
use deployer_state::ObjectStore;
use deployer_state::object_store_for_location;
use deployer_state::save_state;
use serde::Serialize;

use crate::error::CliError;
use crate::error::CliResult;
use crate::inventory_source::FileInventorySource;
use crate::output::ListOutput;
use crate::output::RunOutput;
use crate::output::StepOutputRecord;
use crate::output::write_output_file;
use crate::pipeline::PipelineOptions;
use crate::pipeline::build_pipeline;
use crate::scope_filter::ScopeFilterArgs;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Multi-account infrastructure deployer.
#[derive(Parser, Debug)]
#[command(name = "orgaform", disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Normative subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump the inventory snapshot.
    Orga(CommonArgs),
    /// Reconcile targets against current state; invoke no engine.
    List(RunArgs),
    /// Reconcile and preview engine actions without mutating resources.
    Preview(RunArgs),
    /// Reconcile and execute engine actions.
    Apply(RunArgs),
    /// Rewrite `ModuleHash` in persisted state without executing.
    UpdateHash(RunArgs),
    /// Drop state entries whose account or region is no longer active.
    RemoveOrphans(CommonArgs),
}

/// Flags common to every subcommand.
#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Path to the package definition file.
    #[arg(long, value_name = "PATH")]
    package_file: PathBuf,
    /// Path to the JSON-encoded inventory snapshot the file-backed
    /// `InventorySource` reads.
    #[arg(long, value_name = "PATH")]
    inventory_file: PathBuf,
    /// Path to write the machine-readable output document; stdout if
    /// omitted.
    #[arg(long, value_name = "PATH")]
    output_file: Option<PathBuf>,
    /// Directory engines may use for their own cache state; the system
    /// temp directory if omitted.
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,
    /// Force an inventory refresh even if the cached snapshot is within
    /// its TTL.
    #[arg(long, action = ArgAction::SetTrue)]
    force_orga_refresh: bool,
    /// Emit debug-level structured logs.
    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,
}

/// Flags for subcommands that reconcile and/or run the scheduler.
#[derive(Args, Debug)]
struct RunArgs {
    /// Flags common to every subcommand.
    #[command(flatten)]
    common: CommonArgs,
    /// Map pending changes to exit code 2 rather than 0.
    #[arg(long, action = ArgAction::SetTrue)]
    detailed_exitcode: bool,
    /// Treat every `Update`-eligible key as changed, bypassing the
    /// `ConditionalUpdate` short-circuit.
    #[arg(long, action = ArgAction::SetTrue)]
    force_update: bool,
    /// Skip the apply confirmation prompt.
    #[arg(long, action = ArgAction::SetTrue)]
    non_interactive: bool,
    /// Do not remove a step's deployment cache directory after it
    /// completes.
    #[arg(long, action = ArgAction::SetTrue)]
    keep_deployment_cache: bool,
    /// Minimum interval between intermediate state checkpoints; 0
    /// checkpoints after every completed step.
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    save_state_every_seconds: u64,
    /// Scope-narrowing flags, intersected with the package's own scope.
    #[command(flatten)]
    scope: ScopeFilterArgs,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Parses arguments and dispatches to the selected subcommand.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    init_tracing(debug_flag(&cli.command));

    match cli.command {
        Commands::Orga(args) => command_orga(args).await,
        Commands::List(args) => command_list(args).await,
        Commands::Preview(args) => command_run(args, false).await,
        Commands::Apply(args) => command_run(args, true).await,
        Commands::UpdateHash(args) => command_update_hash(args).await,
        Commands::RemoveOrphans(args) => command_remove_orphans(args).await,
    }
}

/// Extracts `--debug` from whichever command variant was selected, so
/// tracing can be initialized before the command itself is dispatched.
fn debug_flag(command: &Commands) -> bool {
    match command {
        Commands::Orga(args) | Commands::RemoveOrphans(args) => args.debug,
        Commands::List(args) | Commands::Preview(args) | Commands::Apply(args) | Commands::UpdateHash(args) => args.common.debug,
    }
}

/// Installs a `tracing` subscriber, honoring `RUST_LOG` if set and falling
/// back to `debug`/`info` per `--debug`.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// SECTION: Command - orga
// ============================================================================

/// Refreshes (or serves the cached) inventory snapshot and dumps it to the
/// output document; never reconciles or schedules anything.
async fn command_orga(args: CommonArgs) -> CliResult<ExitCode> {
    let package = PackageDefinition::load(&args.package_file)?;
    let object_store = object_store_for_location(&package.package.object_store_location).await?;

    let mut inventory_cache = InventoryCache::new(time::Duration::seconds(ttl_secs(&package)));
    if let Some(cached) = deployer_state::load_inventory_cache(&*object_store).await? {
        inventory_cache.seed(cached);
    }
    let source = FileInventorySource::new(&args.inventory_file);
    let inventory = inventory_cache.get(&source, time::OffsetDateTime::now_utc(), args.force_orga_refresh)?.clone();
    deployer_state::save_inventory_cache(&*object_store, &inventory).await?;

    emit_document(args.output_file.as_deref(), &inventory)?;
    Ok(ExitCode::SUCCESS)
}

/// Converts the package's configured TTL to a signed `time::Duration`,
/// saturating rather than failing on implausibly large values.
fn ttl_secs(package: &PackageDefinition) -> i64 {
    i64::try_from(package.package.inventory_cache_ttl_secs).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Command - list
// ============================================================================

/// Reconciles targets against persisted state and reports pending changes;
/// runs no engine and mutates nothing.
async fn command_list(args: RunArgs) -> CliResult<ExitCode> {
    let options = pipeline_options(&args);
    let pipeline = build_pipeline(&options.as_options()).await?;
    let output = ListOutput::from_actions(&pipeline.actions);
    let had_changes = !output.pending_changes.is_empty() || !output.pending_but_skipped_changes.is_empty();

    emit_document(args.common.output_file.as_deref(), &output)?;
    Ok(exit_code_for(args.detailed_exitcode, false, had_changes))
}

// ============================================================================
// SECTION: Command - preview / apply
// ============================================================================

/// Reconciles, then drives the scheduler; `persist` selects `preview`
/// (engine dry-run, no state write) versus `apply` (engine execution with
/// checkpointed state).
async fn command_run(args: RunArgs, persist: bool) -> CliResult<ExitCode> {
    let options = pipeline_options(&args);
    let pipeline = build_pipeline(&options.as_options()).await?;

    if persist && !args.non_interactive && !confirm_apply(&pipeline.actions)? {
        let output = RunOutput { completed: vec![], failed: vec![], pending: vec![] };
        emit_document(args.common.output_file.as_deref(), &output)?;
        return Ok(ExitCode::SUCCESS);
    }

    let scheduler_config = SchedulerConfig { max_concurrency: pipeline.package.package.concurrent_workers, preview: !persist, ..SchedulerConfig::default() };
    let cancel_rx = spawn_cancellation_driver(scheduler_config.cancel_grace_period, scheduler_config.cancel_terminate_period);
    let runner = Arc::new(TokioProcessRunner);

    let targets = pipeline.targets.clone();
    let object_store = Arc::clone(&pipeline.object_store);
    let mut currents = pipeline.currents.clone();
    let mut schedule = CheckpointSchedule::new(StdDuration::from_secs(args.save_state_every_seconds));
    let mut last_tick = Instant::now();

    let records = deployer_core::scheduler::run(
        &pipeline.graph,
        &pipeline.scheduler_steps,
        Arc::clone(&pipeline.dispatcher),
        runner,
        scheduler_config,
        |records| {
            if !persist {
                return;
            }
            let tick = last_tick.elapsed();
            last_tick = Instant::now();
            if !schedule.advance(tick) {
                return;
            }
            apply_completed_records(&mut currents, &targets, records);
            checkpoint_state(&object_store, &currents);
        },
        cancel_rx,
    )
    .await;

    if persist {
        apply_completed_records(&mut currents, &targets, &records);
        save_state(&*pipeline.object_store, &currents).await?;
    }

    let output = build_run_output(&pipeline.actions, &records);
    let had_error = !output.failed.is_empty();
    let had_changes = output.completed.iter().any(|record| record.resulted_in_changes) || !output.pending.is_empty();

    emit_document(args.common.output_file.as_deref(), &output)?;
    Ok(exit_code_for(args.detailed_exitcode, had_error, had_changes))
}

/// Prompts for confirmation before mutating resources; returns `true` if
/// the operator confirmed (or there was nothing to confirm).
fn confirm_apply(actions: &BTreeMap<DeploymentKey, Action>) -> CliResult<bool> {
    let pending = actions.values().filter(|action| action.is_pending()).count();
    if pending == 0 {
        return Ok(true);
    }
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{pending} deployment(s) pending. Continue? [y/N] ").map_err(|source| CliError::OutputWrite { path: "<stderr>".to_string(), source })?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).map_err(|source| CliError::OutputWrite { path: "<stdin>".to_string(), source })?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "YES"))
}

/// Bridges the scheduler's synchronous checkpoint callback to the async
/// object store by blocking the current worker thread on the save.
fn checkpoint_state(object_store: &Arc<dyn ObjectStore>, currents: &BTreeMap<DeploymentKey, CurrentState>) {
    let store = Arc::clone(object_store);
    let currents = currents.clone();
    let result = tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(save_state(&*store, &currents)));
    if let Err(error) = result {
        tracing::warn!(%error, "checkpoint failed to persist state");
    }
}

/// Folds freshly completed steps into the in-memory current-state map:
/// resolved targets become the new recorded declaration with the step's
/// fresh outputs, and completed `Destroy` steps drop their entry entirely.
fn apply_completed_records(currents: &mut BTreeMap<DeploymentKey, CurrentState>, targets: &BTreeMap<DeploymentKey, TargetState>, records: &BTreeMap<DeploymentKey, StepRunRecord>) {
    for (key, record) in records {
        if record.state != StepState::Completed {
            continue;
        }
        match targets.get(key) {
            Some(target) => {
                currents.insert(
                    key.clone(),
                    CurrentState {
                        variables: target.variables.clone(),
                        variables_from_outputs: target.variables_from_outputs.clone(),
                        dependencies: target.dependencies.clone(),
                        module_hash: target.module_hash.clone(),
                        outputs: record.outputs.clone(),
                        last_changed_time: time::OffsetDateTime::now_utc(),
                    },
                );
            }
            None => {
                currents.remove(key);
            }
        }
    }
}

/// Joins reconciled actions with their scheduler records into the three
/// `RunOutput` buckets.
fn build_run_output(actions: &BTreeMap<DeploymentKey, Action>, records: &BTreeMap<DeploymentKey, StepRunRecord>) -> RunOutput {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut pending = Vec::new();
    for (key, action) in actions {
        let Some(record) = records.get(key) else { continue };
        let entry = StepOutputRecord {
            deployment: key.clone(),
            action: *action,
            nb_attempts: record.nb_attempts,
            result: format!("{:?}", record.state),
            detailed_results: record.error.as_ref().map(ToString::to_string),
            resulted_in_changes: record.state == StepState::Completed && *action != Action::NoChange,
            outputs: record.outputs.clone(),
        };
        match record.state {
            StepState::Completed => completed.push(entry),
            StepState::Failed => failed.push(entry),
            StepState::Skipped | StepState::Pending | StepState::Waiting | StepState::Ready | StepState::Running => pending.push(entry),
        }
    }
    RunOutput { completed, failed, pending }
}

/// Drives a `tokio::sync::watch` cancellation channel through the
/// `CancellationStage` ladder in response to repeated Ctrl-C, waiting
/// `grace`/`terminate` between stages unless the operator presses again.
fn spawn_cancellation_driver(grace: StdDuration, terminate: StdDuration) -> tokio::sync::watch::Receiver<Option<CancellationStage>> {
    let (tx, rx) = tokio::sync::watch::channel(None);
    tokio::spawn(async move {
        let stages = [(CancellationStage::StopScheduling, StdDuration::ZERO), (CancellationStage::RequestStop, grace), (CancellationStage::Terminate, terminate), (CancellationStage::Abandon, terminate)];
        for (stage, wait) in stages {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let _ = tx.send(Some(stage));
            if wait > StdDuration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });
    rx
}

// ============================================================================
// SECTION: Command - update-hash
// ============================================================================

/// Rewrites `ModuleHash` in persisted state to match each target's
/// freshly computed hash, without dispatching any engine.
async fn command_update_hash(args: RunArgs) -> CliResult<ExitCode> {
    let options = pipeline_options(&args);
    let pipeline = build_pipeline(&options.as_options()).await?;
    let mut currents = pipeline.currents.clone();
    let mut updated = Vec::new();
    for (key, target) in &pipeline.targets {
        let Some(current) = currents.get_mut(key) else { continue };
        if current.module_hash != target.module_hash {
            current.module_hash.clone_from(&target.module_hash);
            updated.push(key.clone());
        }
    }
    save_state(&*pipeline.object_store, &currents).await?;

    emit_document(args.common.output_file.as_deref(), &UpdateHashOutput { updated: updated.clone() })?;
    Ok(exit_code_for(args.detailed_exitcode, false, !updated.is_empty()))
}

/// `update-hash`'s output document: every key whose persisted
/// `ModuleHash` was rewritten to match its resolved target.
#[derive(Debug, Clone, Serialize)]
struct UpdateHashOutput {
    /// Keys whose persisted hash no longer matched their target.
    updated: Vec<DeploymentKey>,
}

// ============================================================================
// SECTION: Command - remove-orphans
// ============================================================================

/// Drops persisted state for any key whose account is inactive or whose
/// region is no longer enabled for its account; ignores CLI scope filters,
/// since an orphan by definition can no longer be reconciled into scope.
async fn command_remove_orphans(args: CommonArgs) -> CliResult<ExitCode> {
    let package = PackageDefinition::load(&args.package_file)?;
    let object_store = object_store_for_location(&package.package.object_store_location).await?;

    let mut inventory_cache = InventoryCache::new(time::Duration::seconds(ttl_secs(&package)));
    if let Some(cached) = deployer_state::load_inventory_cache(&*object_store).await? {
        inventory_cache.seed(cached);
    }
    let source = FileInventorySource::new(&args.inventory_file);
    let inventory = inventory_cache.get(&source, time::OffsetDateTime::now_utc(), args.force_orga_refresh)?.clone();
    deployer_state::save_inventory_cache(&*object_store, &inventory).await?;

    let mut currents = deployer_state::load_state(&*object_store).await?;
    let active_accounts: BTreeMap<_, _> = inventory.active_accounts().map(|account| (account.id.clone(), account)).collect();

    let mut removed = Vec::new();
    currents.retain(|key, _| {
        let orphaned = active_accounts.get(&key.account_id).is_none_or(|account| !account.enabled_regions.contains(&key.region));
        if orphaned {
            removed.push(key.clone());
        }
        !orphaned
    });
    save_state(&*object_store, &currents).await?;

    emit_document(args.output_file.as_deref(), &RemoveOrphansOutput { removed: removed.clone() })?;
    Ok(ExitCode::SUCCESS)
}

/// `remove-orphans`'s output document: every key dropped because its
/// account or region is no longer active in the inventory.
#[derive(Debug, Clone, Serialize)]
struct RemoveOrphansOutput {
    /// Keys dropped because their account or region is no longer active.
    removed: Vec<DeploymentKey>,
}

// ============================================================================
// SECTION: Shared Helpers
// ============================================================================

/// Derives [`PipelineOptionsOwned`] from a parsed [`RunArgs`].
fn pipeline_options(args: &RunArgs) -> PipelineOptionsOwned {
    PipelineOptionsOwned {
        package_file: args.common.package_file.clone(),
        package_root: package_root(&args.common.package_file),
        inventory_file: args.common.inventory_file.clone(),
        engine_cache_root: engine_cache_root(&args.common),
        force_orga_refresh: args.common.force_orga_refresh,
        force_update: args.force_update,
        keep_deployment_cache: args.keep_deployment_cache,
        scope: args.scope.clone(),
    }
}

/// Owned storage for [`PipelineOptions`]'s borrowed fields, since the CLI's
/// parsed arguments outlive the single borrow `build_pipeline` needs.
struct PipelineOptionsOwned {
    /// Path to the package definition file.
    package_file: PathBuf,
    /// Directory module `path`s are resolved relative to.
    package_root: PathBuf,
    /// Path to the JSON-encoded inventory snapshot.
    inventory_file: PathBuf,
    /// Directory engines may use for their own persistent cache state.
    engine_cache_root: PathBuf,
    /// `--force-orga-refresh`.
    force_orga_refresh: bool,
    /// `--force-update`.
    force_update: bool,
    /// `--keep-deployment-cache`.
    keep_deployment_cache: bool,
    /// Scope-narrowing flags.
    scope: ScopeFilterArgs,
}

impl PipelineOptionsOwned {
    /// Borrows this owned storage as the [`PipelineOptions`] view
    /// `build_pipeline` consumes.
    fn as_options(&self) -> PipelineOptions<'_> {
        PipelineOptions {
            package_file: &self.package_file,
            package_root: &self.package_root,
            inventory_file: &self.inventory_file,
            engine_cache_root: &self.engine_cache_root,
            force_orga_refresh: self.force_orga_refresh,
            force_update: self.force_update,
            keep_deployment_cache: self.keep_deployment_cache,
            scope: &self.scope,
        }
    }
}

/// Returns the package file's parent directory, or `.` if it has none.
fn package_root(package_file: &Path) -> PathBuf {
    package_file.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Resolves the engine cache root from `--temp-dir`, defaulting to the
/// system temp directory.
fn engine_cache_root(common: &CommonArgs) -> PathBuf {
    common.temp_dir.clone().unwrap_or_else(std::env::temp_dir).join("orgaform")
}

/// Maps a run's outcome to an exit code: 1 on error, 2 on pending changes
/// only when `--detailed-exitcode` was requested, 0 otherwise.
fn exit_code_for(detailed: bool, had_error: bool, had_pending_or_changes: bool) -> ExitCode {
    if had_error {
        return ExitCode::FAILURE;
    }
    if detailed && had_pending_or_changes {
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

/// Writes `value` to `output_file` if given, else to stdout.
fn emit_document<T: Serialize>(output_file: Option<&Path>, value: &T) -> CliResult<()> {
    match output_file {
        Some(path) => write_output_file(path, value),
        None => write_json_stdout(value),
    }
}

/// Serializes `value` as pretty JSON to stdout, terminated with a newline.
fn write_json_stdout<T: Serialize>(value: &T) -> CliResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| CliError::OutputWrite { path: "<stdout>".to_string(), source: std::io::Error::other(source) })?;
    let mut stdout = std::io::stdout();
    stdout
        .write_all(&bytes)
        .and_then(|()| stdout.write_all(b"\n"))
        .map_err(|source| CliError::OutputWrite { path: "<stdout>".to_string(), source })
}

/// Writes a fatal error message to stderr and returns the failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
    ExitCode::FAILURE
}
