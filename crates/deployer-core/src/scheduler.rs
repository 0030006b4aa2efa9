// crates/deployer-core/src/scheduler.rs
// ============================================================================
// Module: Scheduler
// Description: Bounded concurrent worker pool that walks the dependency
// graph, dispatching steps to an engine and propagating failure/skip.
// Purpose: Turn a validated graph into a completed (or cleanly aborted) run.
// Dependencies: crate::engine, crate::graph, crate::model, tokio
// ============================================================================

//! ## Overview
//! The supervisor owns one [`tokio::task::JoinSet`] of worker futures, gated
//! by a [`tokio::sync::Semaphore`] sized to the configured concurrency. A
//! step becomes `Ready` once every predecessor is `Completed` or, for
//! `ConditionalUpdate` predecessors short-circuited to no-op, treated as
//! completed with unchanged outputs. `ConditionalUpdate` steps are resolved
//! against the predecessors' freshly produced outputs immediately before
//! dispatch: if every referenced output is unchanged from the last recorded
//! `CurrentState`, the step is recorded as a no-op (`SkipCause` is not used
//! here — the step completes with its prior outputs) without invoking the
//! engine at all. Cancellation follows a four-stage ladder so an operator's
//! Ctrl-C neither corrupts half-written state nor hangs forever waiting on a
//! stuck subprocess.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::engine::Command;
use crate::engine::Dispatcher;
use crate::engine::StepOutcome;
use crate::error::StepError;
use crate::graph::Graph;
use crate::model::Action;
use crate::model::CurrentState;
use crate::model::DeploymentKey;
use crate::model::ModuleConfig;
use crate::model::Outputs;
use crate::model::StepState;
use crate::model::TargetState;
use crate::model::VariablesFromOutputs;

// ============================================================================
// SECTION: Process Runner
// ============================================================================

/// Executes a prepared [`Command`] and returns its raw `output.json` bytes.
///
/// A real implementation spawns the process via [`tokio::process::Command`]
/// in `deployer-engines`; tests substitute a stub.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `command` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::EngineFailure`] if the process exits non-zero
    /// or its output cannot be read.
    async fn run(&self, command: &Command) -> Result<Vec<u8>, StepError>;
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// The outcome recorded for a single step once it leaves `Running`.
#[derive(Debug, Clone)]
pub struct StepRunRecord {
    /// Final state (`Completed`, `Failed`, `Skipped`, or `Pending`).
    pub state: StepState,
    /// Outputs produced (or carried over, for a short-circuited
    /// `ConditionalUpdate`).
    pub outputs: Outputs,
    /// The failure, if `state == Failed`.
    pub error: Option<StepError>,
    /// Number of dispatch attempts made, including retries. Zero for steps
    /// that never started (`Skipped`, or `Pending` from abandonment).
    pub nb_attempts: u32,
}

/// Everything the scheduler needs about one step to run it.
#[derive(Clone)]
pub struct SchedulerStep {
    /// The step's key.
    pub key: DeploymentKey,
    /// The reconciled action.
    pub action: Action,
    /// The resolved target state, absent for `Destroy`.
    pub target: Option<TargetState>,
    /// The persisted current state, absent for `Create`.
    pub current: Option<CurrentState>,
}

// ============================================================================
// SECTION: Cancellation Ladder
// ============================================================================

/// Staged response to a cancellation request, escalating if the run does
/// not wind down promptly.
///
/// # Invariants
/// - Stages only escalate, `L1 -> L2 -> L3 -> L4`; a run never de-escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancellationStage {
    /// L1: stop dispatching new steps; let running steps finish normally.
    StopScheduling,
    /// L2: grace period elapsed with steps still running; request
    /// cooperative shutdown (e.g. SIGTERM to engine subprocesses).
    RequestStop,
    /// L3: steps ignored the cooperative request; force-terminate them.
    Terminate,
    /// L4: force-terminate did not return in time; abandon and checkpoint
    /// whatever completed, marking the rest `Pending`.
    Abandon,
}

// ============================================================================
// SECTION: Scheduler Configuration
// ============================================================================

/// Tunables for one run of the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Maximum steps running concurrently.
    pub max_concurrency: usize,
    /// Preview mode: classify and validate, never invoke the engine.
    pub preview: bool,
    /// Grace period between L1 and L2 of the cancellation ladder. Advisory:
    /// the caller driving the `cancel` watch channel is responsible for
    /// waiting this long before publishing `RequestStop`.
    pub cancel_grace_period: StdDuration,
    /// Grace period between L2 and L3, same caveat as above.
    pub cancel_terminate_period: StdDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            preview: false,
            cancel_grace_period: StdDuration::from_secs(30),
            cancel_terminate_period: StdDuration::from_secs(10),
        }
    }
}

// ============================================================================
// SECTION: Run State
// ============================================================================

/// Mutable scheduling state for one run loop: per-step state, recorded
/// results, unresolved predecessors, and retry counters.
struct RunState {
    /// Current lifecycle state of each step.
    states: BTreeMap<DeploymentKey, StepState>,
    /// Result recorded for each step that has reached a terminal state.
    records: BTreeMap<DeploymentKey, StepRunRecord>,
    /// Dependencies each step is still waiting on.
    remaining_predecessors: BTreeMap<DeploymentKey, BTreeSet<DeploymentKey>>,
    /// Retry attempts consumed so far per step.
    attempts: BTreeMap<DeploymentKey, u32>,
}

impl RunState {
    /// Seeds run state from `graph`: steps with no dependencies start `Ready`, others `Waiting`.
    fn new(graph: &Graph) -> Self {
        let mut states = BTreeMap::new();
        let mut remaining_predecessors = BTreeMap::new();
        for step in graph.steps.values() {
            states.insert(step.key.clone(), if step.depends_on.is_empty() { StepState::Ready } else { StepState::Waiting });
            remaining_predecessors.insert(step.key.clone(), step.depends_on.clone());
        }
        Self {
            states,
            records: BTreeMap::new(),
            remaining_predecessors,
            attempts: BTreeMap::new(),
        }
    }

    /// Returns the keys currently in [`StepState::Ready`], in key order.
    fn ready_keys(&self) -> Vec<DeploymentKey> {
        self.states
            .iter()
            .filter(|(_, state)| **state == StepState::Ready)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns true once every step has reached a terminal state.
    fn all_settled(&self) -> bool {
        self.states
            .values()
            .all(|state| matches!(state, StepState::Completed | StepState::Failed | StepState::Skipped | StepState::Pending))
    }
}

// ============================================================================
// SECTION: Conditional Update Short-Circuit
// ============================================================================

/// Returns the outputs a `ConditionalUpdate` step would keep without
/// running its engine, if every referenced output is unchanged from the
/// last recorded apply; `None` means the engine must actually run.
fn conditional_no_op_outputs(
    refs: &VariablesFromOutputs,
    current: &CurrentState,
    upstream_outputs: &BTreeMap<DeploymentKey, Outputs>,
) -> Option<Outputs> {
    for (name, output_ref) in refs {
        let upstream_key = output_ref.key();
        let resolved = upstream_outputs
            .get(&upstream_key)
            .and_then(|outputs| outputs.get(&output_ref.output_name));
        let recorded = current.variables.get(name);
        match (resolved, recorded) {
            (Some(r), Some(c)) if r == c => continue,
            (None, None) => continue,
            _ => return None,
        }
    }
    Some(current.outputs.clone())
}

// ============================================================================
// SECTION: Run Loop
// ============================================================================

/// Runs `graph` to completion (or clean cancellation), dispatching ready
/// steps to `dispatcher`/`runner` within `config.max_concurrency` at a time.
///
/// `checkpoint` is invoked after every state transition so the caller can
/// persist progress; it receives the full current record set.
///
/// # Errors
///
/// This function itself does not fail: per-step failures are recorded in
/// the returned map rather than aborting the run. A future resolved via
/// `cancel` escalates through [`CancellationStage`] rather than returning
/// early with an error.
pub async fn run<D, R, F>(
    graph: &Graph,
    steps: &BTreeMap<DeploymentKey, SchedulerStep>,
    dispatcher: Arc<D>,
    runner: Arc<R>,
    config: SchedulerConfig,
    mut checkpoint: F,
    cancel: tokio::sync::watch::Receiver<Option<CancellationStage>>,
) -> BTreeMap<DeploymentKey, StepRunRecord>
where
    D: Dispatcher + 'static,
    R: ProcessRunner + 'static,
    F: FnMut(&BTreeMap<DeploymentKey, StepRunRecord>),
{
    let mut state = RunState::new(graph);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut in_flight: JoinSet<(DeploymentKey, StepRunRecord)> = JoinSet::new();
    let mut upstream_outputs: BTreeMap<DeploymentKey, Outputs> = BTreeMap::new();
    let mut stopped_scheduling = false;

    loop {
        if let Some(stage) = *cancel.borrow() {
            if stage >= CancellationStage::StopScheduling {
                stopped_scheduling = true;
            }
            if stage >= CancellationStage::Abandon {
                break;
            }
        }

        if !stopped_scheduling {
            for key in state.ready_keys() {
                let Some(permit) = semaphore.clone().try_acquire_owned().ok() else { break };
                state.states.insert(key.clone(), StepState::Running);
                let step = steps[&key].clone();
                let dispatcher = Arc::clone(&dispatcher);
                let runner = Arc::clone(&runner);
                let preview = config.preview;
                let upstream_snapshot = upstream_outputs.clone();
                tracing::debug!(key = %key, action = %step.action, "dispatching step");
                in_flight.spawn(async move {
                    let _permit = permit;
                    let record = run_step(&step, &dispatcher, &runner, preview, &upstream_snapshot).await;
                    (key, record)
                });
            }
        }

        if in_flight.is_empty() {
            if state.all_settled() || stopped_scheduling {
                break;
            }
            // Nothing ready and nothing running: the remaining steps are
            // blocked behind failures already recorded; mark them Skipped.
            skip_blocked(&mut state, graph);
            checkpoint(&state.records);
            if state.all_settled() {
                break;
            }
            continue;
        }

        let Some(joined) = in_flight.join_next().await else { continue };
        let Ok((key, record)) = joined else { continue };

        if let StepState::Failed = record.state {
            if let Some(error) = &record.error {
                if error.retriable() {
                    let attempts = state.attempts.entry(key.clone()).or_insert(0);
                    *attempts += 1;
                    let max_attempts = steps[&key]
                        .target
                        .as_ref()
                        .map_or(1, |t| t.module_config.retry.max_attempts);
                    if *attempts < max_attempts {
                        tracing::info!(key = %key, attempt = *attempts, max_attempts, "retrying step after a transient failure");
                        state.states.insert(key.clone(), StepState::Ready);
                        checkpoint(&state.records);
                        continue;
                    }
                }
            }
        }

        let nb_attempts = state.attempts.get(&key).copied().unwrap_or(0) + 1;
        let record = StepRunRecord { nb_attempts, ..record };
        match (&record.state, &record.error) {
            (StepState::Completed, _) => tracing::info!(key = %key, nb_attempts, "step completed"),
            (StepState::Failed, Some(error)) => tracing::warn!(key = %key, error = %error, "step failed"),
            (StepState::Failed, None) => tracing::warn!(key = %key, "step failed with no recorded error"),
            _ => tracing::debug!(key = %key, "step settled"),
        }
        upstream_outputs.insert(key.clone(), record.outputs.clone());
        state.states.insert(key.clone(), record.state);
        state.records.insert(key.clone(), record);
        unblock_dependents(&mut state, graph, &key);
        checkpoint(&state.records);
    }

    mark_abandoned_steps(&mut state);
    state.records
}

/// Runs one step to completion: applies preview/conditional-update short-circuits, then
/// dispatches to the engine and process runner if the step must actually execute.
async fn run_step<D, R>(
    step: &SchedulerStep,
    dispatcher: &D,
    runner: &R,
    preview: bool,
    upstream_outputs: &BTreeMap<DeploymentKey, Outputs>,
) -> StepRunRecord
where
    D: Dispatcher,
    R: ProcessRunner,
{
    if let (Action::ConditionalUpdate, Some(target), Some(current)) =
        (step.action, step.target.as_ref(), step.current.as_ref())
    {
        if preview {
            return StepRunRecord {
                state: StepState::Failed,
                outputs: Outputs::new(),
                error: Some(StepError::PreviewBlockedByPendingUpstream { upstream: step.key.clone() }),
                nb_attempts: 1,
            };
        }
        if let Some(outputs) = conditional_no_op_outputs(&target.variables_from_outputs, current, upstream_outputs) {
            return StepRunRecord { state: StepState::Completed, outputs, error: None, nb_attempts: 1 };
        }
    }

    if preview {
        let outputs = step.current.as_ref().map(|c| c.outputs.clone()).unwrap_or_default();
        return StepRunRecord { state: StepState::Completed, outputs, error: None, nb_attempts: 1 };
    }

    let variables = step.target.as_ref().map(|t| &t.variables);
    let empty = crate::model::Variables::new();
    let default_config = ModuleConfig::default();
    let config = step.target.as_ref().map_or(&default_config, |t| &t.module_config);

    let command = match dispatcher.prepare(&step.key, step.action, variables.unwrap_or(&empty), config).await {
        Ok(command) => command,
        Err(error) => return StepRunRecord { state: StepState::Failed, outputs: Outputs::new(), error: Some(error), nb_attempts: 1 },
    };

    let raw_output = match runner.run(&command).await {
        Ok(bytes) => bytes,
        Err(error) => return StepRunRecord { state: StepState::Failed, outputs: Outputs::new(), error: Some(error), nb_attempts: 1 },
    };

    match dispatcher.postprocess(&step.key, step.action, &raw_output) {
        Ok(StepOutcome { outputs }) => StepRunRecord { state: StepState::Completed, outputs, error: None, nb_attempts: 1 },
        Err(error) => StepRunRecord { state: StepState::Failed, outputs: Outputs::new(), error: Some(error), nb_attempts: 1 },
    }
}

/// Advances a completed step's dependents to `Ready` (or `Skipped` if it failed).
fn unblock_dependents(state: &mut RunState, graph: &Graph, completed: &DeploymentKey) {
    let completed_state = state.states[completed];
    for dependent in graph.dependents_of(completed) {
        if let Some(remaining) = state.remaining_predecessors.get_mut(&dependent) {
            if completed_state == StepState::Completed {
                remaining.remove(completed);
                if remaining.is_empty() && state.states.get(&dependent) == Some(&StepState::Waiting) {
                    state.states.insert(dependent, StepState::Ready);
                }
            } else {
                state.states.insert(dependent.clone(), StepState::Skipped);
                state.records.insert(
                    dependent,
                    StepRunRecord {
                        state: StepState::Skipped,
                        outputs: Outputs::new(),
                        error: Some(StepError::UpstreamFailed { upstream: completed.clone() }),
                        nb_attempts: 0,
                    },
                );
            }
        }
    }
}

/// Marks every still-`Waiting` step `Skipped` once nothing remains runnable.
fn skip_blocked(state: &mut RunState, graph: &Graph) {
    let waiting: Vec<DeploymentKey> = state
        .states
        .iter()
        .filter(|(_, s)| **s == StepState::Waiting)
        .map(|(k, _)| k.clone())
        .collect();
    for key in waiting {
        let blocked_on_failure = graph.steps[&key]
            .depends_on
            .iter()
            .any(|dep| matches!(state.states.get(dep), Some(StepState::Failed) | Some(StepState::Skipped)));
        if blocked_on_failure {
            state.states.insert(key.clone(), StepState::Skipped);
            state.records.insert(
                key.clone(),
                StepRunRecord {
                    state: StepState::Skipped,
                    outputs: Outputs::new(),
                    error: Some(StepError::UpstreamFailed { upstream: key }),
                    nb_attempts: 0,
                },
            );
        }
    }
}

/// Records every step still `Running`, `Ready`, or `Waiting` when the run
/// loop exits early (cancellation reaching `Abandon`) as `Pending`, so the
/// caller never mistakes an abandoned step for one that simply never
/// existed. A step caught mid-flight gets `StepError::Interrupted`; one
/// that never started gets no error.
fn mark_abandoned_steps(state: &mut RunState) {
    let unsettled: Vec<(DeploymentKey, StepState)> = state
        .states
        .iter()
        .filter(|(_, s)| !matches!(s, StepState::Completed | StepState::Failed | StepState::Skipped))
        .map(|(k, s)| (k.clone(), *s))
        .collect();
    for (key, was) in unsettled {
        let error = matches!(was, StepState::Running).then_some(StepError::Interrupted);
        state.states.insert(key.clone(), StepState::Pending);
        state.records.insert(key, StepRunRecord { state: StepState::Pending, outputs: Outputs::new(), error, nb_attempts: 0 });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use tokio::sync::watch;

    use super::*;
    use crate::error::ValidationError;
    use crate::graph::StepInput;
    use crate::graph::build_graph;
    use crate::model::DependencyRef;
    use crate::model::ModuleName;
    use crate::model::Variables;
    use crate::model::VariablesFromOutputs;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    struct StubDispatcher;

    #[async_trait]
    impl Dispatcher for StubDispatcher {
        fn validate_module_config(&self, _config: &ModuleConfig) -> Result<(), ValidationError> {
            Ok(())
        }

        async fn prepare(
            &self,
            key: &DeploymentKey,
            _action: Action,
            _variables: &Variables,
            _config: &ModuleConfig,
        ) -> Result<Command, StepError> {
            Ok(Command {
                program: "true".to_string(),
                args: vec![],
                working_dir: ".".to_string(),
                env: Variables::new(),
                cache_dir: format!("/tmp/{key}"),
            })
        }

        fn postprocess(&self, _key: &DeploymentKey, _action: Action, _raw_output: &[u8]) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome { outputs: Outputs::from([("id".to_string(), serde_json::json!("created"))]) })
        }
    }

    struct StubRunner {
        fail_first_n_calls: AtomicU32,
    }

    #[async_trait]
    impl ProcessRunner for StubRunner {
        async fn run(&self, _command: &Command) -> Result<Vec<u8>, StepError> {
            let remaining = self.fail_first_n_calls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first_n_calls.fetch_sub(1, Ordering::SeqCst);
                return Err(StepError::EngineFailure("transient".to_string()));
            }
            Ok(b"{}".to_vec())
        }
    }

    fn no_cancel() -> watch::Receiver<Option<CancellationStage>> {
        watch::channel(None).1
    }

    fn target_state() -> TargetState {
        TargetState {
            variables: Variables::new(),
            variables_from_outputs: VariablesFromOutputs::new(),
            dependencies: vec![],
            module_hash: "h1".to_string(),
            module_config: ModuleConfig::default(),
        }
    }

    #[tokio::test]
    async fn dependent_runs_after_its_dependency_completes() -> TestResult {
        let vpc_key = DeploymentKey::new("vpc", "111111111111", "eu-west-1");
        let subnet_key = DeploymentKey::new("subnet", "111111111111", "eu-west-1");
        let subnet_deps = [DependencyRef {
            module: ModuleName::new("vpc"),
            account_id: "111111111111".into(),
            region: "eu-west-1".into(),
            ignore_if_not_exists: false,
        }];
        let inputs = vec![
            StepInput { key: &vpc_key, action: Action::Create, dependencies: &[] },
            StepInput { key: &subnet_key, action: Action::Create, dependencies: &subnet_deps },
        ];
        let graph = build_graph(&inputs)?;

        let mut steps = BTreeMap::new();
        steps.insert(vpc_key.clone(), SchedulerStep { key: vpc_key.clone(), action: Action::Create, target: Some(target_state()), current: None });
        steps.insert(subnet_key.clone(), SchedulerStep { key: subnet_key.clone(), action: Action::Create, target: Some(target_state()), current: None });

        let dispatcher = Arc::new(StubDispatcher);
        let runner = Arc::new(StubRunner { fail_first_n_calls: AtomicU32::new(0) });
        let config = SchedulerConfig { max_concurrency: 2, ..SchedulerConfig::default() };

        let records = run(&graph, &steps, dispatcher, runner, config, |_| {}, no_cancel()).await;

        let Some(vpc_record) = records.get(&vpc_key) else { return Err("expected a vpc record".into()) };
        let Some(subnet_record) = records.get(&subnet_key) else { return Err("expected a subnet record".into()) };
        assert_eq!(vpc_record.state, StepState::Completed);
        assert_eq!(subnet_record.state, StepState::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn retriable_failure_retries_up_to_max_attempts() -> TestResult {
        let key = DeploymentKey::new("vpc", "111111111111", "eu-west-1");
        let inputs = vec![StepInput { key: &key, action: Action::Create, dependencies: &[] }];
        let graph = build_graph(&inputs)?;

        let mut target = target_state();
        target.module_config.retry.max_attempts = 2;
        let mut steps = BTreeMap::new();
        steps.insert(key.clone(), SchedulerStep { key: key.clone(), action: Action::Create, target: Some(target), current: None });

        let dispatcher = Arc::new(StubDispatcher);
        let runner = Arc::new(StubRunner { fail_first_n_calls: AtomicU32::new(1) });
        let config = SchedulerConfig::default();

        let records = run(&graph, &steps, dispatcher, runner, config, |_| {}, no_cancel()).await;
        let Some(record) = records.get(&key) else { return Err("expected a record".into()) };
        assert_eq!(record.state, StepState::Completed);
        assert_eq!(record.nb_attempts, 2);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_reaching_abandon_marks_unsettled_steps_pending() -> TestResult {
        let key = DeploymentKey::new("vpc", "111111111111", "eu-west-1");
        let inputs = vec![StepInput { key: &key, action: Action::Create, dependencies: &[] }];
        let graph = build_graph(&inputs)?;

        let mut steps = BTreeMap::new();
        steps.insert(key.clone(), SchedulerStep { key: key.clone(), action: Action::Create, target: Some(target_state()), current: None });

        let dispatcher = Arc::new(StubDispatcher);
        let runner = Arc::new(StubRunner { fail_first_n_calls: AtomicU32::new(0) });
        let config = SchedulerConfig::default();
        let (_tx, rx) = watch::channel(Some(CancellationStage::Abandon));

        let records = run(&graph, &steps, dispatcher, runner, config, |_| {}, rx).await;
        let Some(record) = records.get(&key) else { return Err("expected a record for the abandoned step".into()) };
        assert_eq!(record.state, StepState::Pending);
        assert_eq!(record.nb_attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn dependent_is_skipped_when_dependency_fails() -> TestResult {
        let vpc_key = DeploymentKey::new("vpc", "111111111111", "eu-west-1");
        let subnet_key = DeploymentKey::new("subnet", "111111111111", "eu-west-1");
        let subnet_deps = [DependencyRef {
            module: ModuleName::new("vpc"),
            account_id: "111111111111".into(),
            region: "eu-west-1".into(),
            ignore_if_not_exists: false,
        }];
        let inputs = vec![
            StepInput { key: &vpc_key, action: Action::Create, dependencies: &[] },
            StepInput { key: &subnet_key, action: Action::Create, dependencies: &subnet_deps },
        ];
        let graph = build_graph(&inputs)?;

        let mut steps = BTreeMap::new();
        let mut failing_target = target_state();
        failing_target.module_config.retry.max_attempts = 1;
        steps.insert(vpc_key.clone(), SchedulerStep { key: vpc_key.clone(), action: Action::Create, target: Some(failing_target), current: None });
        steps.insert(subnet_key.clone(), SchedulerStep { key: subnet_key.clone(), action: Action::Create, target: Some(target_state()), current: None });

        let dispatcher = Arc::new(StubDispatcher);
        let runner = Arc::new(StubRunner { fail_first_n_calls: AtomicU32::new(u32::MAX) });
        let config = SchedulerConfig::default();

        let records = run(&graph, &steps, dispatcher, runner, config, |_| {}, no_cancel()).await;
        let Some(vpc_record) = records.get(&vpc_key) else { return Err("expected a vpc record".into()) };
        let Some(subnet_record) = records.get(&subnet_key) else { return Err("expected a subnet record".into()) };
        assert_eq!(vpc_record.state, StepState::Failed);
        assert_eq!(subnet_record.state, StepState::Skipped);
        Ok(())
    }

    fn current_state() -> CurrentState {
        CurrentState {
            variables: Variables::new(),
            variables_from_outputs: VariablesFromOutputs::new(),
            dependencies: vec![],
            module_hash: "h1".to_string(),
            outputs: Outputs::from([("id".to_string(), serde_json::json!("existing"))]),
            last_changed_time: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn preview_fails_a_conditional_update_step_instead_of_short_circuiting_it() -> TestResult {
        let key = DeploymentKey::new("subnet", "111111111111", "eu-west-1");
        let inputs = vec![StepInput { key: &key, action: Action::ConditionalUpdate, dependencies: &[] }];
        let graph = build_graph(&inputs)?;

        let mut steps = BTreeMap::new();
        steps.insert(key.clone(), SchedulerStep { key: key.clone(), action: Action::ConditionalUpdate, target: Some(target_state()), current: Some(current_state()) });

        let dispatcher = Arc::new(StubDispatcher);
        let runner = Arc::new(StubRunner { fail_first_n_calls: AtomicU32::new(0) });
        let config = SchedulerConfig { preview: true, ..SchedulerConfig::default() };

        let records = run(&graph, &steps, dispatcher, runner, config, |_| {}, no_cancel()).await;
        let Some(record) = records.get(&key) else { return Err("expected a record".into()) };
        assert_eq!(record.state, StepState::Failed);
        assert!(matches!(record.error, Some(StepError::PreviewBlockedByPendingUpstream { .. })));
        Ok(())
    }

    struct ConcurrencyTrackingRunner {
        current: AtomicU32,
        max_observed: AtomicU32,
    }

    #[async_trait]
    impl ProcessRunner for ConcurrencyTrackingRunner {
        async fn run(&self, _command: &Command) -> Result<Vec<u8>, StepError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(b"{}".to_vec())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_the_configured_worker_count() -> TestResult {
        let keys: Vec<DeploymentKey> = (0..10).map(|i| DeploymentKey::new(format!("module{i}"), "111111111111", "eu-west-1")).collect();
        let inputs: Vec<StepInput<'_>> = keys.iter().map(|key| StepInput { key, action: Action::Create, dependencies: &[] }).collect();
        let graph = build_graph(&inputs)?;

        let mut steps = BTreeMap::new();
        for key in &keys {
            steps.insert(key.clone(), SchedulerStep { key: key.clone(), action: Action::Create, target: Some(target_state()), current: None });
        }

        let dispatcher = Arc::new(StubDispatcher);
        let runner = Arc::new(ConcurrencyTrackingRunner { current: AtomicU32::new(0), max_observed: AtomicU32::new(0) });
        let config = SchedulerConfig { max_concurrency: 3, ..SchedulerConfig::default() };

        let records = run(&graph, &steps, dispatcher, Arc::clone(&runner), config, |_| {}, no_cancel()).await;

        assert!(records.values().all(|record| record.state == StepState::Completed));
        assert!(runner.max_observed.load(Ordering::SeqCst) <= 3);
        Ok(())
    }
}
