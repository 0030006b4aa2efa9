// crates/deployer-cli/src/output.rs
// ============================================================================
// Module: Output Documents
// Description: The JSON document shapes written to `--output-file`, and the
// helper that writes them.
// Purpose: Give automation calling this CLI a stable, machine-readable
// result per subcommand, independent of anything printed to stdout/stderr.
// Dependencies: deployer_core, serde, serde_json
// ============================================================================

use std::path::Path;

use deployer_core::Action;
use deployer_core::DeploymentKey;
use deployer_core::Outputs;
use serde::Serialize;

use crate::error::CliError;
use crate::error::CliResult;

/// `list`'s output document.
///
/// # Invariants
/// - `list` never runs an engine, so `ConditionalUpdate` keys cannot be
///   resolved to either "changed" or "unchanged": they are reported
///   separately in `pending_but_skipped_changes` rather than guessed at.
#[derive(Debug, Clone, Serialize)]
pub struct ListOutput {
    /// Keys reconciled to `Create`, `Update`, or `Destroy`.
    pub pending_changes: Vec<DeploymentKey>,
    /// Keys reconciled to `ConditionalUpdate`: a change is pending only if
    /// the engine reports new output values once it actually runs.
    pub pending_but_skipped_changes: Vec<DeploymentKey>,
    /// Keys reconciled to `NoChange`.
    pub no_changes: Vec<DeploymentKey>,
}

impl ListOutput {
    /// Buckets a reconciled action map into the three `list` categories.
    #[must_use]
    pub fn from_actions(actions: &std::collections::BTreeMap<DeploymentKey, Action>) -> Self {
        let mut pending_changes = Vec::new();
        let mut pending_but_skipped_changes = Vec::new();
        let mut no_changes = Vec::new();
        for (key, action) in actions {
            match action {
                Action::Create | Action::Update | Action::Destroy => pending_changes.push(key.clone()),
                Action::ConditionalUpdate => pending_but_skipped_changes.push(key.clone()),
                Action::NoChange => no_changes.push(key.clone()),
            }
        }
        Self { pending_changes, pending_but_skipped_changes, no_changes }
    }
}

/// One step's outcome, as recorded for `preview`/`apply`/`update-hash`.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutputRecord {
    /// The deployment key.
    pub deployment: DeploymentKey,
    /// The action that was scheduled for it.
    pub action: Action,
    /// Number of attempts the scheduler made.
    pub nb_attempts: u32,
    /// A short, human-readable result summary.
    pub result: String,
    /// The full error detail, if the step failed.
    pub detailed_results: Option<String>,
    /// Whether the step actually produced an output change.
    pub resulted_in_changes: bool,
    /// The step's outputs, if it completed.
    pub outputs: Outputs,
}

/// `preview`/`apply`/`update-hash`'s output document.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    /// Keys that completed successfully.
    pub completed: Vec<StepOutputRecord>,
    /// Keys that failed.
    pub failed: Vec<StepOutputRecord>,
    /// Keys that never got a chance to run, typically because an upstream
    /// dependency failed or the run was interrupted.
    pub pending: Vec<StepOutputRecord>,
}

/// Serializes `value` as pretty JSON and writes it to `path`.
///
/// # Errors
///
/// Returns [`CliError::OutputWrite`] if serialization or the write itself
/// fails.
pub fn write_output_file<T: Serialize>(path: &Path, value: &T) -> CliResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| CliError::OutputWrite { path: path.display().to_string(), source: std::io::Error::other(source) })?;
    std::fs::write(path, bytes).map_err(|source| CliError::OutputWrite { path: path.display().to_string(), source })
}
