// crates/deployer-core/src/engine.rs
// ============================================================================
// Module: Engine Dispatcher
// Description: The trait boundary between the core scheduler and a
// pluggable deployment engine (script runner, template renderer, ...).
// Purpose: Let deployer-engines provide concrete engines without the core
// knowing anything about subprocesses, templates, or cloud SDKs.
// Dependencies: async-trait, crate::model
// ============================================================================

//! ## Overview
//! An engine is asked, per step: validate the opaque module configuration
//! at graph-build time, `prepare` a command description for the action, and
//! `postprocess` the raw output the command produced into typed `Outputs`.
//! The core never spawns a process itself; `deployer-engines` owns that.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::StepError;
use crate::error::ValidationError;
use crate::model::Action;
use crate::model::DeploymentKey;
use crate::model::ModuleConfig;
use crate::model::Outputs;
use crate::model::Variables;

// ============================================================================
// SECTION: Command Descriptor
// ============================================================================

/// What the scheduler must run to carry out one step, as described by an
/// engine's `prepare`.
///
/// # Invariants
/// - `working_dir` is always the module's own directory, never a shared or
///   temporary location; engines that need scratch space use `cache_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Executable to invoke.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory for the subprocess (the module's own directory).
    pub working_dir: String,
    /// Extra environment variables, beyond the inherited process
    /// environment and any assumed-role credentials.
    pub env: Variables,
    /// Per-deployment cache directory the engine may read/write freely.
    pub cache_dir: String,
}

// ============================================================================
// SECTION: Step Outcome
// ============================================================================

/// What a completed step produced, handed back to the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Outputs parsed from the engine's result, empty for `Destroy`.
    pub outputs: Outputs,
}

// ============================================================================
// SECTION: Dispatcher Trait
// ============================================================================

/// A pluggable deployment engine.
///
/// Implementations live in `deployer-engines`; the core only depends on
/// this trait.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Validates a module's opaque configuration before any step runs.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedPackage`] if the opaque config
    /// does not match this engine's expected shape.
    fn validate_module_config(&self, config: &ModuleConfig) -> Result<(), ValidationError>;

    /// Builds the command to run for a step.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::EngineFailure`] if the command cannot be
    /// constructed (e.g. a required template file is missing).
    async fn prepare(
        &self,
        key: &DeploymentKey,
        action: Action,
        variables: &Variables,
        config: &ModuleConfig,
    ) -> Result<Command, StepError>;

    /// Interprets a finished command's raw `output.json` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::EngineFailure`] if the bytes are not valid
    /// output for this engine.
    fn postprocess(&self, key: &DeploymentKey, action: Action, raw_output: &[u8]) -> Result<StepOutcome, StepError>;
}
