// crates/deployer-core/src/model.rs
// ============================================================================
// Module: Deployment Data Model
// Description: The deployment key, deployment record, and scheduling step
// types shared by every subsystem in the core.
// Purpose: Give every other module a single, typed vocabulary for "what is
// being deployed where".
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! The deployment key `(module, account, region)` is the identity every
//! other subsystem keys off of: the reconciler classifies one action per
//! key, the graph builder creates one step per key, and the state store
//! persists one record per key. This module defines that vocabulary without
//! depending on any other core subsystem.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Module name, the leading directory level under the package root.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(String);

impl ModuleName {
    /// Creates a new module name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the module name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ModuleName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ModuleName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Cloud account identifier (opaque; the inventory assigns meaning).
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Creates a new account identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the account identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Cloud region identifier (opaque; the inventory assigns meaning).
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    /// Creates a new region identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the region identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Region {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Region {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Deployment Key
// ============================================================================

/// Deployment key `(module, account, region)`, unique across a package.
///
/// # Invariants
/// - `Ord` is derived field-order (module, then account, then region) and is
///   used only for deterministic tie-breaking; it carries no semantic
///   meaning about dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentKey {
    /// Module name.
    pub module: ModuleName,
    /// Account identifier.
    pub account_id: AccountId,
    /// Region identifier.
    pub region: Region,
}

impl DeploymentKey {
    /// Creates a new deployment key.
    #[must_use]
    pub fn new(
        module: impl Into<ModuleName>,
        account_id: impl Into<AccountId>,
        region: impl Into<Region>,
    ) -> Self {
        Self {
            module: module.into(),
            account_id: account_id.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{},{}]", self.module, self.account_id, self.region)
    }
}

// ============================================================================
// SECTION: References
// ============================================================================

/// Reference to another deployment key, optionally tolerant of absence.
///
/// # Invariants
/// - `ignore_if_not_exists = false` means an unresolved reference is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    /// Referenced module.
    pub module: ModuleName,
    /// Referenced account.
    pub account_id: AccountId,
    /// Referenced region.
    pub region: Region,
    /// Drop the reference silently instead of failing when unresolved.
    #[serde(default)]
    pub ignore_if_not_exists: bool,
}

impl DependencyRef {
    /// Returns the deployment key this reference points at.
    #[must_use]
    pub fn key(&self) -> DeploymentKey {
        DeploymentKey {
            module: self.module.clone(),
            account_id: self.account_id.clone(),
            region: self.region.clone(),
        }
    }
}

/// Reference to an upstream module's output, used by `VariablesFromOutputs`.
///
/// # Invariants
/// - `output_name` names a key in the upstream deployment's `Outputs` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    /// Referenced module.
    pub module: ModuleName,
    /// Referenced account.
    pub account_id: AccountId,
    /// Referenced region.
    pub region: Region,
    /// Output name within the upstream deployment's `Outputs` map.
    pub output_name: String,
    /// Drop the reference silently instead of failing when unresolved.
    #[serde(default)]
    pub ignore_if_not_exists: bool,
}

impl OutputRef {
    /// Returns the deployment key this reference points at.
    #[must_use]
    pub fn key(&self) -> DeploymentKey {
        DeploymentKey {
            module: self.module.clone(),
            account_id: self.account_id.clone(),
            region: self.region.clone(),
        }
    }
}

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Per-module retry policy.
///
/// # Invariants
/// - `max_attempts >= 1`; a value of 1 means no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before retrying, in seconds.
    pub delay_before_retrying_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_before_retrying_secs: 0,
        }
    }
}

// ============================================================================
// SECTION: Module Configuration
// ============================================================================

/// Per-engine opaque module configuration plus the cross-cutting fields the
/// core consumes directly.
///
/// # Invariants
/// - `opaque` is never interpreted by the core; only by the selected engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModuleConfig {
    /// Optional credential role to assume before dispatching the engine.
    #[serde(default)]
    pub assume_role: Option<String>,
    /// Retry policy for this module's steps.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Opaque endpoint URL overrides, passed through to the engine untouched.
    #[serde(default)]
    pub endpoint_urls: BTreeMap<String, String>,
    /// Engine-specific opaque settings.
    #[serde(default)]
    pub opaque: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// SECTION: Deployment Record
// ============================================================================

/// Variables map: engine-opaque scalar/list/map values.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Variables sourced from upstream outputs, overriding `Variables` for the
/// same key at resolution time.
pub type VariablesFromOutputs = BTreeMap<String, OutputRef>;

/// Engine-returned outputs for a deployment.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// The declared (target) state of a deployment, produced by the scope
/// expander and variable resolver.
///
/// # Invariants
/// - At most one `TargetState` exists per [`DeploymentKey`] within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    /// Resolved variables (after `${CURRENT_*}` substitution).
    pub variables: Variables,
    /// Output references not yet resolved.
    pub variables_from_outputs: VariablesFromOutputs,
    /// Declared dependencies.
    pub dependencies: Vec<DependencyRef>,
    /// Module content hash computed for this run.
    pub module_hash: String,
    /// Module configuration in effect for this key.
    pub module_config: ModuleConfig,
}

/// The persisted (current) state of a deployment, loaded from the state
/// store.
///
/// # Invariants
/// - At most one `CurrentState` exists per [`DeploymentKey`] within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    /// Variables recorded at the last successful apply.
    pub variables: Variables,
    /// Output references recorded at the last successful apply.
    pub variables_from_outputs: VariablesFromOutputs,
    /// Dependencies recorded at the last successful apply.
    pub dependencies: Vec<DependencyRef>,
    /// Module content hash at the last successful apply.
    pub module_hash: String,
    /// Outputs returned by the engine at the last successful apply.
    pub outputs: Outputs,
    /// Wall-clock timestamp of the last create/update.
    #[serde(with = "time::serde::rfc3339")]
    pub last_changed_time: OffsetDateTime,
}

// ============================================================================
// SECTION: Action
// ============================================================================

/// Reconciled action for a deployment key.
///
/// # Invariants
/// - Exactly one action is assigned per key in the target set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Target exists, current does not.
    Create,
    /// Target and current exist and differ.
    Update,
    /// Target and current exist, are structurally equal, but carry output
    /// references that may have drifted upstream.
    ConditionalUpdate,
    /// Current exists, target does not.
    Destroy,
    /// Target and current exist and are structurally equal with no output
    /// references.
    NoChange,
}

impl Action {
    /// Returns true for actions that mutate resources (exclude `NoChange`).
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::NoChange)
    }

    /// Snake-case name, matching the `serde` wire representation; used for
    /// log fields instead of `Debug` formatting.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::ConditionalUpdate => "conditional_update",
            Self::Destroy => "destroy",
            Self::NoChange => "no_change",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Step State
// ============================================================================

/// Runtime state of a scheduler step.
///
/// # Invariants
/// - Transitions follow `Waiting -> Ready -> Running -> {Completed, Failed,
///   Skipped}`; `Pending` is a terminal substitute used only when a run is
///   interrupted before the step starts or finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Predecessors have not all completed yet.
    Waiting,
    /// All predecessors satisfied; eligible for dispatch.
    Ready,
    /// Currently executing in a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a non-retriable (or retries-exhausted) failure.
    Failed,
    /// Never ran because a predecessor failed or blocked it.
    Skipped,
    /// Never started or finished because the run was cancelled/aborted.
    Pending,
}

/// Reason a step was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipCause {
    /// A predecessor failed.
    UpstreamFailed {
        /// The predecessor's key.
        predecessor: DeploymentKey,
    },
    /// A `ConditionalUpdate` step resolved to no actual drift.
    ConditionalNoChange,
}
