// crates/deployer-core/src/error.rs
// ============================================================================
// Module: Error Taxonomy
// Description: Fatal (pre-scheduling) and per-step error kinds.
// Purpose: Give every subsystem a stable, programmatically matchable error
// surface, one thiserror enum per concern.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Two families of error exist: fatal errors abort the run before any step
//! executes (malformed package, inventory unavailable, graph construction
//! failures); per-step errors are recorded on the step and never abort the
//! run. See `crate::scheduler` and `crate::graph` for where each is raised.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::model::DeploymentKey;

// ============================================================================
// SECTION: Scope / Configuration Errors
// ============================================================================

/// Errors raised while expanding scope or validating configuration.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A block referenced a module, account, or region absent from the
    /// inventory, without `IgnoreIfNotExists`.
    #[error("reference to unknown {kind}: {value}")]
    UnknownReference {
        /// The kind of reference (module, account, account name, region, ...).
        kind: &'static str,
        /// The offending value.
        value: String,
    },
    /// A variable value referenced an unrecognized `${...}` placeholder.
    #[error("unrecognized substitution placeholder: {0}")]
    UnknownPlaceholder(String),
    /// The package file failed schema validation (unknown field, wrong type).
    #[error("invalid package definition: {0}")]
    MalformedPackage(String),
}

// ============================================================================
// SECTION: Inventory Errors
// ============================================================================

/// Errors raised while refreshing or reading the inventory cache.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The inventory source could not be reached and no valid cache exists.
    #[error("inventory unavailable: {0}")]
    Unavailable(String),
    /// The cached inventory blob failed to parse.
    #[error("inventory cache corrupt: {0}")]
    Corrupt(String),
}

// ============================================================================
// SECTION: Graph Construction Errors
// ============================================================================

/// Fatal errors raised while building the dependency graph, before any step
/// executes.
///
/// # Invariants
/// - Raising any variant here means zero steps in the run are dispatched.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A `Create`/`Update`/`ConditionalUpdate` step depends on a key with no
    /// step in this run and no current state.
    #[error("unmet dependency for {dependent}: {missing} does not exist and is not scheduled")]
    UnmetDependencyMissing {
        /// The step with the unmet dependency.
        dependent: DeploymentKey,
        /// The missing dependency key.
        missing: DeploymentKey,
    },
    /// A `Create`/`Update`/`ConditionalUpdate` step depends on a key that is
    /// scheduled for destruction in the same run.
    #[error("{dependent} depends on {scheduled_for_destroy}, which is scheduled for destroy")]
    DependencyScheduledForDestroy {
        /// The step with the conflicting dependency.
        dependent: DeploymentKey,
        /// The dependency scheduled for destroy.
        scheduled_for_destroy: DeploymentKey,
    },
    /// A `Destroy` step has a downstream consumer that is neither destroyed
    /// nor absent.
    #[error("{destroyed} cannot be destroyed: dependent {dependent} remains")]
    DependentRemainsAfterDestroy {
        /// The step being destroyed.
        destroyed: DeploymentKey,
        /// The dependent key that would be left dangling.
        dependent: DeploymentKey,
    },
    /// The dependency graph contains a cycle.
    #[error("The package contains circular dependencies")]
    CircularDependency {
        /// One key on the discovered cycle, for diagnostics.
        example_key: DeploymentKey,
    },
    /// Two deployment blocks resolved to the same key with conflicting
    /// steps (should be unreachable given reconciler invariants; defensive).
    #[error("duplicate step for key {0}")]
    DuplicateStep(DeploymentKey),
}

// ============================================================================
// SECTION: Per-Step Errors
// ============================================================================

/// Per-step failure kind, recorded on the step and never propagated as a
/// top-level `Result` error.
///
/// # Invariants
/// - `retriable()` determines whether the scheduler will re-attempt the step.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// A preview run found a predecessor with an unapplied pending change.
    #[error("preview blocked by pending upstream change at {upstream}")]
    PreviewBlockedByPendingUpstream {
        /// The upstream key with the pending change.
        upstream: DeploymentKey,
    },
    /// A required `VariablesFromOutputs` reference could not be resolved.
    #[error("upstream output missing: {upstream}.{output_name}")]
    UpstreamOutputMissing {
        /// The upstream key the output was expected from.
        upstream: DeploymentKey,
        /// The missing output name.
        output_name: String,
    },
    /// A predecessor step failed; this step is skipped, not retried.
    #[error("upstream step failed: {upstream}")]
    UpstreamFailed {
        /// The failed predecessor's key.
        upstream: DeploymentKey,
    },
    /// The engine subprocess exited non-zero or produced malformed
    /// `output.json`.
    #[error("engine failure: {0}")]
    EngineFailure(String),
    /// The step was still running when the run was aborted.
    #[error("interrupted")]
    Interrupted,
}

impl StepError {
    /// Returns whether the scheduler should retry after this failure.
    #[must_use]
    pub const fn retriable(&self) -> bool {
        matches!(self, Self::EngineFailure(_))
    }
}
