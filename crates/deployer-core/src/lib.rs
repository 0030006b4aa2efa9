// crates/deployer-core/src/lib.rs
// ============================================================================
// Crate: deployer-core
// Description: Engine-agnostic orchestration — scope expansion, variable
// resolution, reconciliation, the dependency graph, and the scheduler.
// Purpose: The single source of truth for "what should happen and in what
// order", independent of how any given module is actually deployed.
// Dependencies: see Cargo.toml
// ============================================================================

//! ## Overview
//! `deployer-core` has no knowledge of YAML, object storage, or any
//! particular cloud provider. It consumes an already-parsed package (from
//! `deployer-config`), an inventory snapshot, and a current-state snapshot
//! (from `deployer-state`), and produces a validated dependency graph plus a
//! scheduler that drives it to completion through the [`engine::Dispatcher`]
//! trait boundary. `deployer-cli` wires the concrete crates together.

pub mod engine;
pub mod error;
pub mod graph;
pub mod hashing;
pub mod inventory;
pub mod model;
pub mod reconcile;
pub mod scheduler;
pub mod scope;
pub mod variables;

pub use engine::Command;
pub use engine::Dispatcher;
pub use engine::StepOutcome;
pub use error::GraphError;
pub use error::InventoryError;
pub use error::StepError;
pub use error::ValidationError;
pub use graph::Graph;
pub use graph::Step;
pub use graph::StepInput;
pub use graph::build_graph;
pub use hashing::HashPatterns;
pub use hashing::hash_module;
pub use inventory::Account;
pub use inventory::Inventory;
pub use inventory::InventoryCache;
pub use inventory::InventorySource;
pub use inventory::OrganizationalUnit;
pub use model::Action;
pub use model::AccountId;
pub use model::CurrentState;
pub use model::DependencyRef;
pub use model::DeploymentKey;
pub use model::ModuleConfig;
pub use model::ModuleName;
pub use model::OutputRef;
pub use model::Outputs;
pub use model::Region;
pub use model::RetryPolicy;
pub use model::SkipCause;
pub use model::StepState;
pub use model::TargetState;
pub use model::Variables;
pub use model::VariablesFromOutputs;
pub use reconcile::reconcile;
pub use scheduler::CancellationStage;
pub use scheduler::ProcessRunner;
pub use scheduler::SchedulerConfig;
pub use scheduler::SchedulerStep;
pub use scheduler::StepRunRecord;
pub use scope::DeploymentBlock;
pub use scope::ExpandedBlock;
pub use scope::Predicate;
pub use scope::expand_module;
pub use variables::ResolvedTarget;
pub use variables::resolve;
