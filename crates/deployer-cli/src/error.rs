// crates/deployer-cli/src/error.rs
// ============================================================================
// Module: CLI Errors
// Description: Wraps every fatal (pre-scheduling) failure the CLI can hit
// loading a package, refreshing the inventory, or building the graph.
// Purpose: One error type `main` can format and map to an exit code.
// Dependencies: deployer_config, deployer_core, deployer_state, thiserror
// ============================================================================

use deployer_core::GraphError;
use deployer_core::InventoryError;
use deployer_core::ValidationError;
use thiserror::Error;

/// Fatal CLI failure, surfaced to the operator and mapped to exit code 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// The package file could not be loaded or failed schema validation.
    #[error(transparent)]
    Config(#[from] deployer_config::ConfigError),
    /// The inventory could not be refreshed or read from the cache blob.
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    /// The persisted state store could not be read or written.
    #[error(transparent)]
    State(#[from] deployer_state::StateError),
    /// The dependency graph failed validation.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A CLI scope filter or a package's own scope predicate failed to
    /// expand against the inventory.
    #[error(transparent)]
    Scope(#[from] ValidationError),
    /// A module declared an engine with no registered implementation.
    #[error("module {module} declares unknown engine {engine}")]
    UnknownEngine {
        /// The module name.
        module: String,
        /// The unregistered engine name.
        engine: String,
    },
    /// A module's opaque configuration failed its engine's validation.
    #[error("module {module}: {source}")]
    ModuleConfigInvalid {
        /// The module name.
        module: String,
        /// The underlying validation error.
        #[source]
        source: ValidationError,
    },
    /// An output file could not be written.
    #[error("failed to write output file {path}: {source}")]
    OutputWrite {
        /// The path that could not be written.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// CLI result alias for fallible setup work.
pub type CliResult<T> = Result<T, CliError>;
