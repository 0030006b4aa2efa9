// crates/deployer-config/src/lib.rs
// ============================================================================
// Crate: deployer-config
// Description: Package-file schema, loading, and resolution into a target
// deployment set.
// Purpose: The only crate that knows YAML; everything downstream of
// `resolve_targets` works with plain `deployer_core` types.
// Dependencies: see Cargo.toml
// ============================================================================

//! ## Overview
//! `deployer-config` owns the on-disk package file format. It deserializes
//! with `deny_unknown_fields` at every nesting level so a typo is a load-time
//! error, then [`resolve::resolve_targets`] drives `deployer-core`'s scope
//! expander, variable resolver, and module hasher to produce the target
//! deployment set the reconciler compares against persisted state.

mod error;
mod load;
mod model;
mod resolve;

pub use error::ConfigError;
pub use model::DefaultModuleConfiguration;
pub use model::DefaultVariables;
pub use model::ModuleDefinition;
pub use model::PackageConfiguration;
pub use model::PackageDefinition;
pub use resolve::resolve_targets;
