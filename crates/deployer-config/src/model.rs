// crates/deployer-config/src/model.rs
// ============================================================================
// Module: Package Definition Model
// Description: The serde model for a package file — package-wide settings,
// layered defaults, and per-module deployment blocks.
// Purpose: Give the loader a single schema to deserialize against with
// `deny_unknown_fields` enforced at every nesting level.
// Dependencies: deployer_core, serde, serde_json
// ============================================================================

//! ## Overview
//! A package file has three top-level sections: `package` (object store
//! location, inventory settings, concurrency), `defaults` (variables and
//! module configuration layered by engine name, with `all` applying to every
//! engine), and `modules` (one [`ModuleDefinition`] per module name, each
//! carrying its engine, its hash patterns, and one or more deployment
//! blocks). Every struct here rejects unknown fields so a typo in a package
//! file is a load-time error, not a silently ignored key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use deployer_core::DeploymentBlock;
use deployer_core::HashPatterns;
use deployer_core::ModuleConfig;
use deployer_core::ModuleName;
use deployer_core::Variables;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Package Configuration
// ============================================================================

/// Package-wide settings: `§6 PackageConfiguration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageConfiguration {
    /// URI of the object store holding persisted state (`file://`, `s3://`).
    pub object_store_location: String,
    /// Time-to-live, in seconds, for the cached inventory snapshot.
    #[serde(default = "default_inventory_cache_ttl_secs")]
    pub inventory_cache_ttl_secs: u64,
    /// Maximum steps running concurrently.
    #[serde(default = "default_concurrent_workers")]
    pub concurrent_workers: usize,
    /// Role to assume when refreshing the inventory, if any.
    #[serde(default)]
    pub inventory_assume_role: Option<String>,
    /// Account tag key whose value overrides the inventory's account name
    /// for name-glob matching, if set.
    #[serde(default)]
    pub account_name_override_tag_key: Option<String>,
}

/// Default inventory cache TTL, in seconds, when a package omits it.
const fn default_inventory_cache_ttl_secs() -> u64 {
    3600
}

/// Default number of concurrent workers when a package omits it.
const fn default_concurrent_workers() -> usize {
    10
}

// ============================================================================
// SECTION: Layered Defaults
// ============================================================================

/// Default variables, segmented by engine name; `all` applies regardless of
/// which engine a module uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultVariables {
    /// Variables layered under every engine.
    #[serde(default)]
    pub all: Variables,
    /// Variables layered under a specific engine name.
    #[serde(flatten)]
    pub by_engine: BTreeMap<String, Variables>,
}

/// Default module configuration, segmented by engine name; `all` applies
/// regardless of which engine a module uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultModuleConfiguration {
    /// Configuration layered under every engine.
    #[serde(default)]
    pub all: ModuleConfig,
    /// Configuration layered under a specific engine name.
    #[serde(flatten)]
    pub by_engine: BTreeMap<String, ModuleConfig>,
}

// ============================================================================
// SECTION: Module Definition
// ============================================================================

/// One module's definition: its engine, its source path, its hashed file
/// set, and the deployment blocks expanding it across accounts/regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDefinition {
    /// Engine name (`script`, `template`, or a registered custom engine).
    pub engine: String,
    /// Path to the module's source directory, relative to the package root.
    pub path: String,
    /// Include/exclude glob patterns overriding the engine's hash defaults.
    #[serde(default)]
    pub hash_patterns: Option<HashPatterns>,
    /// Module-level configuration override.
    #[serde(default)]
    pub module_config: Option<ModuleConfig>,
    /// Module-level variables, layered above engine/all defaults and below
    /// block-level variables.
    #[serde(default)]
    pub variables: Variables,
    /// Deployment blocks; an empty list matches nothing.
    pub deployments: Vec<DeploymentBlock>,
}

// ============================================================================
// SECTION: Package Definition
// ============================================================================

/// The top-level, deserialized package file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDefinition {
    /// Package-wide settings.
    pub package: PackageConfiguration,
    /// Layered default variables.
    #[serde(default)]
    pub defaults_variables: DefaultVariables,
    /// Layered default module configuration.
    #[serde(default)]
    pub defaults_module_config: DefaultModuleConfiguration,
    /// Modules keyed by name.
    pub modules: BTreeMap<ModuleName, ModuleDefinition>,
}
