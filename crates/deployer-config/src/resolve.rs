// crates/deployer-config/src/resolve.rs
// ============================================================================
// Module: Package Resolution
// Description: Ties scope expansion, variable resolution, and module
// hashing together to turn a parsed package into a target deployment set.
// Purpose: The single entry point `deployer-cli` calls after loading a
// package file and an inventory snapshot.
// Dependencies: crate::error, crate::model, deployer_core
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use deployer_core::AccountId;
use deployer_core::DeploymentKey;
use deployer_core::HashPatterns;
use deployer_core::Inventory;
use deployer_core::ModuleConfig;
use deployer_core::Region;
use deployer_core::TargetState;
use deployer_core::Variables;
use deployer_core::expand_module;
use deployer_core::hash_module;
use deployer_core::resolve as resolve_variables;

use crate::error::ConfigError;
use crate::model::DefaultModuleConfiguration;
use crate::model::DefaultVariables;
use crate::model::ModuleDefinition;
use crate::model::PackageDefinition;

// ============================================================================
// SECTION: Default Layer Selection
// ============================================================================

/// Returns the engine-specific variable layer, or an empty map if the
/// package declares no defaults for `engine`.
fn variables_for_engine(defaults: &DefaultVariables, engine: &str) -> Variables {
    defaults.by_engine.get(engine).cloned().unwrap_or_default()
}

/// Merges `all` with the engine-specific override, same override rules as
/// a block-level `module_config` override in `deployer_core::variables`.
fn module_config_default_for_engine(defaults: &DefaultModuleConfiguration, engine: &str) -> ModuleConfig {
    let Some(engine_override) = defaults.by_engine.get(engine) else {
        return defaults.all.clone();
    };
    merge_module_config(&defaults.all, engine_override)
}

/// Applies `override_config` on top of `base`, same override rules as a
/// block-level `module_config` override in `deployer_core::variables`:
/// `assume_role`/`retry` replace wholesale when set, `endpoint_urls`/`opaque`
/// extend by key.
fn merge_module_config(base: &ModuleConfig, override_config: &ModuleConfig) -> ModuleConfig {
    let mut merged = base.clone();
    if override_config.assume_role.is_some() {
        merged.assume_role = override_config.assume_role.clone();
    }
    if override_config.retry != ModuleConfig::default().retry {
        merged.retry = override_config.retry;
    }
    for (name, url) in &override_config.endpoint_urls {
        merged.endpoint_urls.insert(name.clone(), url.clone());
    }
    for (name, value) in &override_config.opaque {
        merged.opaque.insert(name.clone(), value.clone());
    }
    merged
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves every module in `package` against `inventory`, producing one
/// [`TargetState`] per matched `(module, account, region)` key.
///
/// `package_root` is the directory a module's `path` is relative to, used
/// to locate its source files for hashing.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] if scope expansion or variable
/// substitution fails for a module, and [`ConfigError::ModuleHash`] if a
/// module's source directory cannot be read.
pub fn resolve_targets(
    package: &PackageDefinition,
    inventory: &Inventory,
    package_root: &Path,
) -> Result<BTreeMap<DeploymentKey, TargetState>, ConfigError> {
    let mut targets = BTreeMap::new();

    for (module_name, definition) in &package.modules {
        let defaults_all = &package.defaults_variables.all;
        let defaults_engine = variables_for_engine(&package.defaults_variables, &definition.engine);
        let engine_module_config_default = module_config_default_for_engine(&package.defaults_module_config, &definition.engine);
        let module_config_default = match &definition.module_config {
            Some(module_override) => merge_module_config(&engine_module_config_default, module_override),
            None => engine_module_config_default,
        };

        let expanded = expand_module(module_name, &definition.deployments, inventory).map_err(|source| ConfigError::Validation {
            module: module_name.as_str().to_string(),
            source,
        })?;

        let module_hash = hash_for_module(package_root, definition).map_err(|source| ConfigError::ModuleHash {
            module: module_name.as_str().to_string(),
            source,
        })?;

        for ((account_id, region), block) in expanded {
            let key = DeploymentKey {
                module: module_name.clone(),
                account_id: account_id.clone(),
                region: region.clone(),
            };
            let resolved = resolve_variables(
                &key,
                defaults_all,
                &defaults_engine,
                &definition.variables,
                &module_config_default,
                &block,
            )
            .map_err(|source| ConfigError::Validation {
                module: module_name.as_str().to_string(),
                source,
            })?;

            targets.insert(
                key,
                TargetState {
                    variables: resolved.variables,
                    variables_from_outputs: resolved.variables_from_outputs,
                    dependencies: resolved.dependencies,
                    module_hash: module_hash.clone(),
                    module_config: resolved.module_config,
                },
            );
        }
    }

    Ok(targets)
}

/// Hashes a module's source tree under its declared (or default) patterns.
fn hash_for_module(package_root: &Path, definition: &ModuleDefinition) -> std::io::Result<String> {
    let module_root = package_root.join(&definition.path);
    let patterns = definition.hash_patterns.clone().unwrap_or_default();
    hash_module(&module_root, &patterns)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;

    use deployer_core::DeploymentBlock;
    use deployer_core::Inventory;
    use deployer_core::inventory::Account;
    use tempfile::tempdir;
    use time::macros::datetime;

    use super::*;
    use crate::model::PackageConfiguration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn inventory_with_one_account() -> Inventory {
        let account = Account {
            id: AccountId::new("111111111111"),
            name: "one".to_string(),
            parent_ous: vec![],
            tags: BTreeMap::new(),
            enabled_regions: BTreeSet::from([Region::new("eu-west-1")]),
            active: true,
        };
        Inventory {
            accounts: BTreeMap::from([(account.id.clone(), account)]),
            organizational_units: BTreeMap::new(),
            generated_at: datetime!(2026-01-01 00:00:00 UTC),
        }
    }

    fn package_with_one_module(module_path: &str) -> PackageDefinition {
        let mut modules = BTreeMap::new();
        modules.insert(
            "vpc".into(),
            ModuleDefinition {
                engine: "script".to_string(),
                path: module_path.to_string(),
                hash_patterns: None,
                module_config: None,
                variables: Variables::new(),
                deployments: vec![DeploymentBlock::default()],
            },
        );
        PackageDefinition {
            package: PackageConfiguration {
                object_store_location: "file:///tmp/state".to_string(),
                inventory_cache_ttl_secs: 3600,
                concurrent_workers: 10,
                inventory_assume_role: None,
                account_name_override_tag_key: None,
            },
            defaults_variables: DefaultVariables::default(),
            defaults_module_config: DefaultModuleConfiguration::default(),
            modules,
        }
    }

    #[test]
    fn resolves_one_module_across_the_inventory() -> TestResult {
        let dir = tempdir()?;
        fs::write(dir.path().join("main.tf"), b"resource {}")?;
        let package = package_with_one_module(".");
        let inventory = inventory_with_one_account();

        let targets = resolve_targets(&package, &inventory, dir.path())?;
        assert_eq!(targets.len(), 1);
        let key = DeploymentKey::new("vpc", "111111111111", "eu-west-1");
        let Some(target) = targets.get(&key) else {
            return Err("expected a resolved target".into());
        };
        assert!(!target.module_hash.is_empty());
        Ok(())
    }

    #[test]
    fn engine_defaults_layer_under_module_variables() -> TestResult {
        let dir = tempdir()?;
        fs::write(dir.path().join("main.tf"), b"resource {}")?;
        let mut package = package_with_one_module(".");
        package
            .defaults_variables
            .by_engine
            .insert("script".to_string(), Variables::from([("region_alias".to_string(), serde_json::json!("default"))]));
        let inventory = inventory_with_one_account();

        let targets = resolve_targets(&package, &inventory, dir.path())?;
        let key = DeploymentKey::new("vpc", "111111111111", "eu-west-1");
        let Some(target) = targets.get(&key) else {
            return Err("expected a resolved target".into());
        };
        assert_eq!(target.variables["region_alias"], serde_json::json!("default"));
        Ok(())
    }
}
