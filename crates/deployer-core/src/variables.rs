// crates/deployer-core/src/variables.rs
// ============================================================================
// Module: Variable Resolver
// Description: Layers variable defaults with module- and block-level
// overrides, then substitutes `${CURRENT_*}` placeholders.
// Purpose: Produce the final, per-key variables/dependencies/module
// configuration consumed by the reconciler and the engine dispatcher.
// Dependencies: crate::error, crate::model, crate::scope, serde_json
// ============================================================================

//! ## Overview
//! Four layers contribute variables for a key, innermost wins:
//! `defaults.all` < `defaults.<engine>` < module-level < block-level.
//! Objects merge recursively (deep merge); scalars and arrays are replaced
//! wholesale by the more specific layer. Once the layers are merged and the
//! key is fixed, `${CURRENT_ACCOUNT_ID}` and `${CURRENT_REGION}` are
//! substituted textually wherever they appear — in variable string values,
//! in `DependencyRef.account_id`/`region`, and in module configuration
//! strings — regardless of which layer contributed the string. Any other
//! `${...}` placeholder left in the merged result is an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ValidationError;
use crate::model::AccountId;
use crate::model::DependencyRef;
use crate::model::DeploymentKey;
use crate::model::ModuleConfig;
use crate::model::Region;
use crate::model::Variables;
use crate::model::VariablesFromOutputs;
use crate::scope::ExpandedBlock;

// ============================================================================
// SECTION: Deep Merge
// ============================================================================

/// Merges `from` into `into`, innermost (`from`) wins; JSON objects merge
/// key-by-key recursively, everything else is replaced wholesale.
fn deep_merge(into: &mut Value, from: &Value) {
    match (into, from) {
        (Value::Object(into_map), Value::Object(from_map)) => {
            for (key, value) in from_map {
                match into_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        into_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (into_slot, from_value) => *into_slot = from_value.clone(),
    }
}

/// Layers `from` over `into`, deep-merging map values and overwriting
/// everything else.
fn merge_variables(into: &mut Variables, from: &Variables) {
    for (name, value) in from {
        match into.get_mut(name) {
            Some(existing) => deep_merge(existing, value),
            None => {
                into.insert(name.clone(), value.clone());
            }
        }
    }
}

// ============================================================================
// SECTION: Substitution
// ============================================================================

const ACCOUNT_PLACEHOLDER: &str = "${CURRENT_ACCOUNT_ID}";
const REGION_PLACEHOLDER: &str = "${CURRENT_REGION}";

/// Substitutes `${CURRENT_ACCOUNT_ID}`/`${CURRENT_REGION}` in `input`.
///
/// # Errors
///
/// Returns [`ValidationError::UnknownPlaceholder`] if any other `${...}`
/// token remains after substitution.
fn substitute_str(input: &str, key: &DeploymentKey) -> Result<String, ValidationError> {
    let replaced = input
        .replace(ACCOUNT_PLACEHOLDER, key.account_id.as_str())
        .replace(REGION_PLACEHOLDER, key.region.as_str());
    if let Some(start) = replaced.find("${") {
        if let Some(end) = replaced[start..].find('}') {
            let token = &replaced[start..start + end + 1];
            return Err(ValidationError::UnknownPlaceholder(token.to_string()));
        }
    }
    Ok(replaced)
}

/// Recursively applies [`substitute_str`] to every string leaf in `value`.
fn substitute_value(value: &Value, key: &DeploymentKey) -> Result<Value, ValidationError> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_str(s, key)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, key))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute_value(v, key)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Applies placeholder substitution to every value in a variables map.
fn substitute_variables(variables: &Variables, key: &DeploymentKey) -> Result<Variables, ValidationError> {
    variables
        .iter()
        .map(|(name, value)| substitute_value(value, key).map(|v| (name.clone(), v)))
        .collect()
}

/// Applies placeholder substitution to a dependency's account and region.
fn substitute_dependency(dep: &DependencyRef, key: &DeploymentKey) -> Result<DependencyRef, ValidationError> {
    Ok(DependencyRef {
        module: dep.module.clone(),
        account_id: AccountId::new(substitute_str(dep.account_id.as_str(), key)?),
        region: Region::new(substitute_str(dep.region.as_str(), key)?),
        ignore_if_not_exists: dep.ignore_if_not_exists,
    })
}

/// Applies placeholder substitution to every string field of a module configuration.
fn substitute_module_config(config: &ModuleConfig, key: &DeploymentKey) -> Result<ModuleConfig, ValidationError> {
    let assume_role = config
        .assume_role
        .as_deref()
        .map(|role| substitute_str(role, key))
        .transpose()?;
    let mut endpoint_urls = BTreeMap::new();
    for (name, url) in &config.endpoint_urls {
        endpoint_urls.insert(name.clone(), substitute_str(url, key)?);
    }
    let mut opaque = serde_json::Map::with_capacity(config.opaque.len());
    for (name, value) in &config.opaque {
        opaque.insert(name.clone(), substitute_value(value, key)?);
    }
    Ok(ModuleConfig {
        assume_role,
        retry: config.retry,
        endpoint_urls,
        opaque,
    })
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Fully resolved, substituted per-key layers, ready for the module hasher
/// and reconciler to assemble into a [`crate::model::TargetState`].
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// Final merged and substituted variables.
    pub variables: Variables,
    /// Final output references (block-level wins if any were declared).
    pub variables_from_outputs: VariablesFromOutputs,
    /// Final dependency list, substituted.
    pub dependencies: Vec<DependencyRef>,
    /// Final module configuration, substituted.
    pub module_config: ModuleConfig,
}

/// Layers and substitutes variables/config for a single deployment key.
///
/// Precedence, innermost wins: `defaults_all` < `defaults_engine` <
/// `module_variables`/`module_config_default` < `block`.
///
/// # Errors
///
/// Returns [`ValidationError::UnknownPlaceholder`] if a merged string
/// retains an unrecognized `${...}` token after substitution.
pub fn resolve(
    key: &DeploymentKey,
    defaults_all: &Variables,
    defaults_engine: &Variables,
    module_variables: &Variables,
    module_config_default: &ModuleConfig,
    block: &ExpandedBlock,
) -> Result<ResolvedTarget, ValidationError> {
    let mut variables = Variables::new();
    merge_variables(&mut variables, defaults_all);
    merge_variables(&mut variables, defaults_engine);
    merge_variables(&mut variables, module_variables);
    merge_variables(&mut variables, &block.variables);

    let module_config = match &block.module_config {
        Some(override_config) => {
            let mut merged = module_config_default.clone();
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
        None => module_config_default.clone(),
    };

    let variables = substitute_variables(&variables, key)?;
    let module_config = substitute_module_config(&module_config, key)?;
    let dependencies = block
        .dependencies
        .iter()
        .map(|dep| substitute_dependency(dep, key))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResolvedTarget {
        variables,
        variables_from_outputs: block.variables_from_outputs.clone(),
        dependencies,
        module_config,
    })
}
