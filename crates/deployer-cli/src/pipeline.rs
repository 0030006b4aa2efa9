// crates/deployer-cli/src/pipeline.rs
// ============================================================================
// Module: Run Pipeline
// Description: Loads a package, refreshes the inventory, resolves targets
// and current state, reconciles, and builds the validated dependency graph
// every subcommand needs before it can act.
// Purpose: One place wiring deployer-config/deployer-core/deployer-state/
// deployer-engines together, so `main.rs` stays a thin command dispatch
// layer.
// Dependencies: deployer_config, deployer_core, deployer_engines,
// deployer_state, time, tracing
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use deployer_config::PackageDefinition;
use deployer_config::resolve_targets;
use deployer_core::Action;
use deployer_core::CurrentState;
use deployer_core::DependencyRef;
use deployer_core::DeploymentKey;
use deployer_core::Dispatcher;
use deployer_core::Graph;
use deployer_core::Inventory;
use deployer_core::InventoryCache;
use deployer_core::ModuleName;
use deployer_core::OutputRef;
use deployer_core::SchedulerStep;
use deployer_core::StepInput;
use deployer_core::TargetState;
use deployer_core::build_graph;
use deployer_core::reconcile;
use deployer_engines::CacheDirDispatcher;
use deployer_engines::EngineRegistry;
use deployer_engines::ScriptEngine;
use deployer_engines::TemplateEngine;
use deployer_state::ObjectStore;
use deployer_state::load_inventory_cache;
use deployer_state::load_state;
use deployer_state::object_store_for_location;
use deployer_state::save_inventory_cache;

use crate::error::CliError;
use crate::error::CliResult;
use crate::inventory_source::FileInventorySource;
use crate::routing::RoutingDispatcher;
use crate::scope_filter::ScopeFilterArgs;

/// Everything a subcommand's handler needs once the package/inventory/state
/// triple has been reconciled into a validated graph.
pub struct ResolvedPipeline {
    /// The parsed package definition.
    pub package: PackageDefinition,
    /// The inventory snapshot the run resolved scope against.
    pub inventory: Inventory,
    /// The object store backing persisted state and the inventory cache.
    pub object_store: Arc<dyn ObjectStore>,
    /// In-scope target deployment set.
    pub targets: BTreeMap<DeploymentKey, TargetState>,
    /// In-scope persisted current state.
    pub currents: BTreeMap<DeploymentKey, CurrentState>,
    /// Reconciled action per in-scope key.
    pub actions: BTreeMap<DeploymentKey, Action>,
    /// The validated dependency graph.
    pub graph: Graph,
    /// Per-key scheduler input, keyed the same as `actions`.
    pub scheduler_steps: BTreeMap<DeploymentKey, SchedulerStep>,
    /// The routing dispatcher, wrapped for deployment cache directory
    /// lifecycle management.
    pub dispatcher: Arc<CacheDirDispatcher>,
}

/// Inputs controlling one pipeline build.
pub struct PipelineOptions<'a> {
    /// Path to the package definition file.
    pub package_file: &'a Path,
    /// Directory module `path`s are resolved relative to (the package
    /// file's parent directory).
    pub package_root: &'a Path,
    /// Path to the JSON-encoded inventory snapshot the file-backed
    /// `InventorySource` reads.
    pub inventory_file: &'a Path,
    /// Directory engines may use for their own persistent cache state.
    pub engine_cache_root: &'a Path,
    /// `--force-orga-refresh`.
    pub force_orga_refresh: bool,
    /// `--force-update`.
    pub force_update: bool,
    /// `--keep-deployment-cache`.
    pub keep_deployment_cache: bool,
    /// Scope-narrowing flags, intersected with the package's own scope.
    pub scope: &'a ScopeFilterArgs,
}

/// Converts an unresolved output reference into the dependency edge it
/// implies.
fn output_ref_to_dependency(output_ref: &OutputRef) -> DependencyRef {
    DependencyRef {
        module: output_ref.module.clone(),
        account_id: output_ref.account_id.clone(),
        region: output_ref.region.clone(),
        ignore_if_not_exists: output_ref.ignore_if_not_exists,
    }
}

/// Returns the dependency edges a key contributes to the graph: its
/// declared `Dependencies` plus one synthetic edge per `VariablesFromOutputs`
/// entry, since the latter "induces edges identically to `Dependencies`".
/// `Destroy`-only keys (no resolved target) draw from the last persisted
/// declaration instead, since that is the only record of what they once
/// depended on.
fn dependencies_for(key: &DeploymentKey, targets: &BTreeMap<DeploymentKey, TargetState>, currents: &BTreeMap<DeploymentKey, CurrentState>) -> Vec<DependencyRef> {
    if let Some(target) = targets.get(key) {
        let mut deps = target.dependencies.clone();
        deps.extend(target.variables_from_outputs.values().map(output_ref_to_dependency));
        deps
    } else if let Some(current) = currents.get(key) {
        let mut deps = current.dependencies.clone();
        deps.extend(current.variables_from_outputs.values().map(output_ref_to_dependency));
        deps
    } else {
        Vec::new()
    }
}

/// Resolves every module's declared `path` against the package root.
fn module_paths(package: &PackageDefinition, package_root: &Path) -> BTreeMap<ModuleName, PathBuf> {
    package.modules.iter().map(|(name, definition)| (name.clone(), package_root.join(&definition.path))).collect()
}

/// Builds the engine registry this package's modules can route to.
fn build_registry(package: &PackageDefinition, package_root: &Path, cache_root: &Path) -> EngineRegistry {
    let paths = module_paths(package, package_root);
    let mut registry = EngineRegistry::new();
    registry.register("script", Arc::new(ScriptEngine::new(paths.clone(), cache_root.join("script"))));
    registry.register("template", Arc::new(TemplateEngine::new(paths, cache_root.join("template"))));
    registry
}

/// Returns true if `key` passes both the module-name filters and the
/// resolved account/region filter set.
fn in_scope(key: &DeploymentKey, scope: &ScopeFilterArgs, allowed_keys: &std::collections::BTreeSet<(deployer_core::AccountId, deployer_core::Region)>) -> bool {
    scope.allows_module(&key.module) && allowed_keys.contains(&(key.account_id.clone(), key.region.clone()))
}

/// Validates every resolved target's opaque module configuration against
/// its declared engine, before any step is scheduled.
///
/// # Errors
///
/// Returns [`CliError::UnknownEngine`] if a module declares an engine with
/// no registered implementation, and [`CliError::ModuleConfigInvalid`] if
/// the engine rejects the module's configuration.
pub fn validate_module_configs(package: &PackageDefinition, targets: &BTreeMap<DeploymentKey, TargetState>, registry: &EngineRegistry) -> CliResult<()> {
    for (key, target) in targets {
        let Some(definition) = package.modules.get(&key.module) else {
            continue;
        };
        let Some(engine) = registry.get(&definition.engine) else {
            return Err(CliError::UnknownEngine { module: key.module.to_string(), engine: definition.engine.clone() });
        };
        engine
            .validate_module_config(&target.module_config)
            .map_err(|source| CliError::ModuleConfigInvalid { module: key.module.to_string(), source })?;
    }
    Ok(())
}

/// Loads the package, refreshes the inventory, resolves and reconciles
/// targets against persisted state within the requested scope, and builds
/// the validated dependency graph.
///
/// # Errors
///
/// Propagates package loading, inventory refresh, state loading, module
/// configuration validation, and graph construction failures.
pub async fn build_pipeline(options: &PipelineOptions<'_>) -> CliResult<ResolvedPipeline> {
    let package = PackageDefinition::load(options.package_file)?;
    let object_store = object_store_for_location(&package.package.object_store_location).await?;

    let ttl_secs = i64::try_from(package.package.inventory_cache_ttl_secs).unwrap_or(i64::MAX);
    let mut inventory_cache = InventoryCache::new(time::Duration::seconds(ttl_secs));
    if let Some(cached) = load_inventory_cache(&*object_store).await? {
        inventory_cache.seed(cached);
    }
    let source = FileInventorySource::new(options.inventory_file);
    let inventory = inventory_cache
        .get(&source, time::OffsetDateTime::now_utc(), options.force_orga_refresh)?
        .clone();
    save_inventory_cache(&*object_store, &inventory).await?;

    let targets_all = resolve_targets(&package, &inventory, options.package_root)?;
    let currents_all = load_state(&*object_store).await?;

    let allowed_keys = options.scope.allowed_keys(&inventory)?;
    let targets: BTreeMap<DeploymentKey, TargetState> = targets_all.into_iter().filter(|(key, _)| in_scope(key, options.scope, &allowed_keys)).collect();
    let currents: BTreeMap<DeploymentKey, CurrentState> = currents_all.into_iter().filter(|(key, _)| in_scope(key, options.scope, &allowed_keys)).collect();

    let registry = build_registry(&package, options.package_root, options.engine_cache_root);
    validate_module_configs(&package, &targets, &registry)?;

    let actions = reconcile(&targets, &currents, options.force_update);

    let dependency_map: BTreeMap<DeploymentKey, Vec<DependencyRef>> = actions.keys().map(|key| (key.clone(), dependencies_for(key, &targets, &currents))).collect();
    let inputs: Vec<StepInput<'_>> = actions
        .iter()
        .map(|(key, action)| StepInput {
            key,
            action: *action,
            dependencies: dependency_map.get(key).map(Vec::as_slice).unwrap_or(&[]),
        })
        .collect();
    let graph = build_graph(&inputs)?;

    let scheduler_steps: BTreeMap<DeploymentKey, SchedulerStep> = actions
        .iter()
        .map(|(key, action)| {
            (
                key.clone(),
                SchedulerStep { key: key.clone(), action: *action, target: targets.get(key).cloned(), current: currents.get(key).cloned() },
            )
        })
        .collect();

    let module_engines: BTreeMap<ModuleName, String> = package.modules.iter().map(|(name, definition)| (name.clone(), definition.engine.clone())).collect();
    let router = RoutingDispatcher::new(module_engines, Arc::new(registry));
    let dispatcher = Arc::new(CacheDirDispatcher::new(Box::new(router) as Box<dyn Dispatcher>, options.keep_deployment_cache));

    Ok(ResolvedPipeline { package, inventory, object_store, targets, currents, actions, graph, scheduler_steps, dispatcher })
}

#[cfg(test)]
mod tests {
    use deployer_config::ModuleDefinition;
    use deployer_config::PackageConfiguration;
    use deployer_core::AccountId;
    use deployer_core::OutputRef;
    use deployer_core::Region;
    use deployer_engines::ScriptEngine;
    use time::OffsetDateTime;

    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample_key() -> DeploymentKey {
        DeploymentKey { module: ModuleName::new("vpc"), account_id: AccountId::new("111111111111"), region: Region::new("eu-west-1") }
    }

    fn sample_target() -> TargetState {
        TargetState {
            variables: Variables::new(),
            variables_from_outputs: VariablesFromOutputs::from([(
                "subnet_id".to_string(),
                OutputRef {
                    module: ModuleName::new("network"),
                    account_id: AccountId::new("111111111111"),
                    region: Region::new("eu-west-1"),
                    output_name: "subnet_id".to_string(),
                    ignore_if_not_exists: false,
                },
            )]),
            dependencies: vec![DependencyRef {
                module: ModuleName::new("iam"),
                account_id: AccountId::new("111111111111"),
                region: Region::new("eu-west-1"),
                ignore_if_not_exists: false,
            }],
            module_hash: "hash-a".to_string(),
            module_config: ModuleConfig::default(),
        }
    }

    fn sample_current() -> CurrentState {
        CurrentState {
            variables: Variables::new(),
            variables_from_outputs: VariablesFromOutputs::new(),
            dependencies: vec![DependencyRef {
                module: ModuleName::new("iam"),
                account_id: AccountId::new("111111111111"),
                region: Region::new("eu-west-1"),
                ignore_if_not_exists: false,
            }],
            module_hash: "hash-a".to_string(),
            outputs: Outputs::new(),
            last_changed_time: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn package_with_module(engine: &str) -> PackageDefinition {
        let mut modules = BTreeMap::new();
        modules.insert(
            ModuleName::new("vpc"),
            ModuleDefinition {
                engine: engine.to_string(),
                path: "modules/vpc".to_string(),
                hash_patterns: None,
                module_config: None,
                variables: Variables::new(),
                deployments: Vec::new(),
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
            defaults_variables: deployer_config::DefaultVariables::default(),
            defaults_module_config: deployer_config::DefaultModuleConfiguration::default(),
            modules,
        }
    }

    #[test]
    fn dependencies_for_target_includes_both_declared_and_output_derived_edges() {
        let key = sample_key();
        let targets = BTreeMap::from([(key.clone(), sample_target())]);
        let currents = BTreeMap::new();

        let deps = dependencies_for(&key, &targets, &currents);

        assert_eq!(deps.len(), 2);
        assert!(deps.iter().any(|dep| dep.module.to_string() == "iam"));
        assert!(deps.iter().any(|dep| dep.module.to_string() == "network"));
    }

    #[test]
    fn dependencies_for_destroy_only_key_falls_back_to_persisted_declaration() {
        let key = sample_key();
        let targets = BTreeMap::new();
        let currents = BTreeMap::from([(key.clone(), sample_current())]);

        let deps = dependencies_for(&key, &targets, &currents);

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].module.to_string(), "iam");
    }

    #[test]
    fn dependencies_for_unknown_key_is_empty() {
        let key = sample_key();
        let deps = dependencies_for(&key, &BTreeMap::new(), &BTreeMap::new());
        assert!(deps.is_empty());
    }

    #[test]
    fn validate_module_configs_rejects_an_engine_with_no_registered_dispatcher() -> TestResult {
        let package = package_with_module("terraform_cloud");
        let key = sample_key();
        let targets = BTreeMap::from([(key, sample_target())]);
        let registry = EngineRegistry::new();

        let Err(CliError::UnknownEngine { module, engine }) = validate_module_configs(&package, &targets, &registry) else {
            return Err("expected CliError::UnknownEngine".into());
        };
        assert_eq!(module, "vpc");
        assert_eq!(engine, "terraform_cloud");
        Ok(())
    }

    #[test]
    fn validate_module_configs_rejects_a_malformed_engine_opaque_setting() -> TestResult {
        let package = package_with_module("script");
        let key = sample_key();
        let mut target = sample_target();
        target.module_config.opaque.insert("script".to_string(), serde_json::json!(5));
        let targets = BTreeMap::from([(key, target)]);

        let mut registry = EngineRegistry::new();
        registry.register("script", std::sync::Arc::new(ScriptEngine::new(BTreeMap::new(), PathBuf::from("/tmp"))));

        let Err(CliError::ModuleConfigInvalid { module, .. }) = validate_module_configs(&package, &targets, &registry) else {
            return Err("expected CliError::ModuleConfigInvalid".into());
        };
        assert_eq!(module, "vpc");
        Ok(())
    }

    #[test]
    fn validate_module_configs_passes_for_a_valid_registered_engine() -> TestResult {
        let package = package_with_module("script");
        let key = sample_key();
        let targets = BTreeMap::from([(key, sample_target())]);

        let mut registry = EngineRegistry::new();
        registry.register("script", std::sync::Arc::new(ScriptEngine::new(BTreeMap::new(), PathBuf::from("/tmp"))));

        validate_module_configs(&package, &targets, &registry)?;
        Ok(())
    }
}
