// crates/deployer-cli/src/routing.rs
// ============================================================================
// Module: Routing Dispatcher
// Description: A `Dispatcher` that forwards every call to the concrete
// engine the acting module declared, looked up in an `EngineRegistry`.
// Purpose: `deployer_core::scheduler::run` is generic over exactly one
// `Dispatcher` implementation per call, but a package may mix engines
// across modules; this is the seam that reconciles the two.
// Dependencies: async-trait, deployer_core, deployer_engines
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use deployer_core::Action;
use deployer_core::Command;
use deployer_core::Dispatcher;
use deployer_core::DeploymentKey;
use deployer_core::ModuleConfig;
use deployer_core::ModuleName;
use deployer_core::StepError;
use deployer_core::StepOutcome;
use deployer_core::ValidationError;
use deployer_core::Variables;
use deployer_engines::EngineRegistry;

/// Dispatches each step to the engine its module declared.
///
/// `validate_module_config` is intentionally a permissive no-op here: the
/// `Dispatcher` trait gives it no module key to resolve the right concrete
/// engine from. Per-module validation instead runs as an explicit pass over
/// every resolved target before scheduling starts (see `pipeline::validate_module_configs`).
pub struct RoutingDispatcher {
    /// Each module's declared engine name.
    module_engines: BTreeMap<ModuleName, String>,
    /// The registered engine implementations to route to.
    registry: Arc<EngineRegistry>,
}

impl RoutingDispatcher {
    /// Builds a router from each module's declared engine name.
    #[must_use]
    pub fn new(module_engines: BTreeMap<ModuleName, String>, registry: Arc<EngineRegistry>) -> Self {
        Self { module_engines, registry }
    }

    /// Resolves the concrete engine a module's declared engine name points
    /// at, failing closed if the module is unknown or the name is
    /// unregistered.
    fn engine_for(&self, module: &ModuleName) -> Result<Arc<dyn Dispatcher>, StepError> {
        let engine_name = self
            .module_engines
            .get(module)
            .ok_or_else(|| StepError::EngineFailure(format!("module {module} has no declared engine")))?;
        self.registry
            .get(engine_name)
            .ok_or_else(|| StepError::EngineFailure(format!("module {module} declares unknown engine {engine_name}")))
    }
}

#[async_trait]
impl Dispatcher for RoutingDispatcher {
    fn validate_module_config(&self, _config: &ModuleConfig) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn prepare(&self, key: &DeploymentKey, action: Action, variables: &Variables, config: &ModuleConfig) -> Result<Command, StepError> {
        let engine = self.engine_for(&key.module)?;
        engine.prepare(key, action, variables, config).await
    }

    fn postprocess(&self, key: &DeploymentKey, action: Action, raw_output: &[u8]) -> Result<StepOutcome, StepError> {
        let engine = self.engine_for(&key.module)?;
        engine.postprocess(key, action, raw_output)
    }
}
