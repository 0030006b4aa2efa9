// crates/deployer-engines/src/cache_dir.rs
// ============================================================================
// Module: Deployment Cache Directory Lifecycle
// Description: Wraps a `Dispatcher` so the deployment cache directory is
// created before `prepare` and removed after `postprocess`.
// Purpose: Keep the create/delete bookkeeping out of every concrete engine;
// `--keep-deployment-cache` is a single flag here rather than threaded
// through each engine's implementation.
// Dependencies: deployer_core, tokio::fs
// ============================================================================

//! ## Overview
//! `Dispatcher::postprocess` only receives the raw output bytes, not the
//! `Command` that produced them, so the path created in `prepare` is
//! remembered in a small in-memory map keyed by deployment key and consumed
//! when `postprocess` runs for that same key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use deployer_core::Action;
use deployer_core::Command;
use deployer_core::Dispatcher;
use deployer_core::DeploymentKey;
use deployer_core::ModuleConfig;
use deployer_core::StepError;
use deployer_core::StepOutcome;
use deployer_core::ValidationError;
use deployer_core::Variables;

// ============================================================================
// SECTION: Wrapper
// ============================================================================

/// Wraps `inner`, creating its deployment cache directory before `prepare`
/// delegates and removing it after `postprocess` delegates, unless
/// `keep_deployment_cache` is set.
///
/// # Invariants
/// - The engine cache directory (shared across steps, persisting across
///   runs) is never touched here; only the per-step deployment cache
///   directory named in the `Command` the inner engine returns.
/// - No step runs twice concurrently for the same key (guaranteed by the
///   scheduler), so the prepare/postprocess pair for a key never races.
pub struct CacheDirDispatcher {
    /// Wrapped engine the actual prepare/postprocess work is delegated to.
    inner: Box<dyn Dispatcher>,
    /// Whether to leave each step's cache directory in place after the run.
    keep_deployment_cache: bool,
    /// Cache directory path remembered between `prepare` and `postprocess` per key.
    cache_dirs: Mutex<BTreeMap<DeploymentKey, String>>,
}

impl CacheDirDispatcher {
    /// Wraps `inner`, keeping each step's cache directory after the run only
    /// if `keep_deployment_cache` is set (the `--keep-deployment-cache` CLI
    /// flag).
    #[must_use]
    pub fn new(inner: Box<dyn Dispatcher>, keep_deployment_cache: bool) -> Self {
        Self {
            inner,
            keep_deployment_cache,
            cache_dirs: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl Dispatcher for CacheDirDispatcher {
    fn validate_module_config(&self, config: &ModuleConfig) -> Result<(), ValidationError> {
        self.inner.validate_module_config(config)
    }

    async fn prepare(&self, key: &DeploymentKey, action: Action, variables: &Variables, config: &ModuleConfig) -> Result<Command, StepError> {
        let command = self.inner.prepare(key, action, variables, config).await?;
        tokio::fs::create_dir_all(&command.cache_dir)
            .await
            .map_err(|err| StepError::EngineFailure(format!("failed to create deployment cache dir {}: {err}", command.cache_dir)))?;
        if let Ok(mut cache_dirs) = self.cache_dirs.lock() {
            cache_dirs.insert(key.clone(), command.cache_dir.clone());
        }
        Ok(command)
    }

    fn postprocess(&self, key: &DeploymentKey, action: Action, raw_output: &[u8]) -> Result<StepOutcome, StepError> {
        let outcome = self.inner.postprocess(key, action, raw_output);
        let cache_dir = self.cache_dirs.lock().ok().and_then(|mut cache_dirs| cache_dirs.remove(key));
        if !self.keep_deployment_cache {
            if let Some(cache_dir) = cache_dir {
                if let Err(err) = std::fs::remove_dir_all(&cache_dir) {
                    tracing::warn!(%key, %cache_dir, error = %err, "failed to remove deployment cache directory");
                }
            }
        }
        outcome
    }
}
