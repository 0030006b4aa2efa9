// crates/deployer-engines/src/script.rs
// ============================================================================
// Module: Script Engine
// Description: A reference `Dispatcher` that runs a module-relative
// executable script, passing it the deployment key/action/variables as
// `input.json` and reading its result back from `output.json`.
// Purpose: The simplest possible real engine; also the one the integration
// tests exercise end-to-end.
// Dependencies: deployer_core, deployer_engines::credentials
// ============================================================================

//! ## Overview
//! One `ScriptEngine` instance serves every module that declares
//! `engine: script`; it is constructed once per run with a module name to
//! source directory map and a cache root. `prepare` resolves the module's
//! script path (`opaque.script`, defaulting to [`DEFAULT_SCRIPT_NAME`]),
//! writes `input.json` into the step's cache directory, and describes a
//! `<script> <action>` invocation with that directory passed through the
//! `CACHE_DIR` environment variable, since the script's working directory
//! is the module source tree, not the cache directory. `postprocess` parses
//! `output.json` back into [`StepOutcome`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use deployer_core::Action;
use deployer_core::Command;
use deployer_core::Dispatcher;
use deployer_core::DeploymentKey;
use deployer_core::ModuleConfig;
use deployer_core::ModuleName;
use deployer_core::Outputs;
use deployer_core::StepError;
use deployer_core::StepOutcome;
use deployer_core::ValidationError;
use deployer_core::Variables;
use serde::Serialize;

use crate::credentials::assume_role_env;

/// Script file name used when a module's `opaque.script` is absent.
const DEFAULT_SCRIPT_NAME: &str = "run";
/// Input file name written into the step's cache directory before running.
const INPUT_FILE_NAME: &str = "input.json";

/// What a script receives on `input.json`.
#[derive(Debug, Serialize)]
struct ScriptInput<'a> {
    /// Module being deployed.
    module: &'a ModuleName,
    /// Target account id.
    account_id: &'a str,
    /// Target region.
    region: &'a str,
    /// Action the script should perform.
    action: Action,
    /// Resolved variables for this step.
    variables: &'a Variables,
}

/// Runs a module-relative executable script per step.
pub struct ScriptEngine {
    /// Each module's source directory.
    module_paths: BTreeMap<ModuleName, PathBuf>,
    /// Root directory per-deployment cache directories are created under.
    cache_root: PathBuf,
}

impl ScriptEngine {
    /// Creates a script engine serving the given module source directories,
    /// with per-deployment cache directories created under `cache_root`.
    #[must_use]
    pub fn new(module_paths: BTreeMap<ModuleName, PathBuf>, cache_root: PathBuf) -> Self {
        Self { module_paths, cache_root }
    }

    /// Looks up a module's registered source directory.
    fn module_dir(&self, module: &ModuleName) -> Result<&Path, StepError> {
        self.module_paths.get(module).map(PathBuf::as_path).ok_or_else(|| StepError::EngineFailure(format!("no module source path registered for {module}")))
    }

    /// Returns the module's configured script name, or [`DEFAULT_SCRIPT_NAME`].
    fn script_name(config: &ModuleConfig) -> &str {
        config.opaque.get("script").and_then(serde_json::Value::as_str).unwrap_or(DEFAULT_SCRIPT_NAME)
    }
}

#[async_trait]
impl Dispatcher for ScriptEngine {
    fn validate_module_config(&self, config: &ModuleConfig) -> Result<(), ValidationError> {
        match config.opaque.get("script") {
            None | Some(serde_json::Value::String(_)) => Ok(()),
            Some(_) => Err(ValidationError::MalformedPackage("script engine's \"script\" opaque setting must be a string".to_string())),
        }
    }

    async fn prepare(&self, key: &DeploymentKey, action: Action, variables: &Variables, config: &ModuleConfig) -> Result<Command, StepError> {
        let module_dir = self.module_dir(&key.module)?;
        let script_path = module_dir.join(Self::script_name(config));
        let cache_dir = self.cache_root.join(key.to_string().replace(['[', ']', ','], "_"));

        tokio::fs::create_dir_all(&cache_dir).await.map_err(|err| StepError::EngineFailure(format!("failed to create cache dir: {err}")))?;

        let input = ScriptInput { module: &key.module, account_id: key.account_id.as_str(), region: key.region.as_str(), action, variables };
        let input_bytes = serde_json::to_vec_pretty(&input).map_err(|err| StepError::EngineFailure(format!("failed to encode input.json: {err}")))?;
        tokio::fs::write(cache_dir.join(INPUT_FILE_NAME), input_bytes).await.map_err(|err| StepError::EngineFailure(format!("failed to write input.json: {err}")))?;

        let mut env = Variables::new();
        env.insert("CACHE_DIR".to_string(), serde_json::Value::String(cache_dir.to_string_lossy().into_owned()));
        if let Some(role_arn) = &config.assume_role {
            let credential_env = assume_role_env(role_arn).await.map_err(|err| StepError::EngineFailure(err.to_string()))?;
            for (name, value) in credential_env {
                env.insert(name, serde_json::Value::String(value));
            }
        }
        for (name, url) in &config.endpoint_urls {
            env.insert(format!("ENDPOINT_URL_{name}"), serde_json::Value::String(url.clone()));
        }

        Ok(Command {
            program: script_path.to_string_lossy().into_owned(),
            args: vec![action_arg(action).to_string()],
            working_dir: module_dir.to_string_lossy().into_owned(),
            env,
            cache_dir: cache_dir.to_string_lossy().into_owned(),
        })
    }

    fn postprocess(&self, _key: &DeploymentKey, action: Action, raw_output: &[u8]) -> Result<StepOutcome, StepError> {
        if action == Action::Destroy {
            return Ok(StepOutcome { outputs: Outputs::new() });
        }
        let outputs: Outputs = serde_json::from_slice(raw_output).map_err(|err| StepError::EngineFailure(format!("malformed output.json: {err}")))?;
        Ok(StepOutcome { outputs })
    }
}

const fn action_arg(action: Action) -> &'static str {
    match action {
        Action::Create => "create",
        Action::Update | Action::ConditionalUpdate => "update",
        Action::Destroy => "destroy",
        Action::NoChange => "no_change",
    }
}
