// crates/deployer-engines/src/template.rs
// ============================================================================
// Module: Template Engine
// Description: A reference `Dispatcher` that renders a module-relative
// template file by substituting `${variable_name}` placeholders with
// resolved variables, then hands the rendered file to a module-relative
// apply script.
// Purpose: Demonstrate a second, genuinely different engine shape (render
// then apply, rather than "run a script with input.json").
// Dependencies: deployer_core
// ============================================================================

//! ## Overview
//! `prepare` reads the module's template file (`opaque.template`, defaulting
//! to [`DEFAULT_TEMPLATE_NAME`]), replaces every `${name}` occurrence with
//! the matching entry of `variables` (rendered as its JSON string form for
//! non-string values), writes the result to `rendered` in the step's cache
//! directory, and describes an invocation of the module's apply script
//! (`opaque.apply`, defaulting to [`DEFAULT_APPLY_NAME`]) with the rendered
//! file's path as its sole argument. Substitution mirrors the
//! `${CURRENT_ACCOUNT_ID}`/`${CURRENT_REGION}` textual replacement the
//! variable resolver performs, generalized to arbitrary variable names.

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

/// Template file name used when a module's `opaque.template` is absent.
const DEFAULT_TEMPLATE_NAME: &str = "template";
/// Apply script name used when a module's `opaque.apply` is absent.
const DEFAULT_APPLY_NAME: &str = "apply";
/// Rendered file name written into the step's cache directory.
const RENDERED_FILE_NAME: &str = "rendered";

/// Renders a module-relative template, then applies it.
pub struct TemplateEngine {
    /// Each module's source directory.
    module_paths: BTreeMap<ModuleName, PathBuf>,
    /// Root directory rendered templates are written under.
    cache_root: PathBuf,
}

impl TemplateEngine {
    /// Creates a template engine serving the given module source
    /// directories, with rendered output written under `cache_root`.
    #[must_use]
    pub fn new(module_paths: BTreeMap<ModuleName, PathBuf>, cache_root: PathBuf) -> Self {
        Self { module_paths, cache_root }
    }

    /// Looks up a module's registered source directory.
    fn module_dir(&self, module: &ModuleName) -> Result<&Path, StepError> {
        self.module_paths.get(module).map(PathBuf::as_path).ok_or_else(|| StepError::EngineFailure(format!("no module source path registered for {module}")))
    }
}

/// Substitutes every `${name}` occurrence in `template` with the matching
/// entry of `variables`. A placeholder with no matching variable is left
/// untouched, matching the resolver's tolerant substitution style.
fn render(template: &str, variables: &Variables) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        rendered.push_str(&rest[.. start]);
        rest = &rest[start + 2 ..];
        let Some(end) = rest.find('}') else {
            rendered.push_str("${");
            break;
        };
        let name = &rest[.. end];
        match variables.get(name) {
            Some(serde_json::Value::String(value)) => rendered.push_str(value),
            Some(other) => rendered.push_str(&other.to_string()),
            None => {
                rendered.push_str("${");
                rendered.push_str(name);
                rendered.push('}');
            }
        }
        rest = &rest[end + 1 ..];
    }
    rendered.push_str(rest);
    rendered
}

#[async_trait]
impl Dispatcher for TemplateEngine {
    fn validate_module_config(&self, config: &ModuleConfig) -> Result<(), ValidationError> {
        for key in ["template", "apply"] {
            match config.opaque.get(key) {
                None | Some(serde_json::Value::String(_)) => {}
                Some(_) => return Err(ValidationError::MalformedPackage(format!("template engine's \"{key}\" opaque setting must be a string"))),
            }
        }
        Ok(())
    }

    async fn prepare(&self, key: &DeploymentKey, action: Action, variables: &Variables, config: &ModuleConfig) -> Result<Command, StepError> {
        let module_dir = self.module_dir(&key.module)?;
        let template_name = config.opaque.get("template").and_then(serde_json::Value::as_str).unwrap_or(DEFAULT_TEMPLATE_NAME);
        let apply_name = config.opaque.get("apply").and_then(serde_json::Value::as_str).unwrap_or(DEFAULT_APPLY_NAME);

        let template_contents = tokio::fs::read_to_string(module_dir.join(template_name))
            .await
            .map_err(|err| StepError::EngineFailure(format!("failed to read template {template_name}: {err}")))?;

        let cache_dir = self.cache_root.join(key.to_string().replace(['[', ']', ','], "_"));
        tokio::fs::create_dir_all(&cache_dir).await.map_err(|err| StepError::EngineFailure(format!("failed to create cache dir: {err}")))?;

        let rendered_path = cache_dir.join(RENDERED_FILE_NAME);
        tokio::fs::write(&rendered_path, render(&template_contents, variables))
            .await
            .map_err(|err| StepError::EngineFailure(format!("failed to write rendered template: {err}")))?;

        Ok(Command {
            program: module_dir.join(apply_name).to_string_lossy().into_owned(),
            args: vec![action_arg(action).to_string(), rendered_path.to_string_lossy().into_owned()],
            working_dir: module_dir.to_string_lossy().into_owned(),
            env: Variables::new(),
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

/// Maps an action to the argument the apply script expects for it.
const fn action_arg(action: Action) -> &'static str {
    match action {
        Action::Create => "create",
        Action::Update | Action::ConditionalUpdate => "update",
        Action::Destroy => "destroy",
        Action::NoChange => "no_change",
    }
}

#[cfg(test)]
mod tests {
    use deployer_core::AccountId;
    use deployer_core::Region;
    use tempfile::tempdir;

    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample_key() -> DeploymentKey {
        DeploymentKey { module: ModuleName::new("vpc"), account_id: AccountId::new("111111111111"), region: Region::new("eu-west-1") }
    }

    #[test]
    fn render_substitutes_known_variables_and_leaves_unknown_ones() {
        let mut variables = Variables::new();
        variables.insert("cidr".to_string(), serde_json::Value::String("10.0.0.0/16".to_string()));
        let rendered = render("cidr = ${cidr}, az = ${missing}", &variables);
        assert_eq!(rendered, "cidr = 10.0.0.0/16, az = ${missing}");
    }

    #[tokio::test]
    async fn prepare_renders_the_template_and_describes_the_apply_command() -> TestResult {
        let modules_dir = tempdir()?;
        let cache_root = tempdir()?;
        let module_dir = modules_dir.path().join("vpc");
        std::fs::create_dir_all(&module_dir)?;
        std::fs::write(module_dir.join(DEFAULT_TEMPLATE_NAME), "cidr = ${cidr}")?;
        std::fs::write(module_dir.join(DEFAULT_APPLY_NAME), "#!/bin/sh\n")?;

        let mut module_paths = BTreeMap::new();
        module_paths.insert(ModuleName::new("vpc"), module_dir.clone());
        let engine = TemplateEngine::new(module_paths, cache_root.path().to_path_buf());

        let mut variables = Variables::new();
        variables.insert("cidr".to_string(), serde_json::Value::String("10.0.0.0/16".to_string()));

        let key = sample_key();
        let command = engine.prepare(&key, Action::Create, &variables, &ModuleConfig::default()).await?;

        let rendered = std::fs::read_to_string(Path::new(&command.cache_dir).join(RENDERED_FILE_NAME))?;
        assert_eq!(rendered, "cidr = 10.0.0.0/16");
        assert_eq!(command.args[0], "create");
        Ok(())
    }

    #[test]
    fn postprocess_forces_empty_outputs_on_destroy() -> TestResult {
        let engine = TemplateEngine::new(BTreeMap::new(), PathBuf::from("/tmp"));
        let key = sample_key();
        let outcome = engine.postprocess(&key, Action::Destroy, br#"{"ignored":"value"}"#)?;
        assert!(outcome.outputs.is_empty());
        Ok(())
    }
}
