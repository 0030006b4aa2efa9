// crates/deployer-core/src/reconcile.rs
// ============================================================================
// Module: Reconciler
// Description: Classifies each deployment key's action by comparing target
// and current state.
// Purpose: Produce the single action the graph builder and scheduler key
// their behavior off of.
// Dependencies: crate::model
// ============================================================================

//! ## Overview
//! Exactly one [`Action`] is assigned per key present in either the target
//! or the current set. The classification only looks at
//! `variables`, `variables_from_outputs`, `dependencies`, and `module_hash`;
//! `outputs` and `last_changed_time` are history, not declaration, and never
//! affect the comparison.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::model::Action;
use crate::model::CurrentState;
use crate::model::DeploymentKey;
use crate::model::TargetState;

// ============================================================================
// SECTION: Equality
// ============================================================================

/// Returns true if `target` and `current` declare the same deployment,
/// ignoring history fields (`outputs`, `last_changed_time`).
fn declarations_match(target: &TargetState, current: &CurrentState) -> bool {
    target.variables == current.variables
        && target.variables_from_outputs == current.variables_from_outputs
        && target.dependencies == current.dependencies
        && target.module_hash == current.module_hash
}

// ============================================================================
// SECTION: Reconciliation
// ============================================================================

/// Classifies the action for every key present in `targets` or `currents`.
///
/// # Invariants
/// - Every key in `targets` or `currents` (or both) gets exactly one entry
///   in the returned map.
/// - `force_update` promotes `NoChange`/`ConditionalUpdate` to `Update` for
///   keys present in both sets; it has no effect on `Create`/`Destroy`.
#[must_use]
pub fn reconcile(
    targets: &BTreeMap<DeploymentKey, TargetState>,
    currents: &BTreeMap<DeploymentKey, CurrentState>,
    force_update: bool,
) -> BTreeMap<DeploymentKey, Action> {
    let mut actions = BTreeMap::new();

    for key in targets.keys().chain(currents.keys()) {
        if actions.contains_key(key) {
            continue;
        }
        let action = match (targets.get(key), currents.get(key)) {
            (Some(_), None) => Action::Create,
            (None, Some(_)) => Action::Destroy,
            (Some(target), Some(current)) => {
                if !declarations_match(target, current) {
                    Action::Update
                } else if force_update {
                    Action::Update
                } else if target.variables_from_outputs.is_empty() {
                    Action::NoChange
                } else {
                    Action::ConditionalUpdate
                }
            }
            (None, None) => unreachable!("key drawn from targets or currents"),
        };
        actions.insert(key.clone(), action);
    }

    actions
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::model::ModuleConfig;
    use crate::model::Outputs;
    use crate::model::Variables;
    use crate::model::VariablesFromOutputs;

    fn key() -> DeploymentKey {
        DeploymentKey::new("vpc", "111111111111", "eu-west-1")
    }

    fn target(variables: Variables, outputs_refs: VariablesFromOutputs) -> TargetState {
        TargetState {
            variables,
            variables_from_outputs: outputs_refs,
            dependencies: vec![],
            module_hash: "h1".to_string(),
            module_config: ModuleConfig::default(),
        }
    }

    fn current(variables: Variables, outputs_refs: VariablesFromOutputs) -> CurrentState {
        CurrentState {
            variables,
            variables_from_outputs: outputs_refs,
            dependencies: vec![],
            module_hash: "h1".to_string(),
            outputs: Outputs::new(),
            last_changed_time: datetime!(2026-01-01 00:00:00 UTC),
        }
    }

    #[test]
    fn create_when_only_target_exists() {
        let mut targets = BTreeMap::new();
        targets.insert(key(), target(Variables::new(), VariablesFromOutputs::new()));
        let actions = reconcile(&targets, &BTreeMap::new(), false);
        assert_eq!(actions[&key()], Action::Create);
    }

    #[test]
    fn destroy_when_only_current_exists() {
        let mut currents = BTreeMap::new();
        currents.insert(key(), current(Variables::new(), VariablesFromOutputs::new()));
        let actions = reconcile(&BTreeMap::new(), &currents, false);
        assert_eq!(actions[&key()], Action::Destroy);
    }

    #[test]
    fn no_change_when_identical_and_no_output_refs() {
        let mut targets = BTreeMap::new();
        let mut currents = BTreeMap::new();
        targets.insert(key(), target(Variables::new(), VariablesFromOutputs::new()));
        currents.insert(key(), current(Variables::new(), VariablesFromOutputs::new()));
        let actions = reconcile(&targets, &currents, false);
        assert_eq!(actions[&key()], Action::NoChange);
    }

    #[test]
    fn update_when_variables_differ() {
        let mut targets = BTreeMap::new();
        let mut currents = BTreeMap::new();
        targets.insert(
            key(),
            target(Variables::from([("a".into(), serde_json::json!(2))]), VariablesFromOutputs::new()),
        );
        currents.insert(
            key(),
            current(Variables::from([("a".into(), serde_json::json!(1))]), VariablesFromOutputs::new()),
        );
        let actions = reconcile(&targets, &currents, false);
        assert_eq!(actions[&key()], Action::Update);
    }

    #[test]
    fn force_update_promotes_no_change_to_update() {
        let mut targets = BTreeMap::new();
        let mut currents = BTreeMap::new();
        targets.insert(key(), target(Variables::new(), VariablesFromOutputs::new()));
        currents.insert(key(), current(Variables::new(), VariablesFromOutputs::new()));
        let actions = reconcile(&targets, &currents, true);
        assert_eq!(actions[&key()], Action::Update);
    }
}
