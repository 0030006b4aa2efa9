// crates/deployer-core/tests/proptest_reconcile.rs
// ============================================================================
// Module: Reconciler Property-Based Tests
// Description: Property tests for the target/current reconciliation
// invariants across randomized deployment key sets.
// Purpose: Detect panics and coverage gaps the example-based tests miss.
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use deployer_core::Action;
use deployer_core::AccountId;
use deployer_core::CurrentState;
use deployer_core::DeploymentKey;
use deployer_core::ModuleConfig;
use deployer_core::ModuleName;
use deployer_core::Outputs;
use deployer_core::Region;
use deployer_core::TargetState;
use deployer_core::Variables;
use deployer_core::VariablesFromOutputs;
use deployer_core::reconcile;
use proptest::prelude::*;
use time::macros::datetime;

fn key_strategy() -> impl Strategy<Value = DeploymentKey> {
    ("[a-c]", "[a-c]", "[a-c]").prop_map(|(module, account, region)| DeploymentKey {
        module: ModuleName::new(module),
        account_id: AccountId::new(account),
        region: Region::new(region),
    })
}

fn target_for(seed: u8) -> TargetState {
    TargetState {
        variables: Variables::from([("seed".to_string(), serde_json::json!(seed))]),
        variables_from_outputs: VariablesFromOutputs::new(),
        dependencies: vec![],
        module_hash: format!("hash-{seed}"),
        module_config: ModuleConfig::default(),
    }
}

fn current_for(seed: u8) -> CurrentState {
    CurrentState {
        variables: Variables::from([("seed".to_string(), serde_json::json!(seed))]),
        variables_from_outputs: VariablesFromOutputs::new(),
        dependencies: vec![],
        module_hash: format!("hash-{seed}"),
        outputs: Outputs::new(),
        last_changed_time: datetime!(2026-01-01 00:00:00 UTC),
    }
}

proptest! {
    #[test]
    fn every_key_from_either_set_gets_exactly_one_action(
        target_keys in prop::collection::btree_set(key_strategy(), 0 .. 8),
        current_keys in prop::collection::btree_set(key_strategy(), 0 .. 8),
        seed in any::<u8>(),
        force_update in any::<bool>(),
    ) {
        let targets: BTreeMap<DeploymentKey, TargetState> =
            target_keys.iter().cloned().map(|k| (k, target_for(seed))).collect();
        let currents: BTreeMap<DeploymentKey, CurrentState> =
            current_keys.iter().cloned().map(|k| (k, current_for(seed))).collect();

        let actions = reconcile(&targets, &currents, force_update);

        let expected_keys: BTreeSet<DeploymentKey> = target_keys.union(&current_keys).cloned().collect();
        prop_assert_eq!(actions.keys().cloned().collect::<BTreeSet<_>>(), expected_keys);

        for key in &expected_keys {
            let has_target = targets.contains_key(key);
            let has_current = currents.contains_key(key);
            match (has_target, has_current) {
                (true, false) => prop_assert_eq!(actions[key], Action::Create),
                (false, true) => prop_assert_eq!(actions[key], Action::Destroy),
                (true, true) => prop_assert!(actions[key] != Action::Create && actions[key] != Action::Destroy),
                (false, false) => unreachable!("key drawn from target or current sets"),
            }
        }
    }

    #[test]
    fn force_update_never_produces_no_change_for_keys_present_in_both(
        shared_keys in prop::collection::btree_set(key_strategy(), 1 .. 6),
        seed in any::<u8>(),
    ) {
        let targets: BTreeMap<DeploymentKey, TargetState> =
            shared_keys.iter().cloned().map(|k| (k, target_for(seed))).collect();
        let currents: BTreeMap<DeploymentKey, CurrentState> =
            shared_keys.iter().cloned().map(|k| (k, current_for(seed))).collect();

        let actions = reconcile(&targets, &currents, true);
        for key in &shared_keys {
            prop_assert_ne!(actions[key], Action::NoChange);
        }
    }

    #[test]
    fn identical_declarations_without_force_update_are_no_change_or_conditional(
        shared_keys in prop::collection::btree_set(key_strategy(), 1 .. 6),
        seed in any::<u8>(),
    ) {
        let targets: BTreeMap<DeploymentKey, TargetState> =
            shared_keys.iter().cloned().map(|k| (k, target_for(seed))).collect();
        let currents: BTreeMap<DeploymentKey, CurrentState> =
            shared_keys.iter().cloned().map(|k| (k, current_for(seed))).collect();

        let actions = reconcile(&targets, &currents, false);
        for key in &shared_keys {
            prop_assert!(matches!(actions[key], Action::NoChange | Action::ConditionalUpdate));
        }
    }
}
