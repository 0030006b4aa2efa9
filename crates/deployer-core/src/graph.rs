// crates/deployer-core/src/graph.rs
// ============================================================================
// Module: Graph Builder
// Description: Builds the dependency DAG for a reconciled run and validates
// its fatal invariants.
// Purpose: Give the scheduler a validated, deterministically ordered set of
// steps before any engine subprocess is spawned.
// Dependencies: crate::error, crate::model
// ============================================================================

//! ## Overview
//! The graph builder never mutates an action; it only validates that the
//! actions assigned by the reconciler are jointly consistent (no step
//! depends on something missing or being destroyed, no destroy leaves a
//! dependent dangling, no cycle) and computes a deterministic topological
//! order for presentation and for the scheduler's initial `Ready` set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::error::GraphError;
use crate::model::Action;
use crate::model::DependencyRef;
use crate::model::DeploymentKey;

// ============================================================================
// SECTION: Step
// ============================================================================

/// One node in the dependency graph.
#[derive(Debug, Clone)]
pub struct Step {
    /// The step's deployment key.
    pub key: DeploymentKey,
    /// The reconciled action for this key.
    pub action: Action,
    /// Keys this step depends on (predecessors).
    pub depends_on: BTreeSet<DeploymentKey>,
}

/// A validated dependency graph: steps plus a deterministic topological
/// order.
#[derive(Debug, Clone)]
pub struct Graph {
    /// Steps keyed by deployment key.
    pub steps: BTreeMap<DeploymentKey, Step>,
    /// Deterministic topological order (lexicographic tie-break on key).
    pub order: Vec<DeploymentKey>,
}

impl Graph {
    /// Returns the set of keys with no unresolved predecessor, i.e. the
    /// initial `Ready` frontier.
    #[must_use]
    pub fn initial_ready(&self) -> BTreeSet<DeploymentKey> {
        self.steps
            .values()
            .filter(|step| step.depends_on.is_empty())
            .map(|step| step.key.clone())
            .collect()
    }

    /// Returns the keys that directly depend on `key`.
    #[must_use]
    pub fn dependents_of(&self, key: &DeploymentKey) -> Vec<DeploymentKey> {
        self.steps
            .values()
            .filter(|step| step.depends_on.contains(key))
            .map(|step| step.key.clone())
            .collect()
    }
}

// ============================================================================
// SECTION: Build Inputs
// ============================================================================

/// Per-key dependency declarations, after `ignore_if_not_exists` references
/// to absent keys have been dropped by the caller's variable resolution
/// pass.
pub struct StepInput<'a> {
    /// The step's key.
    pub key: &'a DeploymentKey,
    /// The reconciled action.
    pub action: Action,
    /// Declared dependencies (already substituted; not yet filtered).
    pub dependencies: &'a [DependencyRef],
}

// ============================================================================
// SECTION: Build
// ============================================================================

/// Builds and validates the dependency graph from reconciled actions.
///
/// # Errors
///
/// - [`GraphError::UnmetDependencyMissing`] if a non-`Destroy` step depends
///   on a key absent from `actions` and not marked `ignore_if_not_exists`.
/// - [`GraphError::DependencyScheduledForDestroy`] if a non-`Destroy` step
///   depends on a key whose action is `Destroy`.
/// - [`GraphError::DependentRemainsAfterDestroy`] if a `Destroy` step has a
///   dependent whose action is not itself `Destroy`.
/// - [`GraphError::CircularDependency`] if the graph contains a cycle.
pub fn build_graph(inputs: &[StepInput<'_>]) -> Result<Graph, GraphError> {
    let actions: BTreeMap<&DeploymentKey, Action> = inputs.iter().map(|input| (input.key, input.action)).collect();

    // `declared_depends_on` is the dependency as authored (creation-time
    // direction: a resource depends on the things it references). Execution
    // order follows that direction for Create/Update/ConditionalUpdate, but
    // is inverted for Destroy: a destroyed resource must wait for everything
    // that referenced it to be destroyed first, not the other way around.
    let mut declared_depends_on: BTreeMap<DeploymentKey, BTreeSet<DeploymentKey>> = BTreeMap::new();
    let mut step_actions: BTreeMap<DeploymentKey, Action> = BTreeMap::new();

    for input in inputs {
        let mut depends_on = BTreeSet::new();
        for dep in input.dependencies {
            let dep_key = dep.key();
            match actions.get(&dep_key) {
                Some(Action::Destroy) if input.action != Action::Destroy => {
                    let error = GraphError::DependencyScheduledForDestroy {
                        dependent: input.key.clone(),
                        scheduled_for_destroy: dep_key,
                    };
                    tracing::warn!(error = %error, "graph validation failed");
                    return Err(error);
                }
                Some(_) => {
                    depends_on.insert(dep_key);
                }
                None => {
                    if dep.ignore_if_not_exists {
                        continue;
                    }
                    let error = GraphError::UnmetDependencyMissing {
                        dependent: input.key.clone(),
                        missing: dep_key,
                    };
                    tracing::warn!(error = %error, "graph validation failed");
                    return Err(error);
                }
            }
        }
        if step_actions.insert(input.key.clone(), input.action).is_some() {
            return Err(GraphError::DuplicateStep(input.key.clone()));
        }
        declared_depends_on.insert(input.key.clone(), depends_on);
    }

    for (key, action) in &step_actions {
        if *action != Action::Destroy {
            continue;
        }
        for (other_key, deps) in &declared_depends_on {
            let other_action = step_actions[other_key];
            if other_action != Action::Destroy && deps.contains(key) {
                let error = GraphError::DependentRemainsAfterDestroy {
                    destroyed: key.clone(),
                    dependent: other_key.clone(),
                };
                tracing::warn!(error = %error, "graph validation failed");
                return Err(error);
            }
        }
    }

    let mut steps: BTreeMap<DeploymentKey, Step> = BTreeMap::new();
    for (key, action) in &step_actions {
        let depends_on = if *action == Action::Destroy {
            declared_depends_on
                .iter()
                .filter(|(other_key, deps)| {
                    step_actions[*other_key] == Action::Destroy && deps.contains(key)
                })
                .map(|(other_key, _)| other_key.clone())
                .collect()
        } else {
            declared_depends_on[key].clone()
        };
        steps.insert(
            key.clone(),
            Step {
                key: key.clone(),
                action: *action,
                depends_on,
            },
        );
    }

    let order = topological_order(&steps)?;

    Ok(Graph { steps, order })
}

// ============================================================================
// SECTION: Topological Sort
// ============================================================================

/// Orders `steps` so every dependency precedes its dependents, breaking ties by key.
fn topological_order(steps: &BTreeMap<DeploymentKey, Step>) -> Result<Vec<DeploymentKey>, GraphError> {
    let mut in_degree: BTreeMap<&DeploymentKey, usize> =
        steps.keys().map(|key| (key, 0usize)).collect();
    let mut dependents: BTreeMap<&DeploymentKey, Vec<&DeploymentKey>> = BTreeMap::new();
    for step in steps.values() {
        for dep in &step.depends_on {
            if let Some(degree) = in_degree.get_mut(&step.key) {
                *degree += 1;
            }
            dependents.entry(dep).or_default().push(&step.key);
        }
    }

    let mut frontier: BTreeSet<&DeploymentKey> =
        in_degree.iter().filter(|(_, degree)| **degree == 0).map(|(key, _)| *key).collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(key) = frontier.iter().next().copied() {
        frontier.remove(key);
        order.push(key.clone());
        if let Some(children) = dependents.get(key) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.insert(child);
                    }
                }
            }
        }
    }

    if order.len() != steps.len() {
        let remaining: BTreeSet<&DeploymentKey> = steps.keys().filter(|key| !order.contains(key)).collect();
        let example_key = remaining.into_iter().next().cloned().unwrap_or_else(|| {
            DeploymentKey::new("unknown", "unknown", "unknown")
        });
        let error = GraphError::CircularDependency { example_key };
        tracing::error!(error = %error, "graph validation failed");
        return Err(error);
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModuleName;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn key(module: &str) -> DeploymentKey {
        DeploymentKey::new(module, "111111111111", "eu-west-1")
    }

    fn dep(module: &str) -> DependencyRef {
        DependencyRef {
            module: ModuleName::new(module),
            account_id: "111111111111".into(),
            region: "eu-west-1".into(),
            ignore_if_not_exists: false,
        }
    }

    #[test]
    fn linear_chain_orders_dependency_before_dependent() -> TestResult {
        let vpc_deps = [];
        let subnet_deps = [dep("vpc")];
        let inputs = vec![
            StepInput { key: &key("vpc"), action: Action::Create, dependencies: &vpc_deps },
            StepInput { key: &key("subnet"), action: Action::Create, dependencies: &subnet_deps },
        ];
        let graph = build_graph(&inputs)?;
        let Some(vpc_pos) = graph.order.iter().position(|k| k == &key("vpc")) else {
            return Err("expected vpc in the order".into());
        };
        let Some(subnet_pos) = graph.order.iter().position(|k| k == &key("subnet")) else {
            return Err("expected subnet in the order".into());
        };
        assert!(vpc_pos < subnet_pos);
        assert_eq!(graph.initial_ready(), BTreeSet::from([key("vpc")]));
        Ok(())
    }

    #[test]
    fn cycle_is_rejected() -> TestResult {
        let a_deps = [dep("b")];
        let b_deps = [dep("a")];
        let inputs = vec![
            StepInput { key: &key("a"), action: Action::Create, dependencies: &a_deps },
            StepInput { key: &key("b"), action: Action::Create, dependencies: &b_deps },
        ];
        let Err(err) = build_graph(&inputs) else {
            return Err("expected a circular dependency error".into());
        };
        assert!(matches!(err, GraphError::CircularDependency { .. }));
        Ok(())
    }

    #[test]
    fn missing_dependency_is_fatal_unless_ignored() -> TestResult {
        let deps = [dep("vpc")];
        let inputs = vec![StepInput { key: &key("subnet"), action: Action::Create, dependencies: &deps }];
        let Err(err) = build_graph(&inputs) else {
            return Err("expected an unmet dependency error".into());
        };
        assert!(matches!(err, GraphError::UnmetDependencyMissing { .. }));
        Ok(())
    }

    #[test]
    fn missing_dependency_ignored_when_flagged() -> TestResult {
        let mut ignored = dep("vpc");
        ignored.ignore_if_not_exists = true;
        let deps = [ignored];
        let inputs = vec![StepInput { key: &key("subnet"), action: Action::Create, dependencies: &deps }];
        let graph = build_graph(&inputs)?;
        let Some(subnet) = graph.steps.get(&key("subnet")) else {
            return Err("expected a subnet step".into());
        };
        assert!(subnet.depends_on.is_empty());
        Ok(())
    }

    #[test]
    fn destroy_depending_on_destroy_is_allowed_and_inverts_execution_order() -> TestResult {
        let subnet_deps = [dep("vpc")];
        let inputs = vec![
            StepInput { key: &key("vpc"), action: Action::Destroy, dependencies: &[] },
            StepInput { key: &key("subnet"), action: Action::Destroy, dependencies: &subnet_deps },
        ];
        let graph = build_graph(&inputs)?;
        // subnet declares a dependency on vpc, but destroys run in reverse:
        // the dependent (subnet) must be torn down before its dependency.
        let Some(vpc_pos) = graph.order.iter().position(|k| k == &key("vpc")) else {
            return Err("expected vpc in the order".into());
        };
        let Some(subnet_pos) = graph.order.iter().position(|k| k == &key("subnet")) else {
            return Err("expected subnet in the order".into());
        };
        assert!(subnet_pos < vpc_pos);
        let Some(vpc_step) = graph.steps.get(&key("vpc")) else {
            return Err("expected a vpc step".into());
        };
        assert!(vpc_step.depends_on.contains(&key("subnet")));
        Ok(())
    }

    #[test]
    fn destroy_depended_on_by_surviving_step_is_fatal() -> TestResult {
        let subnet_deps = [dep("vpc")];
        let inputs = vec![
            StepInput { key: &key("vpc"), action: Action::Destroy, dependencies: &[] },
            StepInput { key: &key("subnet"), action: Action::Update, dependencies: &subnet_deps },
        ];
        let Err(err) = build_graph(&inputs) else {
            return Err("expected a dependent-remains-after-destroy error".into());
        };
        assert!(matches!(err, GraphError::DependentRemainsAfterDestroy { .. }));
        Ok(())
    }

    #[test]
    fn non_destroy_depending_on_destroy_is_fatal() -> TestResult {
        let subnet_deps = [dep("vpc")];
        let inputs = vec![
            StepInput { key: &key("vpc"), action: Action::Destroy, dependencies: &[] },
            StepInput { key: &key("subnet"), action: Action::Create, dependencies: &subnet_deps },
        ];
        let Err(err) = build_graph(&inputs) else {
            return Err("expected a dependency-scheduled-for-destroy error".into());
        };
        assert!(matches!(err, GraphError::DependencyScheduledForDestroy { .. }));
        Ok(())
    }
}
