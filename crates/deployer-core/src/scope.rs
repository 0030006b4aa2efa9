// crates/deployer-core/src/scope.rs
// ============================================================================
// Module: Scope Expander
// Description: Turns include/exclude predicates into a concrete set of
// (account, region) tuples per module.
// Purpose: Produce the raw, per-key target records that the variable
// resolver and module hasher enrich into full TargetState values.
// Dependencies: crate::inventory, crate::model, glob
// ============================================================================

//! ## Overview
//! A module declares one or more deployment blocks, each with an `Include`
//! predicate (defaulting to "everything") and an optional `Exclude`
//! predicate. Later blocks override earlier ones for the same key: scalar
//! and reference fields are fully replaced, and variables merge last-wins.
//! `${CURRENT_ACCOUNT_ID}`/`${CURRENT_REGION}` substitution is applied once
//! the key is fixed, as the final step of variable resolution (see
//! `crate::variables`), not here; the expander only fixes the key set and
//! the raw (unsubstituted) per-key fields.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ValidationError;
use crate::inventory::Account;
use crate::inventory::Inventory;
use crate::inventory::OuId;
use crate::model::AccountId;
use crate::model::DependencyRef;
use crate::model::ModuleConfig;
use crate::model::ModuleName;
use crate::model::Region;
use crate::model::Variables;
use crate::model::VariablesFromOutputs;

// ============================================================================
// SECTION: Predicate
// ============================================================================

/// An include/exclude predicate over accounts, OUs, and regions.
///
/// # Invariants
/// - An empty predicate (every field `None`/empty) matches everything.
/// - Within `account_tags`/`ou_tags`, all listed tags must match
///   (conjunctive); the presence of any one non-empty category among
///   `account_ids`, `account_name_globs`, `account_tags`, `ou_ids`,
///   `ou_tags` is enough to select an account (categories combine by union).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    /// Explicit account ids.
    #[serde(default)]
    pub account_ids: BTreeSet<AccountId>,
    /// Case-sensitive account name globs (`*` wildcard).
    #[serde(default)]
    pub account_name_globs: Vec<String>,
    /// Account tags that must all be present and equal (conjunctive).
    #[serde(default)]
    pub account_tags: BTreeMap<String, String>,
    /// Explicit organizational unit ids.
    #[serde(default)]
    pub ou_ids: BTreeSet<OuId>,
    /// OU tags that must all be present and equal (conjunctive).
    #[serde(default)]
    pub ou_tags: BTreeMap<String, String>,
    /// Regions to match; empty means all of the account's enabled regions.
    #[serde(default)]
    pub regions: BTreeSet<Region>,
}

impl Predicate {
    /// Returns true if this predicate declares any account- or OU-level filter.
    fn has_account_category(&self) -> bool {
        !self.account_ids.is_empty()
            || !self.account_name_globs.is_empty()
            || !self.account_tags.is_empty()
            || !self.ou_ids.is_empty()
            || !self.ou_tags.is_empty()
    }

    /// Returns true if `account` satisfies any of this predicate's account/OU criteria.
    fn account_matches(&self, account: &Account, inventory: &Inventory) -> bool {
        if !self.has_account_category() {
            return true;
        }
        if self.account_ids.contains(&account.id) {
            return true;
        }
        if self
            .account_name_globs
            .iter()
            .any(|pattern| glob_match(pattern, &account.name))
        {
            return true;
        }
        if !self.account_tags.is_empty()
            && self
                .account_tags
                .iter()
                .all(|(key, value)| account.tags.get(key) == Some(value))
        {
            return true;
        }
        if !self.ou_ids.is_empty() && account.parent_ous.iter().any(|ou| self.ou_ids.contains(ou)) {
            return true;
        }
        if !self.ou_tags.is_empty() {
            let ou_matches = account.parent_ous.iter().any(|ou_id| {
                inventory.organizational_units.get(ou_id).is_some_and(|ou| {
                    self.ou_tags.iter().all(|(key, value)| ou.tags.get(key) == Some(value))
                })
            });
            if ou_matches {
                return true;
            }
        }
        false
    }

    /// Returns the regions this predicate selects for `account`, within its enabled set.
    fn regions_for(&self, account: &Account) -> BTreeSet<Region> {
        if self.regions.is_empty() {
            account.enabled_regions.clone()
        } else {
            self.regions.intersection(&account.enabled_regions).cloned().collect()
        }
    }
}

/// Case-sensitive glob match supporting `*` as the only wildcard.
fn glob_match(pattern: &str, value: &str) -> bool {
    glob::Pattern::new(pattern).is_ok_and(|compiled| compiled.matches(value))
}

// ============================================================================
// SECTION: Deployment Block
// ============================================================================

/// A single deployment block within a module's declaration.
///
/// # Invariants
/// - `include` defaults to "everything" when omitted entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentBlock {
    /// Accounts/regions to include.
    #[serde(default)]
    pub include: Predicate,
    /// Accounts/regions to subtract from `include`.
    #[serde(default)]
    pub exclude: Predicate,
    /// Raw (unsubstituted) variables for keys matched by this block.
    #[serde(default)]
    pub variables: Variables,
    /// Raw (unsubstituted) output references for keys matched by this block.
    #[serde(default)]
    pub variables_from_outputs: VariablesFromOutputs,
    /// Dependencies declared by this block.
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    /// Module configuration override for keys matched by this block.
    #[serde(default)]
    pub module_config: Option<ModuleConfig>,
}

// ============================================================================
// SECTION: Expanded Record
// ============================================================================

/// Raw, per-key fields after block merge, before variable-layer resolution
/// and `${CURRENT_*}` substitution.
#[derive(Debug, Clone, Default)]
pub struct ExpandedBlock {
    /// Raw variables (last-wins merged across matching blocks).
    pub variables: Variables,
    /// Raw output references (last block wins).
    pub variables_from_outputs: VariablesFromOutputs,
    /// Dependencies (last block wins, full replacement).
    pub dependencies: Vec<DependencyRef>,
    /// Module config override (last block wins, full replacement).
    pub module_config: Option<ModuleConfig>,
}

// ============================================================================
// SECTION: Expansion
// ============================================================================

/// Expands one module's deployment blocks against the inventory.
///
/// # Errors
///
/// Returns [`ValidationError::UnknownReference`] if a block references a
/// region outside any matched account's enabled regions through an
/// explicit, non-empty region predicate that matches no account at all —
/// callers that want to tolerate this should pre-filter with
/// `ignore_if_not_exists` at the dependency level; scope predicates
/// themselves have no such flag and an empty match is simply an empty set,
/// which is not an error.
pub fn expand_module(
    module: &ModuleName,
    blocks: &[DeploymentBlock],
    inventory: &Inventory,
) -> Result<BTreeMap<(AccountId, Region), ExpandedBlock>, ValidationError> {
    let mut result: BTreeMap<(AccountId, Region), ExpandedBlock> = BTreeMap::new();
    let _ = module;

    for block in blocks {
        let mut matched: BTreeSet<(AccountId, Region)> = BTreeSet::new();
        for account in inventory.active_accounts() {
            if !block.include.account_matches(account, inventory) {
                continue;
            }
            for region in block.include.regions_for(account) {
                matched.insert((account.id.clone(), region));
            }
        }

        let mut excluded: BTreeSet<(AccountId, Region)> = BTreeSet::new();
        if block.exclude.has_account_category() || !block.exclude.regions.is_empty() {
            for account in inventory.active_accounts() {
                if !block.exclude.account_matches(account, inventory) {
                    continue;
                }
                for region in block.exclude.regions_for(account) {
                    excluded.insert((account.id.clone(), region));
                }
            }
        }
        matched.retain(|key| !excluded.contains(key));

        for key in matched {
            let entry = result.entry(key).or_default();
            for (name, value) in &block.variables {
                entry.variables.insert(name.clone(), value.clone());
            }
            if !block.variables_from_outputs.is_empty() {
                entry.variables_from_outputs = block.variables_from_outputs.clone();
                for name in entry.variables_from_outputs.keys() {
                    entry.variables.remove(name);
                }
            }
            if !block.dependencies.is_empty() {
                entry.dependencies = block.dependencies.clone();
            }
            if block.module_config.is_some() {
                entry.module_config = block.module_config.clone();
            }
        }
    }

    Ok(result)
}
