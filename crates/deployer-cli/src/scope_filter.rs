// crates/deployer-cli/src/scope_filter.rs
// ============================================================================
// Module: CLI Scope Filters
// Description: Turns `--include-*`/`--exclude-*` flags into the same
// `Predicate` the package's own deployment blocks use, so CLI filtering
// intersects rather than replaces package scope.
// Purpose: Let an operator narrow a run to specific modules, accounts, OUs,
// or regions without editing the package file.
// Dependencies: clap, deployer_core
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use clap::Args;
use deployer_core::AccountId;
use deployer_core::DeploymentBlock;
use deployer_core::Inventory;
use deployer_core::ModuleName;
use deployer_core::Predicate;
use deployer_core::Region;
use deployer_core::ValidationError;
use deployer_core::expand_module;
use deployer_core::inventory::OuId;

/// Scope-narrowing flags, intersected with whatever a package's own
/// deployment blocks already select.
#[derive(Debug, Clone, Default, Args)]
pub struct ScopeFilterArgs {
    /// Restrict to these module names (repeatable); empty means all.
    #[arg(long = "include-module", value_name = "NAME")]
    pub include_module: Vec<String>,
    /// Drop these module names (repeatable).
    #[arg(long = "exclude-module", value_name = "NAME")]
    pub exclude_module: Vec<String>,
    /// Restrict to these account ids (repeatable).
    #[arg(long = "include-account-id", value_name = "ID")]
    pub include_account_id: Vec<String>,
    /// Drop these account ids (repeatable).
    #[arg(long = "exclude-account-id", value_name = "ID")]
    pub exclude_account_id: Vec<String>,
    /// Restrict to account names matching these globs (repeatable).
    #[arg(long = "include-account-name", value_name = "GLOB")]
    pub include_account_name: Vec<String>,
    /// Drop account names matching these globs (repeatable).
    #[arg(long = "exclude-account-name", value_name = "GLOB")]
    pub exclude_account_name: Vec<String>,
    /// Restrict to accounts carrying all of these `key=value` tags
    /// (repeatable).
    #[arg(long = "include-account-tag", value_name = "KEY=VALUE")]
    pub include_account_tag: Vec<String>,
    /// Drop accounts carrying all of these `key=value` tags (repeatable).
    #[arg(long = "exclude-account-tag", value_name = "KEY=VALUE")]
    pub exclude_account_tag: Vec<String>,
    /// Restrict to accounts under these organizational unit ids
    /// (repeatable).
    #[arg(long = "include-ou-id", value_name = "ID")]
    pub include_ou_id: Vec<String>,
    /// Drop accounts under these organizational unit ids (repeatable).
    #[arg(long = "exclude-ou-id", value_name = "ID")]
    pub exclude_ou_id: Vec<String>,
    /// Restrict to accounts under an OU carrying all of these `key=value`
    /// tags (repeatable).
    #[arg(long = "include-ou-tag", value_name = "KEY=VALUE")]
    pub include_ou_tag: Vec<String>,
    /// Drop accounts under an OU carrying all of these `key=value` tags
    /// (repeatable).
    #[arg(long = "exclude-ou-tag", value_name = "KEY=VALUE")]
    pub exclude_ou_tag: Vec<String>,
    /// Restrict to these regions (repeatable).
    #[arg(long = "include-region", value_name = "REGION")]
    pub include_region: Vec<String>,
    /// Drop these regions (repeatable).
    #[arg(long = "exclude-region", value_name = "REGION")]
    pub exclude_region: Vec<String>,
}

/// Splits `key=value` tag flags into a map, silently dropping malformed
/// entries without an `=`.
fn parse_tag_pairs(pairs: &[String]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Builds a `Predicate` from one side (include or exclude) of the CLI's
/// scope flags.
fn predicate(account_ids: &[String], account_name_globs: &[String], account_tags: &[String], ou_ids: &[String], ou_tags: &[String], regions: &[String]) -> Predicate {
    Predicate {
        account_ids: account_ids.iter().map(AccountId::new).collect(),
        account_name_globs: account_name_globs.to_vec(),
        account_tags: parse_tag_pairs(account_tags),
        ou_ids: ou_ids.iter().map(OuId::new).collect(),
        ou_tags: parse_tag_pairs(ou_tags),
        regions: regions.iter().map(Region::new).collect(),
    }
}

impl ScopeFilterArgs {
    /// Returns true if `module` passes the `--include-module`/
    /// `--exclude-module` filters.
    #[must_use]
    pub fn allows_module(&self, module: &ModuleName) -> bool {
        if !self.include_module.is_empty() && !self.include_module.iter().any(|name| name == module.as_str()) {
            return false;
        }
        !self.exclude_module.iter().any(|name| name == module.as_str())
    }

    /// Resolves the `(account, region)` set these filters select against
    /// `inventory`, for intersecting with a package's own resolved scope.
    ///
    /// # Errors
    ///
    /// Propagates [`ValidationError`] from the underlying predicate
    /// expansion (currently infallible for CLI-sourced predicates, but the
    /// signature matches `expand_module`'s).
    pub fn allowed_keys(&self, inventory: &Inventory) -> Result<BTreeSet<(AccountId, Region)>, ValidationError> {
        let include = predicate(
            &self.include_account_id,
            &self.include_account_name,
            &self.include_account_tag,
            &self.include_ou_id,
            &self.include_ou_tag,
            &self.include_region,
        );
        let exclude = predicate(
            &self.exclude_account_id,
            &self.exclude_account_name,
            &self.exclude_account_tag,
            &self.exclude_ou_id,
            &self.exclude_ou_tag,
            &self.exclude_region,
        );
        let block = DeploymentBlock { include, exclude, ..DeploymentBlock::default() };
        let expanded = expand_module(&ModuleName::new("__cli_scope_filter__"), std::slice::from_ref(&block), inventory)?;
        Ok(expanded.into_keys().collect())
    }
}
