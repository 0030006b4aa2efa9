// crates/deployer-core/src/inventory.rs
// ============================================================================
// Module: Inventory Cache
// Description: TTL-cached account/OU/region tree used by scope expansion.
// Purpose: Serve inventory lookups without re-querying the organization
// directory on every run.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! The inventory is an external collaborator (the cloud-provider
//! organization directory); this module only defines the cached shape and
//! the trait boundary a concrete source must implement. The cache's
//! lifecycle is independent of any single run: it is refreshed by age, not
//! by run boundaries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;

use crate::error::InventoryError;
use crate::model::AccountId;
use crate::model::Region;

// ============================================================================
// SECTION: Inventory Shapes
// ============================================================================

/// Organizational unit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OuId(String);

impl OuId {
    /// Creates a new OU identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single account entry in the inventory.
///
/// # Invariants
/// - `enabled_regions` is the full set of regions this account may deploy
///   to; scope expansion never adds regions outside this set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,
    /// Account name (matched by case-sensitive glob in scope predicates).
    pub name: String,
    /// Parent organizational unit identifiers, root first.
    pub parent_ous: Vec<OuId>,
    /// Account tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Regions enabled for this account.
    pub enabled_regions: BTreeSet<Region>,
    /// Whether the account is active (inactive accounts are never included
    /// by an empty `Include`, and are dropped by `remove-orphans`).
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Default value for `active` when a serialized account omits it.
const fn default_true() -> bool {
    true
}

/// A single organizational unit entry in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    /// OU identifier.
    pub id: OuId,
    /// OU name.
    pub name: String,
    /// OU tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// The cached account/OU/region tree, with a generation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// All known accounts, keyed by account id.
    pub accounts: BTreeMap<AccountId, Account>,
    /// All known organizational units, keyed by OU id.
    pub organizational_units: BTreeMap<OuId, OrganizationalUnit>,
    /// When this inventory snapshot was generated.
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl Inventory {
    /// Returns true if `generated_at + ttl` is in the past relative to `now`.
    #[must_use]
    pub fn is_stale(&self, ttl: Duration, now: OffsetDateTime) -> bool {
        now > self.generated_at + ttl
    }

    /// Returns all active accounts.
    pub fn active_accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values().filter(|account| account.active)
    }
}

// ============================================================================
// SECTION: Inventory Source Trait
// ============================================================================

/// Out-of-core collaborator: fetches a fresh inventory snapshot from the
/// cloud-provider organization directory.
///
/// Implementations are not part of the core; the core only consumes the
/// trait boundary through [`InventoryCache`].
pub trait InventorySource: Send + Sync {
    /// Fetches a fresh inventory snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] when the directory cannot be
    /// reached.
    fn fetch(&self) -> Result<Inventory, InventoryError>;
}

// ============================================================================
// SECTION: Inventory Cache
// ============================================================================

/// TTL-governed inventory cache.
///
/// # Invariants
/// - A cache hit is returned whenever the stored snapshot is not stale and
///   `force_refresh` was not requested; otherwise the source is consulted.
/// - If the source is unavailable and a (possibly stale) cached snapshot
///   exists, the stale snapshot is served rather than failing the run.
pub struct InventoryCache {
    /// How long a cached snapshot is considered fresh.
    ttl: Duration,
    /// Last snapshot fetched or seeded, if any.
    cached: Option<Inventory>,
}

impl InventoryCache {
    /// Creates an empty cache with the given TTL.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self { ttl, cached: None }
    }

    /// Seeds the cache with a previously persisted snapshot (e.g. loaded
    /// from the `orga.json` object-store blob at startup).
    pub fn seed(&mut self, inventory: Inventory) {
        self.cached = Some(inventory);
    }

    /// Returns the current cached snapshot, if any.
    #[must_use]
    pub const fn cached(&self) -> Option<&Inventory> {
        self.cached.as_ref()
    }

    /// Returns a valid inventory snapshot, refreshing through `source` if
    /// the cache is empty, stale, or `force_refresh` is set.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Unavailable`] when a refresh is required
    /// and the source cannot be reached, and no cached snapshot exists to
    /// fall back on.
    pub fn get(
        &mut self,
        source: &dyn InventorySource,
        now: OffsetDateTime,
        force_refresh: bool,
    ) -> Result<&Inventory, InventoryError> {
        let needs_refresh =
            force_refresh || self.cached.as_ref().is_none_or(|inv| inv.is_stale(self.ttl, now));
        if needs_refresh {
            match source.fetch() {
                Ok(fresh) => self.cached = Some(fresh),
                Err(err) => {
                    if self.cached.is_none() {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, "inventory refresh failed; serving stale cache");
                }
            }
        }
        self.cached.as_ref().ok_or_else(|| InventoryError::Unavailable("no cached inventory".into()))
    }
}
