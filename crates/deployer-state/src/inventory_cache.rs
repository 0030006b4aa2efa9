// crates/deployer-state/src/inventory_cache.rs
// ============================================================================
// Module: Inventory Cache Blob
// Description: Load/save of the `orga.json` object-store blob backing
// `deployer_core::InventoryCache`.
// Purpose: Let a run survive restarts without always re-querying the
// organization directory, honoring the cache's own TTL.
// Dependencies: crate::object_store, deployer_core, serde_json
// ============================================================================

use deployer_core::Inventory;

use crate::error::StateError;
use crate::object_store::ObjectStore;

/// Object key the inventory cache is persisted under.
pub const INVENTORY_OBJECT_KEY: &str = "orga.json";

/// Loads the cached inventory snapshot, or `None` if none has been persisted
/// yet.
///
/// # Errors
///
/// Returns [`StateError`] if the backend cannot be reached or the stored
/// blob is not valid JSON.
pub async fn load_inventory_cache(store: &dyn ObjectStore) -> Result<Option<Inventory>, StateError> {
    let Some(bytes) = store.get(INVENTORY_OBJECT_KEY).await? else {
        return Ok(None);
    };
    let inventory: Inventory = serde_json::from_slice(&bytes).map_err(|source| StateError::Parse { what: "orga.json", source })?;
    Ok(Some(inventory))
}

/// Persists `inventory` as a single atomic, whole-document replacement.
///
/// # Errors
///
/// Returns [`StateError`] if the backend cannot be reached or serialization
/// fails.
pub async fn save_inventory_cache(store: &dyn ObjectStore, inventory: &Inventory) -> Result<(), StateError> {
    let bytes = serde_json::to_vec_pretty(inventory).map_err(|source| StateError::Parse { what: "orga.json", source })?;
    store.put(INVENTORY_OBJECT_KEY, bytes).await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use time::macros::datetime;

    use super::*;
    use crate::object_store::LocalFsObjectStore;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn load_inventory_cache_on_an_empty_store_returns_none() -> TestResult {
        let dir = tempfile::tempdir()?;
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());
        assert!(load_inventory_cache(&store).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn round_trips_an_inventory_snapshot() -> TestResult {
        let dir = tempfile::tempdir()?;
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());
        let inventory = Inventory {
            accounts: BTreeMap::new(),
            organizational_units: BTreeMap::new(),
            generated_at: datetime!(2026-01-01 00:00:00 UTC),
        };

        save_inventory_cache(&store, &inventory).await?;
        let Some(loaded) = load_inventory_cache(&store).await? else {
            return Err("expected the saved inventory to round-trip".into());
        };
        assert_eq!(loaded.generated_at, inventory.generated_at);
        Ok(())
    }
}
