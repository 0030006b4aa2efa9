// crates/deployer-cli/src/inventory_source.rs
// ============================================================================
// Module: File Inventory Source
// Description: Reads a JSON-encoded `Inventory` snapshot from disk.
// Purpose: The development/test-grade `InventorySource`; a production
// organization-directory client is a separate concern.
// Dependencies: deployer_core
// ============================================================================

use std::path::PathBuf;

use deployer_core::Inventory;
use deployer_core::InventoryError;
use deployer_core::InventorySource;

/// Fetches the inventory snapshot by re-reading a JSON file on every call.
///
/// # Invariants
/// - The file is read fresh on every `fetch`; staleness is governed
///   entirely by [`deployer_core::InventoryCache`]'s TTL, not by this
///   source.
pub struct FileInventorySource {
    path: PathBuf,
}

impl FileInventorySource {
    /// Creates a source reading the inventory snapshot from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InventorySource for FileInventorySource {
    fn fetch(&self) -> Result<Inventory, InventoryError> {
        let bytes = std::fs::read(&self.path).map_err(|err| InventoryError::Unavailable(format!("{}: {err}", self.path.display())))?;
        serde_json::from_slice(&bytes).map_err(|err| InventoryError::Corrupt(format!("{}: {err}", self.path.display())))
    }
}

