// crates/deployer-state/src/lib.rs
// ============================================================================
// Crate: deployer-state
// Description: Object-store persistence for the state document and
// inventory cache.
// Purpose: The only crate that knows how `state.json`/`orga.json` are
// stored; `deployer-core` depends only on the plain Rust types this crate
// serializes.
// Dependencies: see Cargo.toml
// ============================================================================

//! ## Overview
//! `object_store_for_location` picks a backend by URI scheme
//! (`file://`/`s3://`); everything above that — `load_state`/`save_state` and
//! `load_inventory_cache`/`save_inventory_cache` — works against the
//! [`ObjectStore`] trait alone.

mod error;
mod inventory_cache;
mod object_store;
mod state;

pub use error::StateError;
pub use inventory_cache::INVENTORY_OBJECT_KEY;
pub use inventory_cache::load_inventory_cache;
pub use inventory_cache::save_inventory_cache;
pub use object_store::LocalFsObjectStore;
pub use object_store::ObjectStore;
pub use object_store::S3ObjectStore;
pub use object_store::object_store_for_location;
pub use state::CheckpointSchedule;
pub use state::DeploymentRecord;
pub use state::STATE_OBJECT_KEY;
pub use state::StateDocument;
pub use state::load_state;
pub use state::save_state;
