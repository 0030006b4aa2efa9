// crates/deployer-state/src/state.rs
// ============================================================================
// Module: State Document
// Description: The persisted `state.json` blob — one `CurrentState` per
// deployment key — and periodic checkpoint scheduling.
// Purpose: Give the reconciler a typed load/save boundary over the object
// store, and the supervisor a simple due-for-checkpoint predicate.
// Dependencies: crate::object_store, deployer_core, serde_json
// ============================================================================

//! ## Overview
//! A failing step never updates its own `CurrentState`; successful steps are
//! persisted at the next checkpoint and at run end. Because a forcibly
//! aborted process is recoverable from the last checkpoint, `save_state`
//! always writes the whole document (the object store's atomicity guarantee
//! is what makes a torn write impossible, not a partial-update protocol).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use deployer_core::CurrentState;
use deployer_core::DeploymentKey;
use serde::Deserialize;
use serde::Serialize;

use crate::error::StateError;
use crate::object_store::ObjectStore;

/// Object key the state document is persisted under.
pub const STATE_OBJECT_KEY: &str = "state.json";

// ============================================================================
// SECTION: Document Shape
// ============================================================================

/// The persisted state document: one record per deployment key with current
/// state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateDocument {
    /// Every deployment with persisted current state.
    pub deployments: Vec<DeploymentRecord>,
}

/// One deployment's persisted current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// The deployment key.
    pub deployment: DeploymentKey,
    /// Its current state as of the last successful apply.
    pub current_state: CurrentState,
}

impl StateDocument {
    /// Converts the document into a lookup map, keyed by deployment key.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<DeploymentKey, CurrentState> {
        self.deployments.into_iter().map(|record| (record.deployment, record.current_state)).collect()
    }

    /// Builds a document from a lookup map, in deterministic key order.
    #[must_use]
    pub fn from_map(map: &BTreeMap<DeploymentKey, CurrentState>) -> Self {
        Self {
            deployments: map
                .iter()
                .map(|(key, state)| DeploymentRecord {
                    deployment: key.clone(),
                    current_state: state.clone(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// SECTION: Load / Save
// ============================================================================

/// Loads the persisted state document, or an empty map if none exists yet
/// (the first run against a fresh object-store location).
///
/// # Errors
///
/// Returns [`StateError`] if the backend cannot be reached or the stored
/// document is not valid JSON.
pub async fn load_state(store: &dyn ObjectStore) -> Result<BTreeMap<DeploymentKey, CurrentState>, StateError> {
    let Some(bytes) = store.get(STATE_OBJECT_KEY).await? else {
        return Ok(BTreeMap::new());
    };
    let document: StateDocument = serde_json::from_slice(&bytes).map_err(|source| StateError::Parse { what: "state.json", source })?;
    Ok(document.into_map())
}

/// Persists `state` as a single atomic, whole-document replacement.
///
/// # Errors
///
/// Returns [`StateError`] if the backend cannot be reached or serialization
/// fails.
pub async fn save_state(store: &dyn ObjectStore, state: &BTreeMap<DeploymentKey, CurrentState>) -> Result<(), StateError> {
    let document = StateDocument::from_map(state);
    let bytes = serde_json::to_vec_pretty(&document).map_err(|source| StateError::Parse { what: "state.json", source })?;
    store.put(STATE_OBJECT_KEY, bytes).await
}

// ============================================================================
// SECTION: Checkpoint Schedule
// ============================================================================

/// Tracks whether enough wall-clock time has elapsed to justify an
/// intermediate checkpoint, per `--save-state-every-seconds`.
///
/// # Invariants
/// - A zero interval means "checkpoint is always due" (checkpoint after
///   every completed step).
pub struct CheckpointSchedule {
    /// Minimum wall-clock gap between checkpoints; zero means always due.
    interval: Duration,
    /// Wall-clock time accumulated since the last checkpoint.
    elapsed_since_last_save: Duration,
}

impl CheckpointSchedule {
    /// Creates a schedule with the given interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed_since_last_save: Duration::ZERO,
        }
    }

    /// Advances the schedule by `tick` since the last call, returning whether
    /// a checkpoint is now due. Resets the internal clock if due.
    pub fn advance(&mut self, tick: Duration) -> bool {
        self.elapsed_since_last_save += tick;
        let due = self.interval.is_zero() || self.elapsed_since_last_save >= self.interval;
        if due {
            self.elapsed_since_last_save = Duration::ZERO;
        }
        due
    }
}
