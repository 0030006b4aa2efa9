// crates/deployer-engines/src/registry.rs
// ============================================================================
// Module: Engine Registry
// Description: Routes a module's declared `engine` name to a registered
// `Dispatcher` implementation.
// Purpose: Let `deployer-cli` wire up the `script`/`template` engines (and
// any future engine) by name without the scheduler knowing concrete types.
// Dependencies: deployer_core
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use deployer_core::Dispatcher;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Engine implementations keyed by the name modules declare in their
/// `engine` field.
///
/// # Invariants
/// - Registration is a setup-time operation; the registry is read-only once
///   a run starts.
#[derive(Default)]
pub struct EngineRegistry {
    /// Registered engines keyed by name.
    engines: BTreeMap<String, Arc<dyn Dispatcher>>,
}

impl EngineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `engine` under `name`, replacing any prior registration.
    pub fn register(&mut self, name: impl Into<String>, engine: Arc<dyn Dispatcher>) {
        self.engines.insert(name.into(), engine);
    }

    /// Looks up the engine registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Dispatcher>> {
        self.engines.get(name).cloned()
    }

    /// Returns the names of every registered engine, in registration order
    /// by name.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }
}
