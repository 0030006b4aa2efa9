// crates/deployer-state/src/error.rs
// ============================================================================
// Module: State Errors
// Description: Failure modes for object-store access and state/inventory
// blob (de)serialization.
// Purpose: Give callers a typed, displayable reason persistence failed.
// Dependencies: thiserror
// ============================================================================

use thiserror::Error;

/// Failure reading, writing, or parsing persisted state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The object store location URI has no recognized scheme.
    #[error("unsupported object store location: {0}")]
    UnsupportedLocation(String),
    /// The object store backend could not be reached or returned an error.
    #[error("object store backend error: {0}")]
    Backend(String),
    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
    /// The object's on-disk or wire bytes were not valid UTF-8.
    #[error("object is not valid utf-8: {0}")]
    NotUtf8(String),
    /// The object's JSON body failed to parse.
    #[error("failed to parse {what}: {source}")]
    Parse {
        /// What was being parsed (`state.json`, `orga.json`, ...).
        what: &'static str,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// A filesystem I/O operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
