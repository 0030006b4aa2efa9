// crates/deployer-engines/src/error.rs
// ============================================================================
// Module: Engine Errors
// Description: Failure modes specific to running a prepared command and
// managing its cache directories; everything step-facing still surfaces as
// `deployer_core::StepError`.
// Purpose: Give the process runner and credential injector a typed reason
// for a failure before it is folded into `StepError::EngineFailure`.
// Dependencies: thiserror
// ============================================================================

use thiserror::Error;

/// Failure preparing, running, or cleaning up after a prepared command.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The subprocess could not be spawned.
    #[error("failed to spawn subprocess: {0}")]
    Spawn(std::io::Error),
    /// The subprocess exited with a non-zero status.
    #[error("subprocess exited with status {0}")]
    NonZeroExit(String),
    /// The step's `output.json` could not be read after the subprocess
    /// exited.
    #[error("failed to read output.json: {0}")]
    MissingOutput(std::io::Error),
    /// A cache directory could not be created or removed.
    #[error("cache directory error: {0}")]
    CacheDir(std::io::Error),
    /// The module named in a deployment key has no known source path.
    #[error("no module path registered for {0}")]
    UnknownModule(String),
    /// Assuming the configured role failed.
    #[error("failed to assume role {role_arn}: {source}")]
    AssumeRole {
        /// The role ARN that could not be assumed.
        role_arn: String,
        /// The underlying credential-provider error.
        source: aws_credential_types::provider::error::CredentialsError,
    },
}

impl From<EngineError> for deployer_core::StepError {
    fn from(error: EngineError) -> Self {
        Self::EngineFailure(error.to_string())
    }
}
