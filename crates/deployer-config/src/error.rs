// crates/deployer-config/src/error.rs
// ============================================================================
// Module: Config Errors
// Description: Failure modes for loading and validating a package file.
// Purpose: Give callers a typed, displayable reason a package was rejected.
// Dependencies: thiserror
// ============================================================================

use deployer_core::ValidationError;
use thiserror::Error;

/// Maximum accepted package file path length, in bytes.
pub const MAX_PACKAGE_PATH_LEN: usize = 4_096;
/// Maximum accepted path component length, in bytes.
pub const MAX_PACKAGE_PATH_COMPONENT_LEN: usize = 255;
/// Maximum accepted package file size, in bytes.
pub const MAX_PACKAGE_FILE_BYTES: u64 = 8 * 1024 * 1024;

/// Failure loading or validating a package definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The package path exceeds [`MAX_PACKAGE_PATH_LEN`].
    #[error("package path exceeds max length")]
    PathTooLong,
    /// A single path component exceeds [`MAX_PACKAGE_PATH_COMPONENT_LEN`].
    #[error("package path component too long")]
    PathComponentTooLong,
    /// The package file could not be read from disk.
    #[error("failed to read package file: {0}")]
    Io(#[from] std::io::Error),
    /// The package file exceeds [`MAX_PACKAGE_FILE_BYTES`].
    #[error("package file exceeds size limit")]
    FileTooLarge,
    /// The package file is not valid UTF-8.
    #[error("package file must be utf-8")]
    NotUtf8,
    /// The YAML document could not be parsed, or contained unknown fields.
    #[error("failed to parse package file: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// A deployment block, module, or engine default failed semantic
    /// validation beyond what schema deserialization alone catches.
    #[error("invalid package definition: {0}")]
    Invalid(String),
    /// Scope expansion or variable resolution failed for a module.
    #[error("module {module}: {source}")]
    Validation {
        /// The module whose resolution failed.
        module: String,
        /// The underlying error.
        #[source]
        source: ValidationError,
    },
    /// The module's source directory could not be hashed.
    #[error("module {module}: failed to hash module files: {source}")]
    ModuleHash {
        /// The module whose source could not be hashed.
        module: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
