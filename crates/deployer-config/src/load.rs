// crates/deployer-config/src/load.rs
// ============================================================================
// Module: Package Loader
// Description: Reads a package file from disk, validating its path and size
// before handing it to the YAML parser.
// Purpose: Fail closed on pathological input (oversized files, runaway
// paths, non-UTF-8 content) before any deserialization work happens.
// Dependencies: crate::error, crate::model, serde_yaml
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::error::MAX_PACKAGE_FILE_BYTES;
use crate::error::MAX_PACKAGE_PATH_COMPONENT_LEN;
use crate::error::MAX_PACKAGE_PATH_LEN;
use crate::model::PackageDefinition;

// ============================================================================
// SECTION: Load
// ============================================================================

impl PackageDefinition {
    /// Loads and parses a package file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PathTooLong`]/[`ConfigError::PathComponentTooLong`]
    /// if `path` is pathological, [`ConfigError::FileTooLarge`] if the file
    /// exceeds [`MAX_PACKAGE_FILE_BYTES`], [`ConfigError::NotUtf8`] if its
    /// bytes are not valid UTF-8, [`ConfigError::Io`] if it cannot be read,
    /// and [`ConfigError::Parse`] if it is not a well-formed package
    /// document (including unknown fields at any nesting level).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        validate_path(path)?;

        let metadata = fs::metadata(path)?;
        if metadata.len() > MAX_PACKAGE_FILE_BYTES {
            return Err(ConfigError::FileTooLarge);
        }

        let bytes = fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|_err| ConfigError::NotUtf8)?;

        let definition: Self = serde_yaml::from_str(&text)?;
        Ok(definition)
    }
}

/// Rejects pathological paths before the file is ever opened.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().len() > MAX_PACKAGE_PATH_LEN {
        return Err(ConfigError::PathTooLong);
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PACKAGE_PATH_COMPONENT_LEN {
            return Err(ConfigError::PathComponentTooLong);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn assert_invalid(result: Result<PackageDefinition, ConfigError>, matcher: impl Fn(&ConfigError) -> bool) -> TestResult {
        let Err(err) = result else {
            return Err("expected package load to fail".into());
        };
        if !matcher(&err) {
            return Err(format!("unexpected error variant: {err}").into());
        }
        Ok(())
    }

    #[test]
    fn load_rejects_path_too_long() -> TestResult {
        let long_path = "a".repeat(MAX_PACKAGE_PATH_LEN + 1);
        let path = Path::new(&long_path);
        assert_invalid(PackageDefinition::load(path), |err| matches!(err, ConfigError::PathTooLong))
    }

    #[test]
    fn load_rejects_oversized_file() -> TestResult {
        let mut file = NamedTempFile::new()?;
        let payload = vec![b'a'; (MAX_PACKAGE_FILE_BYTES + 1) as usize];
        file.write_all(&payload)?;
        assert_invalid(PackageDefinition::load(file.path()), |err| matches!(err, ConfigError::FileTooLarge))
    }

    #[test]
    fn load_rejects_non_utf8_file() -> TestResult {
        let mut file = NamedTempFile::new()?;
        file.write_all(&[0xFF, 0xFE, 0xFF])?;
        assert_invalid(PackageDefinition::load(file.path()), |err| matches!(err, ConfigError::NotUtf8))
    }

    #[test]
    fn load_rejects_unknown_top_level_field() -> TestResult {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "package:\n  object_store_location: file:///tmp/state\nmodules: {{}}\nbogus_field: true\n"
        )?;
        assert_invalid(PackageDefinition::load(file.path()), |err| matches!(err, ConfigError::Parse(_)))
    }

    #[test]
    fn load_parses_a_minimal_package() -> TestResult {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            "package:\n  object_store_location: file:///tmp/state\nmodules: {{}}\n"
        )?;
        let parsed = PackageDefinition::load(file.path())?;
        assert_eq!(parsed.package.object_store_location, "file:///tmp/state");
        assert_eq!(parsed.package.concurrent_workers, 10);
        assert!(parsed.modules.is_empty());
        Ok(())
    }
}
