// crates/deployer-core/src/hashing.rs
// ============================================================================
// Module: Module Hasher
// Description: Computes a deterministic content hash over a module's source
// files.
// Purpose: Let the reconciler detect "the module's own files changed" even
// when no variable changed, by comparing hashes recorded in current state.
// Dependencies: glob, sha2
// ============================================================================

//! ## Overview
//! The hash covers the sorted, glob-filtered set of file paths under a
//! module directory plus the bytes of each file. Sorting the path list
//! before hashing makes the result independent of filesystem iteration
//! order, which otherwise varies across platforms and directory entry
//! caching.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: File Selection
// ============================================================================

/// Include/exclude glob patterns used to select a module's hashed files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPatterns {
    /// Patterns (relative to the module root) to include; empty means all.
    #[serde(default)]
    pub include: Vec<String>,
    /// Patterns to exclude, applied after `include`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl HashPatterns {
    /// Returns true if `relative_path` passes the include set and is not excluded.
    fn matches(&self, relative_path: &str) -> bool {
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|pattern| glob::Pattern::new(pattern).is_ok_and(|p| p.matches(relative_path)));
        if !included {
            return false;
        }
        !self
            .exclude
            .iter()
            .any(|pattern| glob::Pattern::new(pattern).is_ok_and(|p| p.matches(relative_path)))
    }
}

/// Walks `root` and returns the sorted, pattern-filtered list of regular
/// files, as paths relative to `root` with forward-slash separators.
///
/// # Errors
///
/// Returns an [`io::Error`] if `root` or any subdirectory cannot be read.
fn collect_files(root: &Path, patterns: &HashPatterns) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if patterns.matches(&relative) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Computes the hex-encoded SHA-256 hash of a module directory's filtered
/// file set: sorted relative paths and file contents, in that interleaved
/// order, so a rename alone changes the hash even if no byte content does.
///
/// # Errors
///
/// Returns an [`io::Error`] if any selected file cannot be read.
pub fn hash_module(root: &Path, patterns: &HashPatterns) -> io::Result<String> {
    let files = collect_files(root, patterns)?;
    let mut hasher = Sha256::new();
    for path in &files {
        let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        let contents = fs::read(path)?;
        hasher.update(&contents);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Renders `bytes` as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn identical_content_same_layout_hashes_equal() -> TestResult {
        let dir_a = tempdir()?;
        let dir_b = tempdir()?;
        fs::write(dir_a.path().join("main.tf"), b"resource {}")?;
        fs::write(dir_b.path().join("main.tf"), b"resource {}")?;

        let patterns = HashPatterns::default();
        let hash_a = hash_module(dir_a.path(), &patterns)?;
        let hash_b = hash_module(dir_b.path(), &patterns)?;
        assert_eq!(hash_a, hash_b);
        Ok(())
    }

    #[test]
    fn changed_content_changes_hash() -> TestResult {
        let dir = tempdir()?;
        fs::write(dir.path().join("main.tf"), b"resource {}")?;
        let before = hash_module(dir.path(), &HashPatterns::default())?;
        fs::write(dir.path().join("main.tf"), b"resource { changed = true }")?;
        let after = hash_module(dir.path(), &HashPatterns::default())?;
        assert_ne!(before, after);
        Ok(())
    }

    #[test]
    fn excluded_files_do_not_affect_hash() -> TestResult {
        let dir = tempdir()?;
        fs::write(dir.path().join("main.tf"), b"resource {}")?;
        let patterns = HashPatterns::default();
        let before = hash_module(dir.path(), &patterns)?;

        fs::write(dir.path().join("README.md"), b"docs")?;
        let with_readme_included = hash_module(dir.path(), &patterns)?;
        assert_ne!(before, with_readme_included);

        let excluding = HashPatterns {
            include: vec![],
            exclude: vec!["*.md".to_string()],
        };
        let with_readme_excluded = hash_module(dir.path(), &excluding)?;
        assert_eq!(before, with_readme_excluded);
        Ok(())
    }

    #[test]
    fn rename_alone_changes_hash() -> TestResult {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.tf"), b"resource {}")?;
        let before = hash_module(dir.path(), &HashPatterns::default())?;
        fs::remove_file(dir.path().join("a.tf"))?;
        fs::write(dir.path().join("b.tf"), b"resource {}")?;
        let after = hash_module(dir.path(), &HashPatterns::default())?;
        assert_ne!(before, after);
        Ok(())
    }
}
