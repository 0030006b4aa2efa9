// crates/deployer-state/src/object_store.rs
// ============================================================================
// Module: Object Store
// Description: The `ObjectStore` trait and its local-filesystem and S3
// implementations.
// Purpose: Give the state document and inventory cache one storage
// abstraction, selected by the package's `object_store_location` URI scheme.
// Dependencies: aws-sdk-s3, aws-config, tokio::fs
// ============================================================================

//! ## Overview
//! Writes are atomic, whole-object replacements: the local backend writes to
//! a temp file in the same directory and renames over the target; the S3
//! backend performs a single `PutObject`. `get` returns `None` rather than an
//! error when the object does not exist, since a first-run package has no
//! `state.json` yet.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StateError;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Blob storage abstraction the state document and inventory cache are
/// persisted through.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads an object, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the backend cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError>;

    /// Writes an object as a single atomic, whole-object replacement.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the backend cannot be reached.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StateError>;

    /// Returns whether an object exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the backend cannot be reached.
    async fn exists(&self, key: &str) -> Result<bool, StateError>;
}

// ============================================================================
// SECTION: Location Parsing
// ============================================================================

/// Builds the `ObjectStore` implementation selected by `location`'s scheme.
///
/// # Errors
///
/// Returns [`StateError::UnsupportedLocation`] for any scheme other than
/// `file://` or `s3://`, and propagates backend initialization failures.
pub async fn object_store_for_location(location: &str) -> Result<Arc<dyn ObjectStore>, StateError> {
    let parsed = url::Url::parse(location).map_err(|_err| StateError::UnsupportedLocation(location.to_string()))?;
    match parsed.scheme() {
        "file" => {
            let root = PathBuf::from(parsed.path());
            Ok(Arc::new(LocalFsObjectStore::new(root)))
        }
        "s3" => {
            let bucket = parsed.host_str().ok_or_else(|| StateError::UnsupportedLocation(location.to_string()))?.to_string();
            let prefix = parsed.path().trim_start_matches('/').to_string();
            let store = S3ObjectStore::new(bucket, prefix).await?;
            Ok(Arc::new(store))
        }
        other => Err(StateError::UnsupportedLocation(other.to_string())),
    }
}

// ============================================================================
// SECTION: Local Filesystem Backend
// ============================================================================

/// Local-filesystem-backed object store, used by default and in tests.
///
/// # Invariants
/// - `put` never leaves a partially-written file at `key`'s path: it writes
///   to a sibling temp file first and renames into place.
pub struct LocalFsObjectStore {
    /// Directory every key is resolved relative to.
    root: PathBuf,
}

impl LocalFsObjectStore {
    /// Creates a store rooted at `root`; `root` is created lazily on first
    /// write.
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolves a key to its absolute path under `root`.
    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        let path = self.resolve(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StateError::Io(err)),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StateError> {
        let path = self.resolve(key);
        let Some(parent) = path.parent() else {
            return Err(StateError::Backend(format!("key {key} has no parent directory")));
        };
        fs::create_dir_all(parent).await?;

        let temp_path = temp_sibling_path(parent, &path);
        let mut temp_file = fs::File::create(&temp_path).await?;
        temp_file.write_all(&bytes).await?;
        temp_file.flush().await?;
        drop(temp_file);
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        Ok(fs::try_exists(self.resolve(key)).await?)
    }
}

/// Builds a sibling temp path for `target` so writes can be renamed into place atomically.
fn temp_sibling_path(parent: &Path, target: &Path) -> PathBuf {
    let file_name = target.file_name().map_or_else(|| "object".to_string(), |name| name.to_string_lossy().to_string());
    parent.join(format!(".{file_name}.tmp-{}", std::process::id()))
}

// ============================================================================
// SECTION: S3 Backend
// ============================================================================

/// S3-backed object store, selected when the location URI has an `s3://`
/// scheme.
pub struct S3ObjectStore {
    /// AWS SDK client used for every request.
    client: Client,
    /// Target bucket name.
    bucket: String,
    /// Key prefix, normalized to end with `/` unless empty.
    prefix: String,
}

impl S3ObjectStore {
    /// Builds a new S3-backed object store for `bucket`, prefixing every key
    /// with `prefix`.
    ///
    /// Honors the standard AWS SDK environment variables for credentials,
    /// region and endpoint override, plus `AWS_S3_FORCE_PATH_STYLE` (`true`
    /// or `1`) for S3-compatible backends that don't support virtual-hosted
    /// addressing, such as a locally-run MinIO instance.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if AWS credentials or region cannot be
    /// resolved.
    pub async fn new(bucket: String, prefix: String) -> Result<Self, StateError> {
        let shared_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if std::env::var("AWS_S3_FORCE_PATH_STYLE").is_ok_and(|value| value == "true" || value == "1") {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());
        let prefix = normalize_prefix(&prefix);
        Ok(Self { client, bucket, prefix })
    }

    /// Prepends the configured prefix to `key`.
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() { key.to_string() } else { format!("{}{}", self.prefix, key) }
    }
}

/// Trims leading/trailing slashes from `raw` and appends a single trailing slash unless empty.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() { String::new() } else { format!("{trimmed}/") }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        let key = self.prefixed_key(key);
        let result = self.client.get_object().bucket(&self.bucket).key(&key).send().await;
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(aws_sdk_s3::operation::get_object::GetObjectError::is_no_such_key) {
                    return Ok(None);
                }
                return Err(StateError::Backend(err.to_string()));
            }
        };
        let bytes = output.body.collect().await.map_err(|err| StateError::Backend(err.to_string()))?;
        Ok(Some(bytes.into_bytes().to_vec()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StateError> {
        let key = self.prefixed_key(key);
        let body = ByteStream::from(bytes);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|err| StateError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        let key = self.prefixed_key(key);
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_output) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(aws_sdk_s3::operation::head_object::HeadObjectError::is_not_found) => Ok(false),
            Err(err) => Err(StateError::Backend(err.to_string())),
        }
    }
}
