//! Blob store abstraction (spec §4.2).
//!
//! Opaque content-addressed byte storage behind one trait, with two
//! production backends (local filesystem, S3-compatible object store) plus
//! an in-memory backend used by tests. A second instance of the same trait
//! backs the upstream cache namespace, independent of the hosted namespace.

use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Blob store trait implemented by every backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the backing container (directory / bucket) if missing.
    async fn ensure_ready(&self) -> Result<()>;

    /// Store bytes under `key`, overwriting any existing value without
    /// ever exposing a partial write to a concurrent reader.
    async fn put_archive(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch bytes stored at `key`. Fails `NotFound` if absent.
    async fn get_archive(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove the blob at `key`, if any.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Local filesystem-backed blob store.
///
/// Keys are archive keys of the shape `<package>/<version>-<sha>.tar.gz`
/// (see [`crate::package::archive_key`]); they already carry enough
/// structure to avoid directory fan-out problems, so files are stored
/// directly under `root/<key>` with parent directories created on write.
/// Writes land in a sibling `.tmp-<uuid>` file and are renamed into place so
/// readers never observe a partial write.
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FilesystemStorage {
    async fn ensure_ready(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn put_archive(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = dest.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &dest).await?;
        Ok(())
    }

    async fn get_archive(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RegistryError::NotFound(key.to_string()),
                _ => RegistryError::StorageError(e.to_string()),
            })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RegistryError::StorageError(e.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await.unwrap_or(false))
    }
}

/// In-memory blob store used by unit and integration tests.
#[derive(Default)]
pub struct InMemoryStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryStorage {
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn put_archive(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get_archive(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(key))
    }
}

/// Configuration for the S3-compatible backend (S3, R2, MinIO).
#[derive(Debug, Clone, Default)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
}

impl S3StorageConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// S3-compatible object store backend.
#[cfg(feature = "s3")]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
}

#[cfg(feature = "s3")]
impl S3Storage {
    pub async fn connect(config: S3StorageConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let mut sdk_config = loader.load().await;
        if let Some(endpoint) = &config.endpoint {
            let builder = aws_sdk_s3::config::Builder::from(&sdk_config)
                .endpoint_url(endpoint)
                .force_path_style(true);
            sdk_config = builder.build().into();
        }
        let client = aws_sdk_s3::Client::new(&sdk_config);
        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{p}/{key}"),
            None => key.to_string(),
        }
    }
}

#[cfg(feature = "s3")]
#[async_trait]
impl BlobStore for S3Storage {
    async fn ensure_ready(&self) -> Result<()> {
        // Bucket creation is an out-of-band operational concern; we only
        // verify reachability here.
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| RegistryError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn put_archive(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(bytes.to_vec().into())
            .send()
            .await
            .map_err(|e| RegistryError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn get_archive(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    RegistryError::NotFound(key.to_string())
                } else {
                    RegistryError::StorageError(e.to_string())
                }
            })?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| RegistryError::StorageError(e.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| RegistryError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("NotFound") => Ok(false),
            Err(e) => Err(RegistryError::StorageError(e.to_string())),
        }
    }
}

/// Which backend a blob store namespace resolved to, kept around for
/// health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStoreKind {
    Filesystem,
    S3,
    InMemory,
}

/// A named pair of blob stores: the hosted namespace and the (separate)
/// upstream cache namespace, per spec §4.2/§4.5.
pub struct BlobStores {
    pub hosted: Arc<dyn BlobStore>,
    pub cache: Arc<dyn BlobStore>,
}

impl BlobStores {
    /// Build filesystem-backed stores rooted at `root/hosted` and
    /// `root/cache`.
    pub fn filesystem(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            hosted: Arc::new(FilesystemStorage::new(root.join("hosted"))),
            cache: Arc::new(FilesystemStorage::new(root.join("cache"))),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            hosted: Arc::new(InMemoryStorage::new()),
            cache: Arc::new(InMemoryStorage::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path());
        store.ensure_ready().await.unwrap();
        store.put_archive("alpha/1.0.0-deadbeef.tar.gz", b"hello").await.unwrap();
        assert!(store.exists("alpha/1.0.0-deadbeef.tar.gz").await.unwrap());
        let bytes = store.get_archive("alpha/1.0.0-deadbeef.tar.gz").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn filesystem_overwrite_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path());
        store.put_archive("k", b"first").await.unwrap();
        store.put_archive("k", b"second").await.unwrap();
        assert_eq!(store.get_archive("k").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStorage::new(dir.path());
        let err = store.get_archive("missing").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn in_memory_delete_is_idempotent() {
        let store = InMemoryStorage::new();
        store.put_archive("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }
}
</content>
