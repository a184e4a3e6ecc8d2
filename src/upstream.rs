//! Upstream HTTP client and read-through caching proxy (spec §4.5): the four
//! operations the caching proxy needs, plus the read-through download
//! policy itself.

use crate::content_hash::ContentHash;
use crate::error::{RegistryError, Result};
use crate::metadata::{Download, MetadataStore, PackageVersion};
use crate::package::{self, PackageManifest};
use crate::storage::BlobStore;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

const BATCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct UpstreamPackageInfo {
    pub name: String,
    pub versions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamVersionInfo {
    pub name: String,
    pub version: String,
    pub manifest: PackageManifest,
    pub archive_url: String,
}

/// Thin HTTP client over the upstream registry's public API.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RegistryError::UpstreamError(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub async fn get_package(&self, name: &str) -> Result<Option<UpstreamPackageInfo>> {
        let url = format!("{}/api/packages/{name}", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: serde_json::Value = response.error_for_status()?.json().await?;
        let versions = body
            .get("versions")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("version").and_then(|v| v.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(UpstreamPackageInfo {
            name: name.to_string(),
            versions,
        }))
    }

    pub async fn get_version(&self, name: &str, version: &str) -> Result<Option<UpstreamVersionInfo>> {
        let url = format!("{}/api/packages/{name}/versions/{version}", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: serde_json::Value = response.error_for_status()?.json().await?;
        let archive_url = body
            .get("archive_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RegistryError::UpstreamError("missing archive_url".to_string()))?
            .to_string();
        let manifest: PackageManifest = body
            .get("manifest")
            .cloned()
            .ok_or_else(|| RegistryError::UpstreamError("missing manifest".to_string()))
            .and_then(|v| serde_json::from_value(v).map_err(RegistryError::from))?;
        Ok(Some(UpstreamVersionInfo {
            name: name.to_string(),
            version: version.to_string(),
            manifest,
            archive_url,
        }))
    }

    pub async fn search_packages(&self, query: &str, page: u32) -> Result<Vec<String>> {
        let url = format!("{}/api/packages/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("q", query), ("page", &page.to_string())])
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        Ok(body
            .get("results")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get("name").and_then(|v| v.as_str()).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Fetch several packages with bounded concurrency.
    pub async fn get_packages_batch(&self, names: &[String]) -> Vec<UpstreamPackageInfo> {
        stream::iter(names.iter().cloned())
            .map(|name| async move { self.get_package(&name).await.ok().flatten() })
            .buffer_unordered(BATCH_CONCURRENCY)
            .filter_map(|result| async move { result })
            .collect()
            .await
    }

    pub async fn download_archive(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self.http.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Implements the read-through download policy of spec §4.5.
pub struct CachingProxy {
    metadata: Arc<dyn MetadataStore>,
    hosted: Arc<dyn BlobStore>,
    cache: Arc<dyn BlobStore>,
    upstream: Option<Arc<UpstreamClient>>,
}

impl CachingProxy {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        hosted: Arc<dyn BlobStore>,
        cache: Arc<dyn BlobStore>,
        upstream: Option<Arc<UpstreamClient>>,
    ) -> Self {
        Self {
            metadata,
            hosted,
            cache,
            upstream,
        }
    }

    /// Resolve a package version's archive bytes, fetching and caching
    /// from upstream if the version isn't hosted locally.
    pub async fn serve_archive(&self, name: &str, version: &str, ip: Option<String>) -> Result<Vec<u8>> {
        if let Some(stored) = self.metadata.get_package_version(name, version).await? {
            let package = self
                .metadata
                .get_package(name)
                .await?
                .ok_or_else(|| RegistryError::NotFound(format!("package '{name}'")))?;
            let store: &Arc<dyn BlobStore> = if package.is_upstream_cache { &self.cache } else { &self.hosted };
            let bytes = store.get_archive(&stored.archive_key).await?;
            self.log_download(name, version, ip).await;
            return Ok(bytes);
        }

        let upstream = self.upstream.as_ref().ok_or(RegistryError::UpstreamDisabled)?;
        let info = upstream
            .get_version(name, version)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("package '{name}' version '{version}'")))?;
        let bytes = upstream
            .download_archive(&info.archive_url)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("archive for '{name}' '{version}'")))?;

        let sha256 = ContentHash::from_bytes(&bytes);
        let archive_key = package::archive_key(name, version, &sha256.to_hex());
        if self.cache.put_archive(&archive_key, &bytes).await.is_ok() {
            let _ = self
                .metadata
                .upsert_package_version(
                    crate::metadata::ANONYMOUS_USER_ID,
                    true,
                    PackageVersion {
                        package: name.to_string(),
                        version: version.to_string(),
                        manifest: info.manifest,
                        archive_key,
                        archive_sha256: sha256.to_hex(),
                        published_at: Utc::now(),
                        is_retracted: false,
                        retracted_at: None,
                        retraction_message: None,
                    },
                )
                .await;
        }
        self.log_download(name, version, ip).await;
        Ok(bytes)
    }

    async fn log_download(&self, name: &str, version: &str, ip: Option<String>) {
        let _ = self
            .metadata
            .record_download(Download {
                package: name.to_string(),
                version: version.to_string(),
                ip,
                user_agent: None,
                at: Utc::now(),
            })
            .await;
    }

    /// Deletes all upstream-cached packages and their cache-namespace
    /// blobs.
    pub async fn clear_cache(&self) -> Result<u64> {
        let cleared = self.metadata.clear_upstream_cache().await?;
        for version in &cleared {
            let _ = self.cache.delete(&version.archive_key).await;
        }
        Ok(cleared.len() as u64)
    }

    pub fn upstream_enabled(&self) -> bool {
        self.upstream.is_some()
    }

    /// Look up a package upstream when it isn't hosted locally; `None` if
    /// the proxy is disabled or upstream doesn't have it either.
    pub async fn get_upstream_package(&self, name: &str) -> Result<Option<UpstreamPackageInfo>> {
        match &self.upstream {
            Some(client) => client.get_package(name).await,
            None => Ok(None),
        }
    }

    /// Look up a package version upstream when it isn't hosted locally.
    pub async fn get_upstream_version(&self, name: &str, version: &str) -> Result<Option<UpstreamVersionInfo>> {
        match &self.upstream {
            Some(client) => client.get_version(name, version).await,
            None => Ok(None),
        }
    }

    /// Search the upstream registry by substring. Errors with
    /// `upstream_disabled` rather than returning an empty result, since
    /// callers use this to decide whether to surface a 503.
    pub async fn search_upstream(&self, query: &str, page: u32) -> Result<Vec<String>> {
        let client = self.upstream.as_ref().ok_or(RegistryError::UpstreamDisabled)?;
        client.search_packages(query, page).await
    }
}

</content>
