//! Shared application state for all handlers (spec §4.9, §9).

use crate::allowlist::IpAllowlist;
use crate::auth::password::PasswordTransport;
use crate::config::ServerConfig;
use crate::metadata::{AdminUser, MetadataStore};
use crate::metrics::RegistryMetrics;
use crate::publish::UploadSessions;
use crate::rate_limit::RateLimiter;
use crate::storage::{BlobStore, BlobStores};
use crate::upstream::{CachingProxy, UpstreamClient};
use crate::webhook::WebhookDispatcher;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for every route handler.
#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<BlobStores>,
    pub uploads: Arc<UploadSessions>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub proxy: Arc<CachingProxy>,
    pub rate_limiter: Arc<RateLimiter>,
    pub admin_allowlist: Arc<IpAllowlist>,
    pub password_transport: Arc<PasswordTransport>,
    pub metrics: Arc<RegistryMetrics>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Assemble application state from configuration: build the metadata
    /// store, blob stores, upstream client, and the derived services that
    /// depend on them (spec §9 startup sequence).
    pub async fn build(config: ServerConfig) -> crate::error::Result<Self> {
        let metadata = crate::metadata::build_metadata_store(&config.database_url).await?;
        metadata.run_migrations().await?;

        let blobs = if let Some(bucket) = &config.s3_bucket {
            #[cfg(feature = "s3")]
            {
                let s3_config = crate::storage::S3StorageConfig::new(bucket.clone())
                    .with_region(config.s3_region.clone().unwrap_or_default());
                let s3_config = match &config.s3_endpoint {
                    Some(endpoint) => s3_config.with_endpoint(endpoint.clone()),
                    None => s3_config,
                };
                let hosted = Arc::new(crate::storage::S3Storage::connect(s3_config.clone()).await?);
                let cache = Arc::new(crate::storage::S3Storage::connect(s3_config).await?);
                hosted.ensure_ready().await?;
                cache.ensure_ready().await?;
                BlobStores { hosted, cache }
            }
            #[cfg(not(feature = "s3"))]
            {
                let _ = bucket;
                return Err(crate::error::RegistryError::Internal(
                    "S3_BUCKET configured but the s3 feature is disabled".to_string(),
                ));
            }
        } else {
            let stores = BlobStores::filesystem(&config.storage_path);
            stores.hosted.ensure_ready().await?;
            stores.cache.ensure_ready().await?;
            stores
        };
        let blobs = Arc::new(blobs);

        let uploads = Arc::new(UploadSessions::new(config.max_upload_size_bytes));
        uploads.clone().spawn_reaper();

        let webhooks = Arc::new(WebhookDispatcher::new(metadata.clone()));

        let upstream = if config.enable_upstream_proxy {
            match &config.upstream_url {
                Some(url) => Some(Arc::new(UpstreamClient::new(url.clone())?)),
                None => {
                    tracing::warn!("ENABLE_UPSTREAM_PROXY is set but UPSTREAM_URL is empty; proxy disabled");
                    None
                }
            }
        } else {
            None
        };
        let proxy = Arc::new(CachingProxy::new(
            metadata.clone(),
            blobs.hosted.clone(),
            blobs.cache.clone(),
            upstream,
        ));

        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window,
        ));
        rate_limiter.clone().spawn_reaper();

        let admin_allowlist = Arc::new(IpAllowlist::new("/admin", &config.admin_ip_whitelist));

        let password_transport = Arc::new(PasswordTransport::generate()?);
        let metrics = Arc::new(RegistryMetrics::new()?);

        bootstrap_default_admin(metadata.as_ref()).await?;

        Ok(Self {
            metadata,
            blobs,
            uploads,
            webhooks,
            proxy,
            rate_limiter,
            admin_allowlist,
            password_transport,
            metrics,
            config: Arc::new(config),
        })
    }

    /// Construct state around fully-built components, bypassing `from_env`
    /// wiring — used by integration tests that need an in-memory store.
    pub fn assemble(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<BlobStores>,
        config: ServerConfig,
    ) -> crate::error::Result<Self> {
        let uploads = Arc::new(UploadSessions::new(config.max_upload_size_bytes));
        let webhooks = Arc::new(WebhookDispatcher::new(metadata.clone()));
        let proxy = Arc::new(CachingProxy::new(
            metadata.clone(),
            blobs.hosted.clone(),
            blobs.cache.clone(),
            None,
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window,
        ));
        let admin_allowlist = Arc::new(IpAllowlist::new("/admin", &config.admin_ip_whitelist));
        let password_transport = Arc::new(PasswordTransport::generate()?);
        let metrics = Arc::new(RegistryMetrics::new()?);
        Ok(Self {
            metadata,
            blobs,
            uploads,
            webhooks,
            proxy,
            rate_limiter,
            admin_allowlist,
            password_transport,
            metrics,
            config: Arc::new(config),
        })
    }
}

/// Username and password for the bootstrap admin account created when the
/// store has no admins yet (spec §9 startup sequence). The forced
/// `must_change_password` flag keeps these values useless past first login.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "ChangeMe123!";

async fn bootstrap_default_admin(metadata: &dyn MetadataStore) -> crate::error::Result<()> {
    if metadata.count_admin_users().await? > 0 {
        return Ok(());
    }

    tracing::warn!(
        username = DEFAULT_ADMIN_USERNAME,
        "no admin users found; creating bootstrap admin with a default password that must be changed on first login"
    );

    let password_hash = crate::auth::password::hash_password(DEFAULT_ADMIN_PASSWORD)?;
    metadata
        .create_admin_user(AdminUser {
            id: uuid::Uuid::new_v4().to_string(),
            username: DEFAULT_ADMIN_USERNAME.to_string(),
            password_hash,
            is_active: true,
            must_change_password: true,
            last_login_at: None,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::sqlite::SqliteMetadataStore;

    #[tokio::test]
    async fn assemble_builds_usable_state() {
        let metadata = Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
        let blobs = Arc::new(BlobStores::in_memory());
        let mut config = ServerConfig::from_env();
        config.rate_limit_window = Duration::from_secs(60);
        let state = AppState::assemble(metadata, blobs, config).unwrap();
        assert!(!state.proxy.upstream_enabled());
    }
}
</content>
