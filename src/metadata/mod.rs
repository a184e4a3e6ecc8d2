//! Metadata store abstraction (spec §4.1, §3).
//!
//! A transactional interface over the entities in §3, satisfied by two
//! backends: [`sqlite::SqliteMetadataStore`] (the embedded single-file
//! engine) and, behind the `postgres` feature,
//! [`postgres::PostgresMetadataStore`] (the networked engine). Callers hold
//! an `Arc<dyn MetadataStore>`; the backend is selected once at startup from
//! the database URL scheme (see [`crate::metadata::build_metadata_store`]).

pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::Result;
use crate::package::PackageManifest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Well-known id for the anonymous owner sentinel (spec §3 Ownership).
pub const ANONYMOUS_USER_ID: &str = "anonymous";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub owner_id: String,
    pub is_upstream_cache: bool,
    pub is_discontinued: bool,
    pub replaced_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVersion {
    pub package: String,
    pub version: String,
    pub manifest: PackageManifest,
    pub archive_key: String,
    pub archive_sha256: String,
    pub published_at: DateTime<Utc>,
    pub is_retracted: bool,
    pub retracted_at: Option<DateTime<Utc>>,
    pub retraction_message: Option<String>,
}

/// Denormalized read projection bundling a package with its versions
/// (spec §9 design note: `PackageInfo` is built by the store, not a cycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub package: Package,
    pub versions: Vec<PackageVersion>,
}

impl PackageInfo {
    /// The highest non-retracted semantic version, or (if all are
    /// retracted) the highest retracted version (spec §3 invariant 7).
    pub fn latest(&self) -> Option<&PackageVersion> {
        let parse = |v: &PackageVersion| semver::Version::parse(&v.version).ok();
        let mut candidates: Vec<&PackageVersion> = self.versions.iter().filter(|v| !v.is_retracted).collect();
        if candidates.is_empty() {
            candidates = self.versions.iter().collect();
        }
        candidates.into_iter().max_by(|a, b| {
            match (parse(a), parse(b)) {
                (Some(va), Some(vb)) => va.cmp(&vb),
                _ => std::cmp::Ordering::Equal,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Clamp page to [1,10000] and limit to [1,100] per spec §4.1.
    pub fn clamped(page: u32, limit: u32) -> Self {
        Self {
            page: page.clamp(1, 10_000),
            limit: limit.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1) * self.limit
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageFilter {
    pub is_upstream_cache: Option<bool>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub session_id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub is_active: bool,
    pub must_change_password: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSession {
    pub session_id: String,
    pub admin_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLoginAudit {
    pub id: String,
    pub admin_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// SHA-256(plaintext); the plaintext is never persisted (invariant 3).
    pub hash: String,
    pub user_id: String,
    pub label: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub secret: Option<String>,
    pub events: HashSet<String>,
    pub is_active: bool,
    pub failure_count: u32,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_id: String,
    pub event_type: String,
    pub payload: String,
    pub status_code: i32,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Download {
    pub package: String,
    pub version: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: String,
    pub activity_type: String,
    pub actor_type: String,
    pub actor_id: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub metadata: serde_json::Value,
    pub ip: Option<String>,
    pub at: DateTime<Utc>,
}

impl ActivityLog {
    /// Human-readable description derived from the activity fields, per
    /// spec §4.10.
    pub fn describe(&self) -> String {
        match self.target_id.as_deref() {
            Some(target) => format!("{} on {}", self.activity_type, target),
            None => self.activity_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteConfigType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub value: String,
    pub value_type: SiteConfigType,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub store_type: String,
    pub latency_ms: u64,
    pub db_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_packages: u64,
    pub total_versions: u64,
    pub total_users: u64,
    pub active_tokens: u64,
    pub total_downloads: u64,
    /// Packages mirrored from the upstream registry into the cache, counted
    /// separately from `total_packages` (which is hosted-only).
    pub upstream_cache_packages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDownloadStats {
    pub package: String,
    pub total_downloads: u64,
    pub by_day: Vec<(String, u64)>,
}

/// The transactional interface satisfied by each metadata store backend.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn run_migrations(&self) -> Result<()>;
    async fn health_check(&self) -> Result<HealthReport>;

    // -- packages -----------------------------------------------------
    async fn list_packages(&self, filter: PackageFilter, page: PageRequest) -> Result<Vec<PackageInfo>>;
    async fn search_packages(&self, query: &str, page: PageRequest) -> Result<Vec<PackageInfo>>;
    async fn get_package(&self, name: &str) -> Result<Option<Package>>;
    async fn get_package_info(&self, name: &str) -> Result<Option<PackageInfo>>;
    async fn get_package_version(&self, name: &str, version: &str) -> Result<Option<PackageVersion>>;
    async fn upsert_package_version(
        &self,
        owner_id: &str,
        is_upstream_cache: bool,
        version: PackageVersion,
    ) -> Result<()>;
    async fn delete_package(&self, name: &str) -> Result<u64>;
    async fn delete_package_version(&self, name: &str, version: &str) -> Result<bool>;
    async fn retract_package_version(&self, name: &str, version: &str, message: Option<String>) -> Result<()>;
    async fn unretract_package_version(&self, name: &str, version: &str) -> Result<()>;
    async fn transfer_package_ownership(&self, name: &str, new_owner_id: &str) -> Result<()>;
    async fn discontinue_package(&self, name: &str, replaced_by: Option<String>) -> Result<()>;
    async fn clear_upstream_cache(&self) -> Result<Vec<PackageVersion>>;

    // -- users ----------------------------------------------------------
    async fn create_user(&self, user: User) -> Result<()>;
    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn touch_user_login(&self, id: &str) -> Result<()>;
    async fn update_user_name(&self, id: &str, name: Option<String>) -> Result<()>;
    async fn delete_user(&self, id: &str) -> Result<()>;
    async fn count_users(&self) -> Result<u64>;

    // -- sessions ---------------------------------------------------------
    async fn create_user_session(&self, session: UserSession) -> Result<()>;
    async fn get_user_session(&self, session_id: &str) -> Result<Option<UserSession>>;
    async fn delete_user_session(&self, session_id: &str) -> Result<()>;

    async fn create_admin_session(&self, session: AdminSession) -> Result<()>;
    async fn get_admin_session(&self, session_id: &str) -> Result<Option<AdminSession>>;
    async fn delete_admin_session(&self, session_id: &str) -> Result<()>;

    // -- admin users -----------------------------------------------------
    async fn count_admin_users(&self) -> Result<u64>;
    async fn create_admin_user(&self, admin: AdminUser) -> Result<()>;
    async fn get_admin_user_by_username(&self, username: &str) -> Result<Option<AdminUser>>;
    async fn get_admin_user_by_id(&self, id: &str) -> Result<Option<AdminUser>>;
    async fn update_admin_password(&self, id: &str, password_hash: &str) -> Result<()>;
    async fn touch_admin_login(&self, id: &str) -> Result<()>;
    async fn record_admin_login_audit(&self, audit: AdminLoginAudit) -> Result<()>;

    // -- tokens -----------------------------------------------------------
    async fn create_token(&self, token: Token) -> Result<()>;
    async fn get_token_by_hash(&self, hash: &str) -> Result<Option<Token>>;
    async fn list_tokens_for_user(&self, user_id: &str) -> Result<Vec<Token>>;
    async fn delete_token(&self, user_id: &str, label: &str) -> Result<bool>;
    async fn touch_token(&self, hash: &str) -> Result<()>;
    async fn count_active_tokens(&self) -> Result<u64>;

    // -- webhooks ---------------------------------------------------------
    async fn create_webhook(&self, webhook: Webhook) -> Result<()>;
    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>>;
    async fn list_webhooks(&self) -> Result<Vec<Webhook>>;
    async fn get_webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>>;
    async fn delete_webhook(&self, id: &str) -> Result<bool>;
    async fn record_webhook_success(&self, id: &str) -> Result<()>;
    async fn record_webhook_failure(&self, id: &str, disable: bool) -> Result<()>;
    async fn record_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<()>;

    // -- activity / downloads ---------------------------------------------
    async fn record_activity(&self, entry: ActivityLog) -> Result<()>;
    async fn record_download(&self, download: Download) -> Result<()>;

    // -- analytics ----------------------------------------------------------
    async fn downloads_per_hour(&self, hours: u32) -> Result<Vec<(String, u64)>>;
    async fn packages_created_per_day(&self, days: u32) -> Result<Vec<(String, u64)>>;
    async fn get_package_download_stats(&self, name: &str, history_days: u32) -> Result<PackageDownloadStats>;
    async fn get_admin_stats(&self) -> Result<AdminStats>;
    async fn get_total_downloads(&self) -> Result<u64>;

    // -- site config --------------------------------------------------------
    async fn get_site_config(&self, name: &str) -> Result<Option<SiteConfig>>;
    async fn set_site_config(&self, config: SiteConfig) -> Result<()>;
}

/// Construct the metadata store backend selected by the database URL
/// scheme (spec §9: "construct the backend from the database URL scheme at
/// startup; no further dynamic dispatch is needed").
pub async fn build_metadata_store(database_url: &str) -> Result<Arc<dyn MetadataStore>> {
    #[cfg(feature = "postgres")]
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let store = postgres::PostgresMetadataStore::connect(database_url).await?;
        return Ok(Arc::new(store));
    }

    let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
    let store = sqlite::SqliteMetadataStore::open(path).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageManifest;

    fn version(v: &str, retracted: bool) -> PackageVersion {
        PackageVersion {
            package: "alpha".into(),
            version: v.into(),
            manifest: PackageManifest {
                name: "alpha".into(),
                version: v.into(),
                description: None,
                homepage: None,
                repository: None,
                dependencies: Default::default(),
                environment: Default::default(),
                extra: Default::default(),
            },
            archive_key: format!("alpha/{v}-hash.tar.gz"),
            archive_sha256: "hash".into(),
            published_at: Utc::now(),
            is_retracted: retracted,
            retracted_at: None,
            retraction_message: None,
        }
    }

    #[test]
    fn latest_prefers_highest_non_retracted() {
        let info = PackageInfo {
            package: Package {
                name: "alpha".into(),
                owner_id: "u1".into(),
                is_upstream_cache: false,
                is_discontinued: false,
                replaced_by: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            versions: vec![version("1.0.0", false), version("2.0.0", true), version("1.5.0", false)],
        };
        assert_eq!(info.latest().unwrap().version, "1.5.0");
    }

    #[test]
    fn latest_falls_back_to_retracted_when_all_retracted() {
        let info = PackageInfo {
            package: Package {
                name: "alpha".into(),
                owner_id: "u1".into(),
                is_upstream_cache: false,
                is_discontinued: false,
                replaced_by: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            versions: vec![version("1.0.0", true), version("2.0.0", true)],
        };
        assert_eq!(info.latest().unwrap().version, "2.0.0");
    }

    #[test]
    fn page_request_clamps_bounds() {
        let p = PageRequest::clamped(0, 0);
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, 1);
        let p = PageRequest::clamped(999_999, 999);
        assert_eq!(p.page, 10_000);
        assert_eq!(p.limit, 100);
    }
}
</content>
