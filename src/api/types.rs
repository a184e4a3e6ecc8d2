//! JSON request/response DTOs for the HTTP surface (spec §6).
//!
//! Every success response is either a resource object or
//! `{success: {message}}`; errors always come from
//! [`crate::error::RegistryError`]'s `IntoResponse` impl, so this module
//! only carries the shapes specific to individual endpoints.

use crate::metadata::{AdminStats, Package, PackageInfo, PackageVersion, Token, Webhook};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Serialize)]
pub struct SuccessMessage {
    pub success: MessageBody,
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

impl SuccessMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: MessageBody { message: message.into() },
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PagedResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

// -- packages ----------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct VersionSummary {
    pub version: String,
    pub is_retracted: bool,
    pub published_at: DateTime<Utc>,
}

impl From<&PackageVersion> for VersionSummary {
    fn from(v: &PackageVersion) -> Self {
        Self {
            version: v.version.clone(),
            is_retracted: v.is_retracted,
            published_at: v.published_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PackageResponse {
    pub name: String,
    pub owner_id: String,
    pub is_upstream_cache: bool,
    pub is_discontinued: bool,
    pub replaced_by: Option<String>,
    pub latest_version: Option<String>,
    pub versions: Vec<VersionSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PackageInfo> for PackageResponse {
    fn from(info: PackageInfo) -> Self {
        let latest_version = info.latest().map(|v| v.version.clone());
        Self {
            name: info.package.name,
            owner_id: info.package.owner_id,
            is_upstream_cache: info.package.is_upstream_cache,
            is_discontinued: info.package.is_discontinued,
            replaced_by: info.package.replaced_by,
            latest_version,
            versions: info.versions.iter().map(VersionSummary::from).collect(),
            created_at: info.package.created_at,
            updated_at: info.package.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PackageVersionResponse {
    pub package: String,
    pub version: String,
    pub manifest: crate::package::PackageManifest,
    pub archive_sha256: String,
    pub download_url: String,
    pub is_retracted: bool,
    pub retraction_message: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl PackageVersionResponse {
    pub fn from_version(v: PackageVersion, base_url: &str) -> Self {
        Self {
            download_url: format!("{base_url}/packages/{}/versions/{}.tar.gz", v.package, v.version),
            package: v.package,
            version: v.version,
            manifest: v.manifest,
            archive_sha256: v.archive_sha256,
            is_retracted: v.is_retracted,
            retraction_message: v.retraction_message,
            published_at: v.published_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublishBeginResponse {
    pub url: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RetractRequest {
    pub message: Option<String>,
}

impl From<&Package> for PackageSummary {
    fn from(p: &Package) -> Self {
        Self {
            name: p.name.clone(),
            owner_id: p.owner_id.clone(),
            is_upstream_cache: p.is_upstream_cache,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PackageSummary {
    pub name: String,
    pub owner_id: String,
    pub is_upstream_cache: bool,
}

// -- auth ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub encrypted_password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub encrypted_password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<crate::metadata::User> for UserResponse {
    fn from(u: crate::metadata::User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            is_active: u.is_active,
            last_login_at: u.last_login_at,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateMeRequest {
    #[serde(default)]
    pub name: Option<String>,
}

// -- tokens ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TokenCreateRequest {
    pub label: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TokenCreateResponse {
    pub label: String,
    pub token: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub label: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Token> for TokenResponse {
    fn from(t: Token) -> Self {
        Self {
            label: t.label,
            scopes: t.scopes,
            created_at: t.created_at,
            last_used_at: t.last_used_at,
            expires_at: t.expires_at,
        }
    }
}

// -- webhooks ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WebhookCreateRequest {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    pub events: HashSet<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: String,
    pub url: String,
    pub events: HashSet<String>,
    pub is_active: bool,
    pub failure_count: u32,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl From<Webhook> for WebhookResponse {
    fn from(w: Webhook) -> Self {
        Self {
            id: w.id,
            url: w.url,
            events: w.events,
            is_active: w.is_active,
            failure_count: w.failure_count,
            last_triggered_at: w.last_triggered_at,
        }
    }
}

// -- admin ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub username: String,
    pub encrypted_password: String,
}

pub type AdminStatsResponse = AdminStats;

#[derive(Debug, Deserialize)]
pub struct SiteConfigUpdateRequest {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TransferOwnershipRequest {
    pub new_owner_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscontinueRequest {
    #[serde(default)]
    pub replaced_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_message_serializes_to_nested_envelope() {
        let msg = SuccessMessage::new("done");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["success"]["message"], "done");
    }
}
</content>
