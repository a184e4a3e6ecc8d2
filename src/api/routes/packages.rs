//! Package listing, search, publish, and download routes (spec §4.4, §4.5, §6).

use crate::api::state::AppState;
use crate::api::types::{PackageResponse, PagedResponse, PublishBeginResponse, SearchQuery, SuccessMessage};
use crate::auth::AuthOutcome;
use crate::error::{RegistryError, Result};
use crate::metadata::{PackageFilter, PageRequest};
use crate::package::{Scope, ScopeSet};
use crate::publish;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/packages", get(list_packages))
        .route("/api/packages/search", get(search_packages))
        .route("/api/packages/search/upstream", get(search_upstream))
        .route("/api/packages/versions/new", get(begin_publish))
        .route("/api/packages/versions/upload/:sid", post(upload_version))
        .route("/api/packages/versions/finalize/:sid", get(finalize_version))
        .route("/api/packages/:name/versions/:version", get(get_version))
        .route("/api/packages/:name", get(get_package))
        .route("/packages/:name/versions/:version.tar.gz", get(download_archive_gated))
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
    is_upstream_cache: Option<bool>,
    owner_id: Option<String>,
}

async fn list_packages(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PagedResponse<PackageResponse>>> {
    let page = PageRequest::clamped(query.page.unwrap_or(1), query.limit.unwrap_or(20));
    let filter = PackageFilter {
        is_upstream_cache: query.is_upstream_cache,
        owner_id: query.owner_id,
    };
    let items = state.metadata.list_packages(filter, page).await?;
    Ok(Json(PagedResponse {
        items: items.into_iter().map(PackageResponse::from).collect(),
        page: page.page,
        limit: page.limit,
    }))
}

async fn search_packages(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<PagedResponse<PackageResponse>>> {
    let page = PageRequest::clamped(query.page.unwrap_or(1), query.limit.unwrap_or(20));
    let items = state.metadata.search_packages(&query.q, page).await?;
    Ok(Json(PagedResponse {
        items: items.into_iter().map(PackageResponse::from).collect(),
        page: page.page,
        limit: page.limit,
    }))
}

async fn search_upstream(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> Result<Json<Vec<String>>> {
    let names = state.proxy.search_upstream(&query.q, query.page.unwrap_or(1)).await?;
    Ok(Json(names))
}

async fn get_package(State(state): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse> {
    if let Some(info) = state.metadata.get_package_info(&name).await? {
        return Ok(Json(serde_json::to_value(PackageResponse::from(info)).expect("serializable")));
    }
    let upstream = state
        .proxy
        .get_upstream_package(&name)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("package '{name}'")))?;
    Ok(Json(serde_json::json!({
        "name": upstream.name,
        "is_upstream_cache": true,
        "versions": upstream.versions,
    })))
}

async fn get_version(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    if let Some(v) = state.metadata.get_package_version(&name, &version).await? {
        return Ok(Json(serde_json::to_value(crate::api::types::PackageVersionResponse::from_version(
            v,
            &state.config.base_url,
        ))
        .expect("serializable")));
    }
    let upstream = state
        .proxy
        .get_upstream_version(&name, &version)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("package '{name}' version '{version}'")))?;
    Ok(Json(serde_json::json!({
        "package": upstream.name,
        "version": upstream.version,
        "manifest": upstream.manifest,
        "download_url": format!("{}/packages/{}/versions/{}.tar.gz", state.config.base_url, name, version),
    })))
}

async fn download_archive(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string());
    let bytes = state.proxy.serve_archive(&name, &version, ip).await?;
    Ok(([("content-type", "application/octet-stream")], bytes))
}

/// Wraps [`download_archive`] with the `REQUIRE_DOWNLOAD_AUTH` gate: when
/// the deployment requires it, any authenticated token with read access is
/// enough, matching the "optional auth" note on the package-listing routes.
async fn download_archive_gated(
    State(state): State<AppState>,
    Path(params): Path<(String, String)>,
    Extension(auth): Extension<AuthOutcome>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    if state.config.require_download_auth {
        crate::auth::require_read(&auth)?;
    }
    download_archive(State(state), Path(params), headers).await
}

async fn begin_publish(State(state): State<AppState>) -> Json<PublishBeginResponse> {
    let id = state.uploads.create().await;
    Json(PublishBeginResponse {
        url: format!("{}/api/packages/versions/upload/{id}", state.config.base_url),
        fields: serde_json::Map::new(),
    })
}

async fn upload_version(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    state.uploads.put_bytes(&sid, body.to_vec()).await?;
    let location = format!("{}/api/packages/versions/finalize/{sid}", state.config.base_url);
    Ok((StatusCode::NO_CONTENT, [("location", location)]))
}

/// Implements the finalize state machine of spec §4.4: integrity check,
/// manifest extraction, scope check, ownership check, duplicate-version
/// check, archive persist, metadata upsert, then fire-and-forget
/// side-effects.
async fn finalize_version(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Extension(auth): Extension<AuthOutcome>,
) -> Result<Json<SuccessMessage>> {
    let bytes = state.uploads.take_for_finalize(&sid).await?;
    let validated = match publish::validate_archive(bytes) {
        Ok(v) => v,
        Err(e) => {
            state.uploads.mark_invalid(&sid).await;
            return Err(e);
        }
    };

    let name = validated.manifest.name.clone();
    let version = validated.manifest.version.clone();

    let auth_check = if state.config.require_publish_auth {
        crate::auth::require_publish(&auth, &name)
    } else {
        crate::auth::require_any(&auth)
    };
    let token = match auth_check {
        Ok(token) => token.clone(),
        Err(e) => {
            state.uploads.mark_invalid(&sid).await;
            return Err(e);
        }
    };

    if let Some(existing) = state.metadata.get_package(&name).await? {
        let scopes = ScopeSet::new(token.scopes.clone());
        let is_owner = token.user_id == existing.owner_id;
        let is_privileged = scopes.is_admin() || token.scopes.iter().any(|s| s == Scope::PUBLISH_ALL);
        if !is_owner && !is_privileged {
            state.uploads.mark_invalid(&sid).await;
            return Err(RegistryError::AuthForbidden(format!(
                "'{name}' is owned by a different user"
            )));
        }
    }

    if state.metadata.get_package_version(&name, &version).await?.is_some() {
        state.uploads.mark_invalid(&sid).await;
        return Err(RegistryError::VersionExists { package: name, version });
    }

    let archive_key = publish::archive_key_for(&validated);
    state.blobs.hosted.put_archive(&archive_key, &validated.bytes).await?;
    state
        .metadata
        .upsert_package_version(
            &token.user_id,
            false,
            crate::metadata::PackageVersion {
                package: name.clone(),
                version: version.clone(),
                manifest: validated.manifest,
                archive_key,
                archive_sha256: validated.sha256.to_hex(),
                published_at: chrono::Utc::now(),
                is_retracted: false,
                retracted_at: None,
                retraction_message: None,
            },
        )
        .await?;

    state.uploads.mark_completed(&sid).await;

    let metadata = state.metadata.clone();
    let webhooks = state.webhooks.clone();
    let published_name = name.clone();
    let published_version = version.clone();
    let actor_id = token.user_id.clone();
    tokio::spawn(async move {
        let _ = metadata
            .record_activity(crate::metadata::ActivityLog {
                id: uuid::Uuid::new_v4().to_string(),
                activity_type: "package.published".to_string(),
                actor_type: "user".to_string(),
                actor_id: Some(actor_id),
                target_type: Some("package".to_string()),
                target_id: Some(published_name.clone()),
                metadata: serde_json::json!({"version": published_version}),
                ip: None,
                at: chrono::Utc::now(),
            })
            .await;
        webhooks
            .dispatch(
                "package.published",
                serde_json::json!({"package": published_name, "version": published_version}),
            )
            .await;
    });

    Ok(Json(SuccessMessage::new(format!("Successfully published {name} {version}"))))
}

</content>
