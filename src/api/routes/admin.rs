//! Admin authentication and admin CRUD surface (spec §4.3, §4.9, §6).
//!
//! The acting admin is resolved exclusively by looking up the
//! `registry_admin_session` cookie against the store on every request —
//! there is no ambient "current admin" carried any other way.

use crate::api::state::AppState;
use crate::api::types::{
    AdminLoginRequest, AdminStatsResponse, RetractRequest, SiteConfigUpdateRequest, SuccessMessage,
    TransferOwnershipRequest, WebhookCreateRequest, WebhookResponse,
};
use crate::auth::session::{self, SessionOutcome, ADMIN_SESSION_COOKIE};
use crate::error::{RegistryError, Result};
use crate::metadata::{AdminLoginAudit, AdminUser, SiteConfig, SiteConfigType, Webhook};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/api/auth/login", post(login))
        .route("/admin/api/auth/logout", post(logout))
        .route("/admin/api/auth/change-password", post(change_password))
        .route("/admin/api/stats", get(stats))
        .route("/admin/api/packages/:name/discontinue", post(discontinue_package))
        .route("/admin/api/packages/:name/transfer", post(transfer_package))
        .route("/admin/api/packages/:name", axum::routing::delete(delete_package))
        .route(
            "/admin/api/packages/:name/versions/:version/retract",
            post(retract_package_version),
        )
        .route(
            "/admin/api/packages/:name/versions/:version/unretract",
            post(unretract_package_version),
        )
        .route(
            "/admin/api/packages/:name/versions/:version",
            axum::routing::delete(delete_package_version),
        )
        .route("/admin/api/webhooks", get(list_webhooks).post(create_webhook))
        .route("/admin/api/webhooks/:id", axum::routing::delete(delete_webhook))
        .route("/admin/api/site-config/:name", get(get_site_config).put(set_site_config))
        .route("/admin/api/cache/clear", post(clear_cache))
}

async fn current_admin(state: &AppState, jar: &CookieJar) -> Result<AdminUser> {
    let session_id = jar.get(ADMIN_SESSION_COOKIE).map(Cookie::value);
    match session::validate_admin_session(state.metadata.as_ref(), session_id).await {
        SessionOutcome::Valid(session) => state
            .metadata
            .get_admin_user_by_id(&session.admin_id)
            .await?
            .ok_or(RegistryError::AuthInvalid("session admin no longer exists".to_string())),
        SessionOutcome::Error(_) => Err(RegistryError::AuthMissing),
    }
}

/// Require a valid admin session and reject further access until a
/// bootstrap-default password has been rotated.
async fn require_ready_admin(state: &AppState, jar: &CookieJar) -> Result<AdminUser> {
    let admin = current_admin(state, jar).await?;
    if admin.must_change_password {
        return Err(RegistryError::AuthForbidden(
            "default admin password must be changed before continuing".to_string(),
        ));
    }
    Ok(admin)
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(body): Json<AdminLoginRequest>,
) -> Result<impl IntoResponse> {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string);

    let admin = state.metadata.get_admin_user_by_username(&body.username).await?;
    let password = state.password_transport.decrypt(&body.encrypted_password)?;

    let verified = admin
        .as_ref()
        .filter(|a| a.is_active)
        .map(|a| crate::auth::password::verify_password(&password, &a.password_hash))
        .unwrap_or(false);

    let _ = state
        .metadata
        .record_admin_login_audit(AdminLoginAudit {
            id: uuid::Uuid::new_v4().to_string(),
            admin_id: admin.as_ref().map(|a| a.id.clone()),
            ip,
            user_agent,
            success: verified,
            at: Utc::now(),
        })
        .await;

    let admin = match (verified, admin) {
        (true, Some(admin)) => admin,
        _ => return Err(RegistryError::AuthInvalid("invalid admin credentials".to_string())),
    };

    state.metadata.touch_admin_login(&admin.id).await?;
    let cookie = session::start_admin_session(state.metadata.as_ref(), &admin.id).await?;
    Ok((jar.add(cookie), Json(SuccessMessage::new("admin login successful"))))
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(session_id) = jar.get(ADMIN_SESSION_COOKIE).map(|c| c.value().to_string()) {
        let _ = state.metadata.delete_admin_session(&session_id).await;
    }
    (jar.add(session::clear_admin_session_cookie()), Json(SuccessMessage::new("logged out")))
}

#[derive(Debug, serde::Deserialize)]
struct ChangePasswordRequest {
    new_encrypted_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<SuccessMessage>> {
    let admin = current_admin(&state, &jar).await?;
    let password = state.password_transport.decrypt(&body.new_encrypted_password)?;
    crate::auth::password::validate_password_strength(&password)?;
    let hash = crate::auth::password::hash_password(&password)?;
    state.metadata.update_admin_password(&admin.id, &hash).await?;
    Ok(Json(SuccessMessage::new("password changed")))
}

async fn stats(State(state): State<AppState>, jar: CookieJar) -> Result<Json<AdminStatsResponse>> {
    require_ready_admin(&state, &jar).await?;
    Ok(Json(state.metadata.get_admin_stats().await?))
}

async fn discontinue_package(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(name): Path<String>,
    Json(body): Json<crate::api::types::DiscontinueRequest>,
) -> Result<Json<SuccessMessage>> {
    require_ready_admin(&state, &jar).await?;
    state.metadata.discontinue_package(&name, body.replaced_by).await?;
    Ok(Json(SuccessMessage::new(format!("'{name}' marked discontinued"))))
}

async fn transfer_package(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(name): Path<String>,
    Json(body): Json<TransferOwnershipRequest>,
) -> Result<Json<SuccessMessage>> {
    require_ready_admin(&state, &jar).await?;
    state.metadata.transfer_package_ownership(&name, &body.new_owner_id).await?;
    Ok(Json(SuccessMessage::new(format!("'{name}' transferred to '{}'", body.new_owner_id))))
}

async fn delete_package(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    require_ready_admin(&state, &jar).await?;
    let deleted = state.metadata.delete_package(&name).await?;
    if deleted == 0 {
        return Err(RegistryError::NotFound(format!("package '{name}'")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn retract_package_version(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((name, version)): Path<(String, String)>,
    Json(body): Json<RetractRequest>,
) -> Result<Json<SuccessMessage>> {
    require_ready_admin(&state, &jar).await?;
    state.metadata.retract_package_version(&name, &version, body.message).await?;
    Ok(Json(SuccessMessage::new(format!("'{name}' {version} retracted"))))
}

async fn unretract_package_version(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<SuccessMessage>> {
    require_ready_admin(&state, &jar).await?;
    state.metadata.unretract_package_version(&name, &version).await?;
    Ok(Json(SuccessMessage::new(format!("'{name}' {version} unretracted"))))
}

async fn delete_package_version(
    State(state): State<AppState>,
    jar: CookieJar,
    Path((name, version)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    require_ready_admin(&state, &jar).await?;
    let deleted = state.metadata.delete_package_version(&name, &version).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RegistryError::NotFound(format!("package '{name}' version '{version}'")))
    }
}

async fn list_webhooks(State(state): State<AppState>, jar: CookieJar) -> Result<Json<Vec<WebhookResponse>>> {
    require_ready_admin(&state, &jar).await?;
    let webhooks = state.metadata.list_webhooks().await?;
    Ok(Json(webhooks.into_iter().map(WebhookResponse::from).collect()))
}

async fn create_webhook(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<WebhookCreateRequest>,
) -> Result<Json<WebhookResponse>> {
    require_ready_admin(&state, &jar).await?;
    crate::webhook::ssrf_guard(&body.url).map_err(|_| RegistryError::Validation("invalid_url".to_string()))?;
    let webhook = Webhook {
        id: uuid::Uuid::new_v4().to_string(),
        url: body.url,
        secret: body.secret,
        events: body.events,
        is_active: true,
        failure_count: 0,
        last_triggered_at: None,
    };
    state.metadata.create_webhook(webhook.clone()).await?;
    Ok(Json(WebhookResponse::from(webhook)))
}

async fn delete_webhook(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    require_ready_admin(&state, &jar).await?;
    let deleted = state.metadata.delete_webhook(&id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RegistryError::NotFound(format!("webhook '{id}'")))
    }
}

async fn get_site_config(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(name): Path<String>,
) -> Result<Json<SiteConfig>> {
    require_ready_admin(&state, &jar).await?;
    state
        .metadata
        .get_site_config(&name)
        .await?
        .map(Json)
        .ok_or_else(|| RegistryError::NotFound(format!("site config '{name}'")))
}

async fn set_site_config(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(name): Path<String>,
    Json(body): Json<SiteConfigUpdateRequest>,
) -> Result<Json<SiteConfig>> {
    require_ready_admin(&state, &jar).await?;
    let config = SiteConfig {
        name,
        value: body.value,
        value_type: SiteConfigType::String,
        updated_at: Utc::now(),
    };
    state.metadata.set_site_config(config.clone()).await?;
    Ok(Json(config))
}

async fn clear_cache(State(state): State<AppState>, jar: CookieJar) -> Result<Json<SuccessMessage>> {
    require_ready_admin(&state, &jar).await?;
    let cleared = state.proxy.clear_cache().await?;
    Ok(Json(SuccessMessage::new(format!("cleared {cleared} cached versions"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::metadata::sqlite::SqliteMetadataStore;
    use crate::storage::BlobStores;
    use std::sync::Arc;

    #[tokio::test]
    async fn admin_endpoints_reject_missing_session() {
        let metadata: Arc<dyn crate::metadata::MetadataStore> =
            Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
        metadata.run_migrations().await.unwrap();
        let blobs = Arc::new(BlobStores::in_memory());
        let state = AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap();
        let jar = CookieJar::new();
        let err = current_admin(&state, &jar).await.unwrap_err();
        assert_eq!(err.code(), "auth_missing");
    }
}
</content>
