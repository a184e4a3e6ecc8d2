//! User registration, login, session, and public-key routes (spec §4.3, §6).

use crate::api::state::AppState;
use crate::api::types::{LoginRequest, RegisterRequest, UpdateMeRequest, UserResponse};
use crate::auth::password::PublicKeyResponse;
use crate::auth::session::{self, SessionOutcome, USER_SESSION_COOKIE};
use crate::error::{RegistryError, Result};
use crate::metadata::User;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me).put(update_me))
        .route("/api/public-key", get(public_key))
}

pub(crate) async fn current_user(state: &AppState, jar: &CookieJar) -> Result<User> {
    let session_id = jar.get(USER_SESSION_COOKIE).map(Cookie::value);
    match session::validate_user_session(state.metadata.as_ref(), session_id).await {
        SessionOutcome::Valid(session) => state
            .metadata
            .get_user_by_id(&session.user_id)
            .await?
            .ok_or(RegistryError::AuthInvalid("session user no longer exists".to_string())),
        SessionOutcome::Error(_) => Err(RegistryError::AuthMissing),
    }
}

async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    if state.metadata.get_user_by_email(&body.email).await?.is_some() {
        return Err(RegistryError::Conflict(format!("email '{}' is already registered", body.email)));
    }

    let password = state.password_transport.decrypt(&body.encrypted_password)?;
    crate::auth::password::validate_password_strength(&password)?;
    let password_hash = crate::auth::password::hash_password(&password)?;

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: body.email,
        password_hash: Some(password_hash),
        name: body.name,
        is_active: true,
        last_login_at: None,
        created_at: Utc::now(),
    };
    state.metadata.create_user(user.clone()).await?;

    let cookie = session::start_user_session(state.metadata.as_ref(), &user.id).await?;
    Ok((jar.add(cookie), Json(UserResponse::from(user))))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let user = state
        .metadata
        .get_user_by_email(&body.email)
        .await?
        .ok_or_else(|| RegistryError::AuthInvalid("invalid email or password".to_string()))?;

    if !user.is_active {
        return Err(RegistryError::AuthForbidden("account is deactivated".to_string()));
    }

    let password = state.password_transport.decrypt(&body.encrypted_password)?;
    let matches = user
        .password_hash
        .as_deref()
        .map(|hash| crate::auth::password::verify_password(&password, hash))
        .unwrap_or(false);
    if !matches {
        return Err(RegistryError::AuthInvalid("invalid email or password".to_string()));
    }

    state.metadata.touch_user_login(&user.id).await?;
    let cookie = session::start_user_session(state.metadata.as_ref(), &user.id).await?;
    Ok((jar.add(cookie), Json(UserResponse::from(user))))
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(session_id) = jar.get(USER_SESSION_COOKIE).map(|c| c.value().to_string()) {
        let _ = state.metadata.delete_user_session(&session_id).await;
    }
    (jar.add(session::clear_user_session_cookie()), Json(crate::api::types::SuccessMessage::new("logged out")))
}

async fn me(State(state): State<AppState>, jar: CookieJar) -> Result<Json<UserResponse>> {
    let user = current_user(&state, &jar).await?;
    Ok(Json(UserResponse::from(user)))
}

async fn update_me(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<UpdateMeRequest>,
) -> Result<Json<UserResponse>> {
    let user = current_user(&state, &jar).await?;
    state.metadata.update_user_name(&user.id, body.name.clone()).await?;
    let updated = state
        .metadata
        .get_user_by_id(&user.id)
        .await?
        .ok_or_else(|| RegistryError::NotFound("user".to_string()))?;
    Ok(Json(UserResponse::from(updated)))
}

async fn public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    Json(state.password_transport.public_key_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::metadata::sqlite::SqliteMetadataStore;
    use crate::storage::BlobStores;
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let metadata: Arc<dyn crate::metadata::MetadataStore> =
            Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
        metadata.run_migrations().await.unwrap();
        let blobs = Arc::new(BlobStores::in_memory());
        AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap()
    }

    #[tokio::test]
    async fn current_user_without_cookie_is_auth_missing() {
        let state = test_state().await;
        let jar = CookieJar::new();
        let err = current_user(&state, &jar).await.unwrap_err();
        assert_eq!(err.code(), "auth_missing");
    }
}
</content>
