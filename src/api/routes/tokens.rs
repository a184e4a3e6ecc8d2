//! Personal access token management, session-cookie-authed (spec §4.3, §6).
//!
//! Tokens are managed through the session cookie rather than a bearer
//! token, so a user is never forced to hold a live token just to create or
//! revoke one.

use crate::api::routes::auth::current_user;
use crate::api::state::AppState;
use crate::api::types::{TokenCreateRequest, TokenCreateResponse, TokenResponse};
use crate::error::{RegistryError, Result};
use crate::metadata::Token;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/tokens", get(list_tokens).post(create_token))
        .route("/api/tokens/:label", axum::routing::delete(delete_token))
}

async fn list_tokens(State(state): State<AppState>, jar: CookieJar) -> Result<Json<Vec<TokenResponse>>> {
    let user = current_user(&state, &jar).await?;
    let tokens = state.metadata.list_tokens_for_user(&user.id).await?;
    Ok(Json(tokens.into_iter().map(TokenResponse::from).collect()))
}

async fn create_token(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<TokenCreateRequest>,
) -> Result<Json<TokenCreateResponse>> {
    let user = current_user(&state, &jar).await?;
    if body.label.trim().is_empty() {
        return Err(RegistryError::Validation("token label must not be empty".to_string()));
    }

    let (plaintext, hash) = crate::auth::generate_token();
    let expires_at = body.expires_in_days.map(|days| Utc::now() + Duration::days(days));
    let token = Token {
        hash,
        user_id: user.id,
        label: body.label.clone(),
        scopes: body.scopes.clone(),
        expires_at,
        last_used_at: None,
        created_at: Utc::now(),
    };
    state.metadata.create_token(token).await?;

    Ok(Json(TokenCreateResponse {
        label: body.label,
        token: plaintext,
        scopes: body.scopes,
        expires_at,
    }))
}

async fn delete_token(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(label): Path<String>,
) -> Result<StatusCode> {
    let user = current_user(&state, &jar).await?;
    let deleted = state.metadata.delete_token(&user.id, &label).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RegistryError::NotFound(format!("token '{label}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::metadata::sqlite::SqliteMetadataStore;
    use crate::storage::BlobStores;
    use std::sync::Arc;

    #[tokio::test]
    async fn creating_token_without_session_is_auth_missing() {
        let metadata: Arc<dyn crate::metadata::MetadataStore> =
            Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
        metadata.run_migrations().await.unwrap();
        let blobs = Arc::new(BlobStores::in_memory());
        let state = AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap();
        let jar = CookieJar::new();
        let err = create_token(
            State(state),
            jar,
            Json(TokenCreateRequest {
                label: "ci".into(),
                scopes: vec!["read:all".into()],
                expires_in_days: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "auth_missing");
    }
}
</content>
