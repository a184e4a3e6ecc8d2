//! Two-realm session cookies (spec §4.3).
//!
//! A user session and an admin session are kept in independent cookie
//! jars so an admin browsing the public site never leaks an admin
//! capability through a shared cookie name.

use crate::metadata::{AdminSession, MetadataStore, UserSession};
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{Duration, Utc};
use uuid::Uuid;

pub const USER_SESSION_COOKIE: &str = "registry_session";
pub const ADMIN_SESSION_COOKIE: &str = "registry_admin_session";

const USER_SESSION_TTL_HOURS: i64 = 24 * 7;
const ADMIN_SESSION_TTL_HOURS: i64 = 12;

#[derive(Debug, Clone)]
pub enum SessionError {
    Missing,
    Invalid,
    Expired,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome<T> {
    Valid(T),
    Error(SessionError),
}

fn build_cookie(name: &'static str, value: String, ttl: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(cookie::time::Duration::seconds(ttl.num_seconds()))
        .build()
}

fn expired_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .max_age(cookie::time::Duration::seconds(0))
        .build()
}

/// Create a new user session, returning the session cookie to set.
pub async fn start_user_session(store: &dyn MetadataStore, user_id: &str) -> crate::error::Result<Cookie<'static>> {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::hours(USER_SESSION_TTL_HOURS);
    store
        .create_user_session(UserSession {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            expires_at,
        })
        .await?;
    Ok(build_cookie(USER_SESSION_COOKIE, session_id, Duration::hours(USER_SESSION_TTL_HOURS)))
}

/// Validate a user session cookie value against the store.
pub async fn validate_user_session(store: &dyn MetadataStore, session_id: Option<&str>) -> SessionOutcome<UserSession> {
    let session_id = match session_id {
        Some(id) if !id.is_empty() => id,
        _ => return SessionOutcome::Error(SessionError::Missing),
    };
    match store.get_user_session(session_id).await {
        Ok(Some(session)) if session.expires_at > Utc::now() => SessionOutcome::Valid(session),
        Ok(Some(_)) => SessionOutcome::Error(SessionError::Expired),
        Ok(None) => SessionOutcome::Error(SessionError::Invalid),
        Err(_) => SessionOutcome::Error(SessionError::Invalid),
    }
}

pub fn clear_user_session_cookie() -> Cookie<'static> {
    expired_cookie(USER_SESSION_COOKIE)
}

pub async fn start_admin_session(store: &dyn MetadataStore, admin_id: &str) -> crate::error::Result<Cookie<'static>> {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::hours(ADMIN_SESSION_TTL_HOURS);
    store
        .create_admin_session(AdminSession {
            session_id: session_id.clone(),
            admin_id: admin_id.to_string(),
            expires_at,
        })
        .await?;
    Ok(build_cookie(ADMIN_SESSION_COOKIE, session_id, Duration::hours(ADMIN_SESSION_TTL_HOURS)))
}

pub async fn validate_admin_session(
    store: &dyn MetadataStore,
    session_id: Option<&str>,
) -> SessionOutcome<AdminSession> {
    let session_id = match session_id {
        Some(id) if !id.is_empty() => id,
        _ => return SessionOutcome::Error(SessionError::Missing),
    };
    match store.get_admin_session(session_id).await {
        Ok(Some(session)) if session.expires_at > Utc::now() => SessionOutcome::Valid(session),
        Ok(Some(_)) => SessionOutcome::Error(SessionError::Expired),
        Ok(None) => SessionOutcome::Error(SessionError::Invalid),
        Err(_) => SessionOutcome::Error(SessionError::Invalid),
    }
}

pub fn clear_admin_session_cookie() -> Cookie<'static> {
    expired_cookie(ADMIN_SESSION_COOKIE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::sqlite::SqliteMetadataStore;

    #[tokio::test]
    async fn session_round_trips_through_store() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        store
            .create_user(crate::metadata::User {
                id: "u1".into(),
                email: "a@example.com".into(),
                password_hash: None,
                name: None,
                is_active: true,
                last_login_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let cookie = start_user_session(&store, "u1").await.unwrap();
        let session_id = cookie.value().to_string();
        match validate_user_session(&store, Some(&session_id)).await {
            SessionOutcome::Valid(session) => assert_eq!(session.user_id, "u1"),
            SessionOutcome::Error(_) => panic!("expected valid session"),
        }
    }

    #[tokio::test]
    async fn missing_session_id_is_reported_as_missing() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        match validate_user_session(&store, None).await {
            SessionOutcome::Error(SessionError::Missing) => {}
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_session_id_is_invalid() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        match validate_user_session(&store, Some("bogus")).await {
            SessionOutcome::Error(SessionError::Invalid) => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
</content>
