//! Axum middleware layers: request id, rate limiting, IP allowlist, and
//! bearer-token auth context extraction (spec §4.7, §4.8, §4.9).

use crate::api::state::AppState;
use crate::auth::{self, AuthOutcome};
use crate::rate_limit::{self, RateLimitResult};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "authorization").and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if rate_limit::is_exempt_path(path) {
        return next.run(request).await;
    }

    let key = rate_limit::client_id(
        header_str(&headers, "x-forwarded-for"),
        header_str(&headers, "x-real-ip").or(Some(&peer.ip().to_string())),
        bearer_token(&headers),
    );

    match state.rate_limiter.check_and_record(&key).await {
        RateLimitResult::Allowed { remaining, reset_after } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&state.rate_limiter.max_requests().to_string()) {
                headers.insert("x-ratelimit-limit", v);
            }
            if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
                headers.insert("x-ratelimit-remaining", v);
            }
            if let Ok(v) = HeaderValue::from_str(&reset_after.as_secs().to_string()) {
                headers.insert("x-ratelimit-reset", v);
            }
            response
        }
        RateLimitResult::Limited { retry_after } => {
            let err = crate::error::RegistryError::RateLimited {
                retry_after_secs: retry_after.as_secs(),
            };
            let mut response = err.into_response();
            if let Ok(v) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert("retry-after", v);
            }
            response
        }
    }
}

/// Gate the admin path prefix against the configured IP allowlist.
pub async fn admin_allowlist_middleware(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !state.admin_allowlist.applies_to(path) {
        return next.run(request).await;
    }
    let client_ip = header_str(&headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string());

    if state.admin_allowlist.allows(&client_ip) {
        next.run(request).await
    } else {
        let body = serde_json::json!({"error": {"code": "auth_forbidden", "message": "client IP is not allowlisted"}});
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

/// Resolve the `Authorization` header into an [`AuthOutcome`] and stash it
/// in request extensions; handlers apply their own scope predicate.
pub async fn auth_context_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = header_str(&headers, "authorization");
    let outcome = auth::authenticate(state.metadata.as_ref(), authorization)
        .await
        .unwrap_or_else(|e| AuthOutcome::Invalid(e.to_string()));
    request.extensions_mut().insert(outcome);
    next.run(request).await
}

pub fn cors_layer(allowed_origins: &[String]) -> tower_http::cors::CorsLayer {
    use tower_http::cors::{AllowOrigin, CorsLayer};
    if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any()).allow_methods(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer rgy_abc"));
        assert_eq!(bearer_token(&headers), Some("rgy_abc"));
    }

    #[test]
    fn bearer_token_absent_without_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }
}
</content>
