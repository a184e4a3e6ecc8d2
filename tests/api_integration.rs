//! API integration tests exercising the router directly, without binding a
//! socket.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use registry::api::{build_router, AppState};
use registry::config::ServerConfig;
use registry::metadata::sqlite::SqliteMetadataStore;
use registry::storage::BlobStores;
use std::sync::Arc;
use tower::util::ServiceExt;

async fn test_router() -> axum::Router {
    let metadata: Arc<dyn registry::metadata::MetadataStore> =
        Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
    metadata.run_migrations().await.unwrap();
    let blobs = Arc::new(BlobStores::in_memory());
    let mut config = ServerConfig::from_env();
    config.cors_allowed_origins = vec!["*".to_string()];
    let state = AppState::assemble(metadata, blobs, config).unwrap();
    build_router(state)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let router = test_router().await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn detailed_health_reports_metadata_component() {
    let router = test_router().await;

    let request = Request::builder().uri("/health/detailed").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    let components = json["components"].as_array().unwrap();
    assert!(components.iter().any(|c| c["name"] == "metadata_store"));
}

#[tokio::test]
async fn public_key_endpoint_returns_modulus_and_exponent() {
    let router = test_router().await;

    let request = Request::builder().uri("/api/public-key").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert!(json["modulus_hex"].is_string());
    assert!(json["exponent_hex"].is_string());
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let router = test_router().await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("repub_up"));
}

#[tokio::test]
async fn list_packages_on_empty_store_returns_empty_page() {
    let router = test_router().await;

    let request = Request::builder().uri("/api/packages").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert!(json["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn get_unknown_package_is_not_found() {
    let router = test_router().await;

    let request = Request::builder().uri("/api/packages/does-not-exist").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_with_no_matches_returns_empty_results() {
    let router = test_router().await;

    let request = Request::builder().uri("/api/packages/search?q=nothing").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert!(json["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn me_without_a_session_cookie_is_unauthorized() {
    let router = test_router().await;

    let me = Request::builder().uri("/api/auth/me").body(Body::empty()).unwrap();
    let response = router.oneshot(me).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_with_a_hand_written_ciphertext_fails_password_decryption() {
    let router = test_router().await;

    // The RSA transport key is generated fresh per process, so a
    // hand-written base64 string never decrypts to a valid password; this
    // exercises the failure path. The happy path needs the live public key
    // from `/api/public-key` and is covered by `auth.rs`'s unit tests.
    let register = Request::builder()
        .method("POST")
        .uri("/api/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"email":"dev@example.com","name":"Dev","encrypted_password":"not-a-real-ciphertext"}"#,
        ))
        .unwrap();
    let response = router.oneshot(register).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn admin_surface_rejects_missing_session() {
    let router = test_router().await;

    let request = Request::builder().uri("/admin/api/stats").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let router = test_router().await;

    let request = Request::builder().uri("/api/nonexistent").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_json_body_is_a_client_error() {
    let router = test_router().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("this is not json"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}
