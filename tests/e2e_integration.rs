//! End-to-end tests covering the full publish -> metadata -> download flow
//! and the webhook delivery this triggers, through the HTTP router.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use registry::api::{build_router, AppState};
use registry::config::ServerConfig;
use registry::metadata::sqlite::SqliteMetadataStore;
use registry::metadata::{AdminUser, MetadataStore, Token, User, Webhook};
use registry::storage::BlobStores;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tower::util::ServiceExt;

async fn test_state() -> Arc<dyn MetadataStore> {
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
    metadata.run_migrations().await.unwrap();
    metadata
}

async fn create_user_and_token(metadata: &Arc<dyn MetadataStore>, scopes: Vec<String>) -> (String, String) {
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: "publisher@example.com".to_string(),
        password_hash: None,
        name: Some("Publisher".to_string()),
        is_active: true,
        last_login_at: None,
        created_at: Utc::now(),
    };
    metadata.create_user(user.clone()).await.unwrap();

    let (plaintext, hash) = registry::auth::generate_token();
    let token = Token {
        hash,
        user_id: user.id.clone(),
        label: "ci".to_string(),
        scopes,
        expires_at: None,
        last_used_at: None,
        created_at: Utc::now(),
    };
    metadata.create_token(token).await.unwrap();
    (user.id, plaintext)
}

async fn create_ready_admin_session(metadata: &Arc<dyn MetadataStore>) -> String {
    let admin = AdminUser {
        id: uuid::Uuid::new_v4().to_string(),
        username: "root".to_string(),
        password_hash: registry::auth::password::hash_password("irrelevant-for-this-test").unwrap(),
        is_active: true,
        must_change_password: false,
        last_login_at: None,
    };
    metadata.create_admin_user(admin.clone()).await.unwrap();
    let cookie = registry::auth::session::start_admin_session(metadata.as_ref(), &admin.id).await.unwrap();
    cookie.value().to_string()
}

fn build_archive(name: &str, version: &str) -> Vec<u8> {
    let manifest = format!("name: {name}\nversion: {version}\ndescription: test fixture\n");

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "pubspec.yaml", manifest.as_bytes()).unwrap();
        builder.finish().unwrap();
    }

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn publish_then_download_round_trips_the_archive() {
    let metadata = test_state().await;
    let (_user_id, token) = create_user_and_token(&metadata, vec!["publish:all".to_string()]).await;

    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata.clone(), blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    let archive = build_archive("widget", "1.0.0");

    let begin = Request::builder().uri("/api/packages/versions/new").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(begin).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let begin_json = json_body(response).await;
    let upload_url = begin_json["url"].as_str().unwrap().to_string();
    let sid = upload_url.rsplit('/').next().unwrap().to_string();

    let upload = Request::builder()
        .method("POST")
        .uri(format!("/api/packages/versions/upload/{sid}"))
        .body(Body::from(archive.clone()))
        .unwrap();
    let response = router.clone().oneshot(upload).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let finalize = Request::builder()
        .uri(format!("/api/packages/versions/finalize/{sid}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(finalize).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let get_package = Request::builder().uri("/api/packages/widget").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(get_package).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let package_json = json_body(response).await;
    assert_eq!(package_json["name"], "widget");

    let download = Request::builder()
        .uri("/packages/widget/versions/1.0.0.tar.gz")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(download).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let downloaded = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(downloaded.to_vec(), archive);
}

#[tokio::test]
async fn finalize_without_publish_scope_is_forbidden() {
    let metadata = test_state().await;
    let (_user_id, token) = create_user_and_token(&metadata, vec!["read:all".to_string()]).await;

    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    let archive = build_archive("gadget", "0.1.0");

    let begin = Request::builder().uri("/api/packages/versions/new").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(begin).await.unwrap();
    let sid = json_body(response).await["url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();

    let upload = Request::builder()
        .method("POST")
        .uri(format!("/api/packages/versions/upload/{sid}"))
        .body(Body::from(archive))
        .unwrap();
    router.clone().oneshot(upload).await.unwrap();

    let finalize = Request::builder()
        .uri(format!("/api/packages/versions/finalize/{sid}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(finalize).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn republishing_same_version_is_rejected() {
    let metadata = test_state().await;
    let (_user_id, token) = create_user_and_token(&metadata, vec!["publish:all".to_string()]).await;

    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    async fn publish_once(router: &axum::Router, token: &str, name: &str, version: &str) -> StatusCode {
        let archive = build_archive(name, version);
        let begin = Request::builder().uri("/api/packages/versions/new").body(Body::empty()).unwrap();
        let response = router.clone().oneshot(begin).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let sid = json["url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();

        let upload = Request::builder()
            .method("POST")
            .uri(format!("/api/packages/versions/upload/{sid}"))
            .body(Body::from(archive))
            .unwrap();
        router.clone().oneshot(upload).await.unwrap();

        let finalize = Request::builder()
            .uri(format!("/api/packages/versions/finalize/{sid}"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        router.clone().oneshot(finalize).await.unwrap().status()
    }

    assert_eq!(publish_once(&router, &token, "doodad", "2.0.0").await, StatusCode::OK);
    assert_eq!(publish_once(&router, &token, "doodad", "2.0.0").await, StatusCode::BAD_REQUEST);
}

/// A webhook pointed at a loopback address is wired up end to end (finalize
/// spawns `dispatch`, which calls `ssrf_guard` before ever issuing a
/// request) but never actually delivered, since loopback/private hosts are
/// rejected by the SSRF guard regardless of the event.
#[tokio::test]
async fn webhook_to_a_loopback_url_is_attempted_and_rejected_by_the_ssrf_guard() {
    let metadata = test_state().await;
    let (_user_id, token) = create_user_and_token(&metadata, vec!["publish:all".to_string()]).await;
    let webhook_id = uuid::Uuid::new_v4().to_string();
    metadata
        .create_webhook(Webhook {
            id: webhook_id.clone(),
            url: "http://127.0.0.1:1/hook".to_string(),
            secret: Some("shared-secret".to_string()),
            events: HashSet::from(["package.published".to_string()]),
            is_active: true,
            failure_count: 0,
            last_triggered_at: None,
        })
        .await
        .unwrap();

    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata.clone(), blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    let archive = build_archive("hooked", "1.0.0");
    let begin = Request::builder().uri("/api/packages/versions/new").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(begin).await.unwrap();
    let sid = json_body(response).await["url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();

    let upload = Request::builder()
        .method("POST")
        .uri(format!("/api/packages/versions/upload/{sid}"))
        .body(Body::from(archive))
        .unwrap();
    router.clone().oneshot(upload).await.unwrap();

    let finalize = Request::builder()
        .uri(format!("/api/packages/versions/finalize/{sid}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(finalize).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // finalize fires the webhook from a spawned task; give it a moment to land.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let webhooks = metadata.list_webhooks().await.unwrap();
    let hook = webhooks.into_iter().find(|w| w.id == webhook_id).unwrap();
    assert_eq!(hook.failure_count, 1);
}

#[tokio::test]
async fn download_requires_a_token_when_require_download_auth_is_set() {
    let metadata = test_state().await;
    let (_user_id, publish_token) = create_user_and_token(&metadata, vec!["publish:all".to_string()]).await;
    let (_reader_id, read_token) = create_user_and_token(&metadata, vec!["read:all".to_string()]).await;

    let blobs = Arc::new(BlobStores::in_memory());
    let mut config = ServerConfig::from_env();
    config.require_download_auth = true;
    let state = AppState::assemble(metadata, blobs, config).unwrap();
    let router = build_router(state);

    let archive = build_archive("locked", "1.0.0");
    let begin = Request::builder().uri("/api/packages/versions/new").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(begin).await.unwrap();
    let sid = json_body(response).await["url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();

    let upload = Request::builder()
        .method("POST")
        .uri(format!("/api/packages/versions/upload/{sid}"))
        .body(Body::from(archive))
        .unwrap();
    router.clone().oneshot(upload).await.unwrap();

    let finalize = Request::builder()
        .uri(format!("/api/packages/versions/finalize/{sid}"))
        .header(header::AUTHORIZATION, format!("Bearer {publish_token}"))
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(finalize).await.unwrap();

    let anonymous_download = Request::builder()
        .uri("/packages/locked/versions/1.0.0.tar.gz")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(anonymous_download).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let authed_download = Request::builder()
        .uri("/packages/locked/versions/1.0.0.tar.gz")
        .header(header::AUTHORIZATION, format!("Bearer {read_token}"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(authed_download).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn publishing_with_a_non_publish_token_succeeds_when_publish_auth_is_relaxed() {
    let metadata = test_state().await;
    let (_user_id, token) = create_user_and_token(&metadata, vec!["read:all".to_string()]).await;

    let blobs = Arc::new(BlobStores::in_memory());
    let mut config = ServerConfig::from_env();
    config.require_publish_auth = false;
    let state = AppState::assemble(metadata, blobs, config).unwrap();
    let router = build_router(state);

    let archive = build_archive("relaxed", "1.0.0");
    let begin = Request::builder().uri("/api/packages/versions/new").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(begin).await.unwrap();
    let sid = json_body(response).await["url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();

    let upload = Request::builder()
        .method("POST")
        .uri(format!("/api/packages/versions/upload/{sid}"))
        .body(Body::from(archive))
        .unwrap();
    router.clone().oneshot(upload).await.unwrap();

    let finalize = Request::builder()
        .uri(format!("/api/packages/versions/finalize/{sid}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(finalize).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn retract_then_unretract_clears_the_retraction_fields() {
    let metadata = test_state().await;
    let (_user_id, token) = create_user_and_token(&metadata, vec!["publish:all".to_string()]).await;
    let admin_cookie = create_ready_admin_session(&metadata).await;

    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata.clone(), blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    let archive = build_archive("flickery", "1.0.0");
    let begin = Request::builder().uri("/api/packages/versions/new").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(begin).await.unwrap();
    let sid = json_body(response).await["url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();

    let upload = Request::builder()
        .method("POST")
        .uri(format!("/api/packages/versions/upload/{sid}"))
        .body(Body::from(archive))
        .unwrap();
    router.clone().oneshot(upload).await.unwrap();

    let finalize = Request::builder()
        .uri(format!("/api/packages/versions/finalize/{sid}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(finalize).await.unwrap();

    let retract = Request::builder()
        .method("POST")
        .uri("/admin/api/packages/flickery/versions/1.0.0/retract")
        .header(header::COOKIE, format!("registry_admin_session={admin_cookie}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"message":"known broken build"}"#))
        .unwrap();
    let response = router.clone().oneshot(retract).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let retracted = metadata.get_package_version("flickery", "1.0.0").await.unwrap().unwrap();
    assert!(retracted.is_retracted);
    assert!(retracted.retraction_message.is_some());

    let unretract = Request::builder()
        .method("POST")
        .uri("/admin/api/packages/flickery/versions/1.0.0/unretract")
        .header(header::COOKIE, format!("registry_admin_session={admin_cookie}"))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(unretract).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cleared = metadata.get_package_version("flickery", "1.0.0").await.unwrap().unwrap();
    assert!(!cleared.is_retracted);
    assert!(cleared.retraction_message.is_none());
    assert!(cleared.retracted_at.is_none());

    let delete = Request::builder()
        .method("DELETE")
        .uri("/admin/api/packages/flickery/versions/1.0.0")
        .header(header::COOKIE, format!("registry_admin_session={admin_cookie}"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(metadata.get_package_version("flickery", "1.0.0").await.unwrap().is_none());
}

#[tokio::test]
async fn creating_a_webhook_pointed_at_a_metadata_endpoint_is_rejected() {
    let metadata = test_state().await;
    let admin_cookie = create_ready_admin_session(&metadata).await;

    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    let create = Request::builder()
        .method("POST")
        .uri("/admin/api/webhooks")
        .header(header::COOKIE, format!("registry_admin_session={admin_cookie}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"url":"http://169.254.169.254/","events":["package.published"]}"#))
        .unwrap();
    let response = router.oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_login_with_wrong_credentials_is_rejected() {
    let metadata = test_state().await;
    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    let login = Request::builder()
        .method("POST")
        .uri("/admin/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"username":"admin","encrypted_password":"bogus"}"#))
        .unwrap();
    let response = router.oneshot(login).await.unwrap();
    assert!(response.status().is_client_error());
}
