//! Coverage for edge cases the route-level integration tests don't reach:
//! upload-session state transitions, oversized payloads, concurrent
//! publishes, and ranked search over several stored packages.

#![allow(clippy::unwrap_used)]

use chrono::Utc;
use registry::api::{build_router, AppState};
use registry::config::ServerConfig;
use registry::metadata::sqlite::SqliteMetadataStore;
use registry::metadata::{MetadataStore, PackageFilter, PageRequest, Token, User};
use registry::publish::UploadSessions;
use registry::storage::BlobStores;
use std::sync::Arc;

// ============================================================================
// Upload session state machine
// ============================================================================

#[tokio::test]
async fn upload_session_rejects_bytes_after_finalize_takes_them() {
    let sessions = UploadSessions::new(1024);
    let id = sessions.create().await;
    sessions.put_bytes(&id, b"archive bytes".to_vec()).await.unwrap();

    let taken = sessions.take_for_finalize(&id).await.unwrap();
    assert_eq!(taken, b"archive bytes");

    // A second finalize attempt on the same session finds no bytes left.
    let err = sessions.take_for_finalize(&id).await.unwrap_err();
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
async fn upload_session_rejects_oversized_payload() {
    let sessions = UploadSessions::new(16);
    let id = sessions.create().await;
    let err = sessions.put_bytes(&id, vec![0u8; 17]).await.unwrap_err();
    assert_eq!(err.code(), "payload_too_large");
}

#[tokio::test]
async fn upload_session_rejects_empty_payload() {
    let sessions = UploadSessions::new(1024);
    let id = sessions.create().await;
    let err = sessions.put_bytes(&id, Vec::new()).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[tokio::test]
async fn finalizing_an_unknown_session_is_not_found() {
    let sessions = UploadSessions::new(1024);
    let err = sessions.take_for_finalize("does-not-exist").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn reaper_expires_sessions_older_than_their_ttl() {
    let sessions = UploadSessions::new(1024);
    let id = sessions.create().await;
    sessions.put_bytes(&id, b"payload".to_vec()).await.unwrap();

    // `reap_expired` only sweeps entries past the TTL; immediately after
    // creation the session should survive a sweep untouched.
    sessions.reap_expired().await;
    assert_eq!(sessions.state(&id).await, Some(registry::publish::UploadState::Ready));
}

// ============================================================================
// Concurrent publishes
// ============================================================================

fn build_archive(name: &str, version: &str) -> Vec<u8> {
    use std::io::Write;
    let manifest = format!("name: {name}\nversion: {version}\n");
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

#[tokio::test]
async fn concurrent_publishes_of_distinct_packages_all_succeed() {
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
    metadata.run_migrations().await.unwrap();

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: "bulk@example.com".to_string(),
        password_hash: None,
        name: None,
        is_active: true,
        last_login_at: None,
        created_at: Utc::now(),
    };
    metadata.create_user(user.clone()).await.unwrap();
    let (plaintext, hash) = registry::auth::generate_token();
    metadata
        .create_token(Token {
            hash,
            user_id: user.id,
            label: "bulk".to_string(),
            scopes: vec!["publish:all".to_string()],
            expires_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let blobs = Arc::new(BlobStores::in_memory());
    let state = AppState::assemble(metadata.clone(), blobs, ServerConfig::from_env()).unwrap();
    let router = build_router(state);

    let names: Vec<String> = (0..8).map(|i| format!("concurrent{i}")).collect();
    let handles = names.iter().cloned().map(|name| {
        let router = router.clone();
        let token = plaintext.clone();
        tokio::spawn(async move { publish_package(&router, &token, &name, "1.0.0").await })
    });

    let results: Vec<_> = futures::future::join_all(handles).await;
    for result in results {
        assert_eq!(result.unwrap(), axum::http::StatusCode::OK);
    }

    let page = metadata
        .list_packages(PackageFilter::default(), PageRequest::clamped(1, 100))
        .await
        .unwrap();
    assert_eq!(page.len(), names.len());
}

async fn publish_package(router: &axum::Router, token: &str, name: &str, version: &str) -> axum::http::StatusCode {
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::util::ServiceExt;

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

// ============================================================================
// Search over several packages
// ============================================================================

#[tokio::test]
async fn search_returns_only_name_matching_packages() {
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
    metadata.run_migrations().await.unwrap();

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: "searcher@example.com".to_string(),
        password_hash: None,
        name: None,
        is_active: true,
        last_login_at: None,
        created_at: Utc::now(),
    };
    metadata.create_user(user.clone()).await.unwrap();

    for name in ["http_client", "http_server", "json_parser"] {
        metadata
            .upsert_package_version(
                &user.id,
                false,
                registry::metadata::PackageVersion {
                    package: name.to_string(),
                    version: "1.0.0".to_string(),
                    manifest: registry::PackageManifest {
                        name: name.to_string(),
                        version: "1.0.0".to_string(),
                        description: None,
                        homepage: None,
                        repository: None,
                        dependencies: serde_json::Map::new(),
                        environment: serde_json::Map::new(),
                        extra: serde_json::Map::new(),
                    },
                    archive_key: format!("{name}/1.0.0-deadbeef.tar.gz"),
                    archive_sha256: "deadbeef".to_string(),
                    published_at: Utc::now(),
                    is_retracted: false,
                    retracted_at: None,
                    retraction_message: None,
                },
            )
            .await
            .unwrap();
    }

    let results = metadata
        .search_packages("http", PageRequest::clamped(1, 20))
        .await
        .unwrap();
    let found: Vec<String> = results.into_iter().map(|p| p.package.name).collect();
    assert!(found.contains(&"http_client".to_string()));
    assert!(found.contains(&"http_server".to_string()));
    assert!(!found.contains(&"json_parser".to_string()));
}
