//! Environment-driven configuration.
//!
//! All environment variables recognized by the server are read through this
//! module; nothing else calls `std::env::var` directly. Named constants
//! double as documentation for the recognized surface (spec §6).

use std::time::Duration;

pub mod env_vars {
    pub const REGISTRY_HOST: &str = "REGISTRY_HOST";
    pub const REGISTRY_PORT: &str = "REGISTRY_PORT";
    pub const BASE_URL: &str = "BASE_URL";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const STORAGE_PATH: &str = "STORAGE_PATH";
    pub const S3_BUCKET: &str = "S3_BUCKET";
    pub const S3_REGION: &str = "S3_REGION";
    pub const S3_ENDPOINT: &str = "S3_ENDPOINT";
    pub const S3_ACCESS_KEY_ID: &str = "S3_ACCESS_KEY_ID";
    pub const S3_SECRET_ACCESS_KEY: &str = "S3_SECRET_ACCESS_KEY";
    pub const REQUIRE_PUBLISH_AUTH: &str = "REQUIRE_PUBLISH_AUTH";
    pub const REQUIRE_DOWNLOAD_AUTH: &str = "REQUIRE_DOWNLOAD_AUTH";
    pub const MAX_UPLOAD_SIZE_BYTES: &str = "MAX_UPLOAD_SIZE_BYTES";
    pub const SIGNED_URL_TTL_SECONDS: &str = "SIGNED_URL_TTL_SECONDS";
    pub const UPSTREAM_URL: &str = "UPSTREAM_URL";
    pub const ENABLE_UPSTREAM_PROXY: &str = "ENABLE_UPSTREAM_PROXY";
    pub const RATE_LIMIT_REQUESTS: &str = "RATE_LIMIT_REQUESTS";
    pub const RATE_LIMIT_WINDOW_SECONDS: &str = "RATE_LIMIT_WINDOW_SECONDS";
    pub const ADMIN_IP_WHITELIST: &str = "ADMIN_IP_WHITELIST";
    pub const CORS_ALLOWED_ORIGINS: &str = "CORS_ALLOWED_ORIGINS";
    pub const REGISTRY_VERSION: &str = "REGISTRY_VERSION";
    pub const REGISTRY_GIT_HASH: &str = "REGISTRY_GIT_HASH";

    /// Read a string env var, returning `None` if unset or empty.
    pub fn env_string(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    pub fn env_bool(key: &str, default: bool) -> bool {
        match env_string(key) {
            Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
            None => default,
        }
    }

    pub fn env_u64(key: &str, default: u64) -> u64 {
        env_string(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn env_duration_secs(key: &str, default: std::time::Duration) -> std::time::Duration {
        env_string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map(std::time::Duration::from_secs)
            .unwrap_or(default)
    }

    pub fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
        match env_string(key) {
            Some(v) => v.split(',').map(|s| s.trim().to_string()).collect(),
            None => default,
        }
    }
}

use env_vars::*;

/// Fully assembled server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub database_url: String,
    pub storage_path: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub require_publish_auth: bool,
    pub require_download_auth: bool,
    pub max_upload_size_bytes: u64,
    pub signed_url_ttl: Duration,
    pub upstream_url: Option<String>,
    pub enable_upstream_proxy: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub admin_ip_whitelist: Vec<String>,
    pub cors_allowed_origins: Vec<String>,
    pub version: String,
    pub git_hash: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_string(REGISTRY_HOST).unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env_string(REGISTRY_PORT)
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            base_url: env_string(BASE_URL).unwrap_or_else(|| "http://localhost:8080".to_string()),
            database_url: env_string(DATABASE_URL)
                .unwrap_or_else(|| "sqlite:registry.db".to_string()),
            storage_path: env_string(STORAGE_PATH)
                .unwrap_or_else(|| "/tmp/registry-storage".to_string()),
            s3_bucket: env_string(S3_BUCKET),
            s3_region: env_string(S3_REGION),
            s3_endpoint: env_string(S3_ENDPOINT),
            require_publish_auth: env_bool(REQUIRE_PUBLISH_AUTH, true),
            require_download_auth: env_bool(REQUIRE_DOWNLOAD_AUTH, false),
            max_upload_size_bytes: env_u64(MAX_UPLOAD_SIZE_BYTES, 100 * 1024 * 1024),
            signed_url_ttl: env_duration_secs(SIGNED_URL_TTL_SECONDS, Duration::from_secs(3600)),
            upstream_url: env_string(UPSTREAM_URL),
            enable_upstream_proxy: env_bool(ENABLE_UPSTREAM_PROXY, false),
            rate_limit_requests: env_u64(RATE_LIMIT_REQUESTS, 60) as u32,
            rate_limit_window: env_duration_secs(RATE_LIMIT_WINDOW_SECONDS, Duration::from_secs(60)),
            admin_ip_whitelist: env_list(ADMIN_IP_WHITELIST, vec!["*".to_string()]),
            cors_allowed_origins: env_list(CORS_ALLOWED_ORIGINS, vec!["*".to_string()]),
            version: env_string(REGISTRY_VERSION).unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            git_hash: env_string(REGISTRY_GIT_HASH).unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

</content>
