//! Error types for the package registry.
//!
//! Every fallible operation in the crate returns [`Result<T>`]. Handlers
//! convert a [`RegistryError`] into the canonical JSON envelope via its
//! [`axum::response::IntoResponse`] implementation, so the status code and
//! error slug are derived in exactly one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Registry result type.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("authentication required")]
    AuthMissing,

    #[error("invalid credentials: {0}")]
    AuthInvalid(String),

    #[error("forbidden: {0}")]
    AuthForbidden(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("weak password: {0}")]
    WeakPassword(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("version already exists: {package}@{version}")]
    VersionExists { package: String, version: String },

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u64),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream proxy disabled")]
    UpstreamDisabled,

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Canonical error-code slug used in the JSON envelope and in §7's taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::AuthMissing => "auth_missing",
            RegistryError::AuthInvalid(_) => "auth_invalid",
            RegistryError::AuthForbidden(_) => "auth_forbidden",
            RegistryError::Validation(_) => "validation_error",
            RegistryError::WeakPassword(_) => "weak_password",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::Conflict(_) => "conflict",
            RegistryError::VersionExists { .. } => "version_exists",
            RegistryError::PayloadTooLarge(_) => "payload_too_large",
            RegistryError::RateLimited { .. } => "rate_limited",
            RegistryError::UpstreamDisabled => "upstream_disabled",
            RegistryError::UpstreamError(_) => "upstream_error",
            RegistryError::StorageError(_) => "storage_error",
            RegistryError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RegistryError::AuthMissing => StatusCode::UNAUTHORIZED,
            RegistryError::AuthInvalid(_) => StatusCode::UNAUTHORIZED,
            RegistryError::AuthForbidden(_) => StatusCode::FORBIDDEN,
            RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
            RegistryError::WeakPassword(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Conflict(_) => StatusCode::CONFLICT,
            RegistryError::VersionExists { .. } => StatusCode::BAD_REQUEST,
            RegistryError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RegistryError::UpstreamDisabled => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::UpstreamError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Validation(format!("malformed json: {err}"))
    }
}

impl From<serde_yml::Error> for RegistryError {
    fn from(err: serde_yml::Error) -> Self {
        RegistryError::Validation(format!("malformed manifest: {err}"))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::UpstreamError(err.to_string())
    }
}

impl From<semver::Error> for RegistryError {
    fn from(err: semver::Error) -> Self {
        RegistryError::Validation(format!("invalid version: {err}"))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::StorageError(err.to_string())
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => RegistryError::NotFound("row".to_string()),
            other => RegistryError::StorageError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_taxonomy() {
        assert_eq!(RegistryError::AuthMissing.code(), "auth_missing");
        assert_eq!(
            RegistryError::VersionExists {
                package: "alpha".into(),
                version: "1.0.0".into(),
            }
            .code(),
            "version_exists"
        );
        assert_eq!(
            RegistryError::RateLimited { retry_after_secs: 5 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn server_errors_map_to_5xx() {
        assert!(RegistryError::StorageError("x".into()).status().is_server_error());
        assert!(RegistryError::Internal("x".into()).status().is_server_error());
        assert!(!RegistryError::NotFound("x".into()).status().is_server_error());
    }
}
</content>
