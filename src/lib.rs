//! Self-hosted package registry server.
//!
//! # Architecture
//!
//! 1. **Content-addressed storage**: archives are stored under
//!    `<package>/<version>-<sha256>.tar.gz`; publish writes the blob before
//!    the metadata row so a reader that finds the row can always read the
//!    blob.
//! 2. **Pluggable metadata store**: an embedded SQLite engine or a networked
//!    PostgreSQL engine, selected once at startup from the database URL
//!    scheme.
//! 3. **Bearer-token auth with capability scopes**: `admin`, `publish:all`,
//!    `publish:pkg:<name>`, `read:all`.
//! 4. **Read-through upstream caching proxy**: packages not hosted locally
//!    fall through to an upstream registry and are cached on first fetch.

pub mod allowlist;
pub mod auth;
pub mod config;
pub mod content_hash;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod package;
pub mod publish;
pub mod rate_limit;
pub mod storage;
pub mod upstream;
pub mod webhook;

pub mod api;

pub use content_hash::ContentHash;
pub use error::{RegistryError, Result};
pub use metadata::{build_metadata_store, MetadataStore};
pub use package::{PackageManifest, Scope, ScopeSet};
#[cfg(feature = "s3")]
pub use storage::S3Storage;
pub use storage::{BlobStore, BlobStores, FilesystemStorage, InMemoryStorage};

pub use api::{build_router, AppState};
pub use config::ServerConfig;
pub use metrics::RegistryMetrics;
</content>
