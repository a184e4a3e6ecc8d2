//! Upload session state machine and archive validation (spec §4.4).
//!
//! Uploaded bytes are held in memory, keyed by session id, behind a
//! `RwLock<HashMap<..>>` with a periodic reaper.

use crate::content_hash::ContentHash;
use crate::error::{RegistryError, Result};
use crate::package::{self, PackageManifest};
use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_TTL: std::time::Duration = std::time::Duration::from_secs(3600);
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Open,
    Ready,
    Completed,
    Expired,
    Invalid,
}

struct SessionEntry {
    state: UploadState,
    bytes: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
}

/// In-memory registry of upload sessions (spec §5: one entry per session
/// id, removed on completion or terminal failure; swept by TTL otherwise).
#[derive(Clone)]
pub struct UploadSessions {
    inner: Arc<RwLock<HashMap<String, SessionEntry>>>,
    max_upload_bytes: u64,
}

impl UploadSessions {
    pub fn new(max_upload_bytes: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_upload_bytes,
        }
    }

    /// `INITIATED → OPEN`: allocate a fresh session id.
    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner.write().await.insert(
            id.clone(),
            SessionEntry {
                state: UploadState::Open,
                bytes: None,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// `OPEN → READY`: accept the uploaded bytes.
    pub async fn put_bytes(&self, id: &str, bytes: Vec<u8>) -> Result<()> {
        if bytes.is_empty() {
            return Err(RegistryError::Validation("empty_upload".to_string()));
        }
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(RegistryError::PayloadTooLarge(bytes.len() as u64));
        }
        let mut sessions = self.inner.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(format!("upload session '{id}'")))?;
        if entry.state != UploadState::Open || Utc::now() - entry.created_at > Duration::from_std(SESSION_TTL).unwrap() {
            return Err(RegistryError::Conflict("upload session is not open".to_string()));
        }
        entry.bytes = Some(bytes);
        entry.state = UploadState::Ready;
        Ok(())
    }

    /// Take ownership of the bytes for finalize, leaving the session
    /// `Ready` until [`mark_completed`]/[`mark_invalid`] settles it — the
    /// caller holds the only copy while validating, so a concurrent
    /// finalize of the same id observes an empty buffer and fails.
    pub async fn take_for_finalize(&self, id: &str) -> Result<Vec<u8>> {
        let mut sessions = self.inner.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(format!("upload session '{id}'")))?;
        if entry.state != UploadState::Ready {
            return Err(RegistryError::Conflict("upload session is not ready".to_string()));
        }
        entry.bytes.take().ok_or_else(|| RegistryError::Conflict("finalize already in progress".to_string()))
    }

    /// `READY → COMPLETED`: drop the in-memory bytes, keep the entry for
    /// brief reporting.
    pub async fn mark_completed(&self, id: &str) {
        if let Some(entry) = self.inner.write().await.get_mut(id) {
            entry.state = UploadState::Completed;
            entry.bytes = None;
        }
    }

    /// `READY → INVALID`: terminal failure; bytes are dropped.
    pub async fn mark_invalid(&self, id: &str) {
        if let Some(entry) = self.inner.write().await.get_mut(id) {
            entry.state = UploadState::Invalid;
            entry.bytes = None;
        }
    }

    pub async fn state(&self, id: &str) -> Option<UploadState> {
        self.inner.read().await.get(id).map(|e| e.state)
    }

    /// Periodic reaper: drop in-memory bytes for sessions older than the
    /// TTL regardless of state (spec §4.4 "TTL reaper").
    pub async fn reap_expired(&self) {
        let cutoff = Utc::now() - Duration::from_std(SESSION_TTL).unwrap();
        let mut sessions = self.inner.write().await;
        for entry in sessions.values_mut() {
            if entry.created_at < cutoff && entry.state != UploadState::Completed {
                entry.state = UploadState::Expired;
                entry.bytes = None;
            }
        }
    }

    /// Spawn the periodic reaper task; returns a handle the caller can
    /// abort on shutdown.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
            loop {
                interval.tick().await;
                sessions.reap_expired().await;
            }
        })
    }
}

/// Result of validating an uploaded archive: the parsed manifest, the
/// original bytes (re-persisted verbatim), and their content hash.
pub struct ValidatedArchive {
    pub manifest: PackageManifest,
    pub bytes: Vec<u8>,
    pub sha256: ContentHash,
}

/// gzip-decompress, tar-extract, and locate+parse `pubspec.yaml` at the
/// shallowest path (spec §4.4 step 2-3).
pub fn validate_archive(bytes: Vec<u8>) -> Result<ValidatedArchive> {
    let sha256 = ContentHash::from_bytes(&bytes);
    let decoder = GzDecoder::new(bytes.as_slice());
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| RegistryError::Validation(format!("not a gzip tar archive: {e}")))?;

    let mut best: Option<(usize, Vec<u8>)> = None;
    for entry in entries {
        let mut entry = entry.map_err(|e| RegistryError::Validation(format!("corrupt archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| RegistryError::Validation(format!("invalid archive path: {e}")))?
            .to_path_buf();
        if path.file_name().and_then(|n| n.to_str()) != Some("pubspec.yaml") {
            continue;
        }
        let depth = path.components().count();
        if best.as_ref().map_or(true, |(best_depth, _)| depth < *best_depth) {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| RegistryError::Validation(format!("failed to read manifest: {e}")))?;
            best = Some((depth, contents));
        }
    }

    let (_, manifest_bytes) = best.ok_or_else(|| RegistryError::Validation("archive contains no pubspec.yaml".to_string()))?;
    let manifest = PackageManifest::from_yaml(&manifest_bytes)?;
    Ok(ValidatedArchive {
        manifest,
        bytes,
        sha256,
    })
}

/// Build the deterministic archive key for a validated upload.
pub fn archive_key_for(validated: &ValidatedArchive) -> String {
    package::archive_key(&validated.manifest.name, &validated.manifest.version, &validated.sha256.to_hex())
}

</content>
