//! Embedded single-file metadata engine, backed by `rusqlite` (bundled
//! SQLite). This is the default backend: it needs no external service and
//! is selected whenever `DATABASE_URL` has no `postgres://` scheme.
//!
//! `rusqlite::Connection` is `!Sync`, so the single connection is guarded by
//! a [`tokio::sync::Mutex`] and every query runs inside [`spawn_blocking`]
//! via [`SqliteMetadataStore::with_conn`].

use crate::error::{RegistryError, Result};
use crate::metadata::*;
use crate::package::PackageManifest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    pub async fn open(path: &str) -> Result<Self> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = if path.is_empty() || path == ":memory:" {
                Connection::open_in_memory()?
            } else {
                Connection::open(&path)?
            };
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(conn)
        })
        .await
        .map_err(|e| RegistryError::Internal(e.to_string()))??;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard)
        })
        .await
        .map_err(|e| RegistryError::Internal(e.to_string()))?
        .map_err(RegistryError::from)
    }

    /// Like [`with_conn`](Self::with_conn), but hands the closure a mutable
    /// reference so it can open a [`rusqlite::Transaction`].
    async fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.blocking_lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| RegistryError::Internal(e.to_string()))?
        .map_err(RegistryError::from)
    }

    fn migration_steps() -> &'static [&'static str] {
        &[
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS packages (
                name TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                is_upstream_cache INTEGER NOT NULL DEFAULT 0,
                is_discontinued INTEGER NOT NULL DEFAULT 0,
                replaced_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS package_versions (
                package TEXT NOT NULL REFERENCES packages(name) ON DELETE CASCADE,
                version TEXT NOT NULL,
                manifest_json TEXT NOT NULL,
                archive_key TEXT NOT NULL,
                archive_sha256 TEXT NOT NULL,
                published_at TEXT NOT NULL,
                is_retracted INTEGER NOT NULL DEFAULT 0,
                retracted_at TEXT,
                retraction_message TEXT,
                PRIMARY KEY (package, version)
            )",
            "CREATE INDEX IF NOT EXISTS idx_package_versions_package ON package_versions(package)",
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT,
                name TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_login_at TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS user_sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS admin_users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                must_change_password INTEGER NOT NULL DEFAULT 0,
                last_login_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS admin_sessions (
                session_id TEXT PRIMARY KEY,
                admin_id TEXT NOT NULL REFERENCES admin_users(id) ON DELETE CASCADE,
                expires_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS admin_login_audit (
                id TEXT PRIMARY KEY,
                admin_id TEXT,
                ip TEXT,
                user_agent TEXT,
                success INTEGER NOT NULL,
                at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS tokens (
                hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                scopes_json TEXT NOT NULL,
                expires_at TEXT,
                last_used_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, label)
            )",
            "CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                secret TEXT,
                events_json TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_triggered_at TEXT
            )",
            "CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                webhook_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package TEXT NOT NULL,
                version TEXT NOT NULL,
                ip TEXT,
                user_agent TEXT,
                at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_downloads_package ON downloads(package)",
            "CREATE INDEX IF NOT EXISTS idx_downloads_at ON downloads(at)",
            "CREATE TABLE IF NOT EXISTS activity_log (
                id TEXT PRIMARY KEY,
                activity_type TEXT NOT NULL,
                actor_type TEXT NOT NULL,
                actor_id TEXT,
                target_type TEXT,
                target_id TEXT,
                metadata_json TEXT NOT NULL,
                ip TEXT,
                at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS site_config (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                value_type TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        ]
    }
}

fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_dt(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_dt_opt(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_dt(&s)).transpose()
}

fn package_from_row(row: &Row) -> rusqlite::Result<Package> {
    Ok(Package {
        name: row.get("name")?,
        owner_id: row.get("owner_id")?,
        is_upstream_cache: row.get::<_, i64>("is_upstream_cache")? != 0,
        is_discontinued: row.get::<_, i64>("is_discontinued")? != 0,
        replaced_by: row.get("replaced_by")?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_dt(&row.get::<_, String>("updated_at")?)?,
    })
}

fn version_from_row(row: &Row) -> rusqlite::Result<PackageVersion> {
    let manifest_json: String = row.get("manifest_json")?;
    let manifest: PackageManifest = serde_json::from_str(&manifest_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(PackageVersion {
        package: row.get("package")?,
        version: row.get("version")?,
        manifest,
        archive_key: row.get("archive_key")?,
        archive_sha256: row.get("archive_sha256")?,
        published_at: parse_dt(&row.get::<_, String>("published_at")?)?,
        is_retracted: row.get::<_, i64>("is_retracted")? != 0,
        retracted_at: parse_dt_opt(row.get("retracted_at")?)?,
        retraction_message: row.get("retraction_message")?,
    })
}

fn token_from_row(row: &Row) -> rusqlite::Result<Token> {
    let scopes_json: String = row.get("scopes_json")?;
    let scopes: Vec<String> = serde_json::from_str(&scopes_json).unwrap_or_default();
    Ok(Token {
        hash: row.get("hash")?,
        user_id: row.get("user_id")?,
        label: row.get("label")?,
        scopes,
        expires_at: parse_dt_opt(row.get("expires_at")?)?,
        last_used_at: parse_dt_opt(row.get("last_used_at")?)?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
    })
}

fn webhook_from_row(row: &Row) -> rusqlite::Result<Webhook> {
    let events_json: String = row.get("events_json")?;
    let events: std::collections::HashSet<String> = serde_json::from_str(&events_json).unwrap_or_default();
    Ok(Webhook {
        id: row.get("id")?,
        url: row.get("url")?,
        secret: row.get("secret")?,
        events,
        is_active: row.get::<_, i64>("is_active")? != 0,
        failure_count: row.get::<_, i64>("failure_count")? as u32,
        last_triggered_at: parse_dt_opt(row.get("last_triggered_at")?)?,
    })
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        name: row.get("name")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        last_login_at: parse_dt_opt(row.get("last_login_at")?)?,
        created_at: parse_dt(&row.get::<_, String>("created_at")?)?,
    })
}

fn admin_from_row(row: &Row) -> rusqlite::Result<AdminUser> {
    Ok(AdminUser {
        id: row.get("id")?,
        username: row.get("username")?,
        password_hash: row.get("password_hash")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        must_change_password: row.get::<_, i64>("must_change_password")? != 0,
        last_login_at: parse_dt_opt(row.get("last_login_at")?)?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn run_migrations(&self) -> Result<()> {
        self.with_conn(|conn| {
            for (i, step) in Self::migration_steps().iter().enumerate() {
                let version = i as i64;
                let already: Option<i64> = conn
                    .query_row(
                        "SELECT version FROM schema_migrations WHERE version = ?1",
                        params![version],
                        |r| r.get(0),
                    )
                    .optional()
                    .unwrap_or(None);
                if already.is_some() {
                    continue;
                }
                conn.execute_batch(step)?;
                conn.execute(
                    "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, Utc::now().to_rfc3339()],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn health_check(&self) -> Result<HealthReport> {
        let start = std::time::Instant::now();
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |_| Ok(()))).await?;
        Ok(HealthReport {
            status: "ok".to_string(),
            store_type: "sqlite".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
            db_size_bytes: None,
        })
    }

    async fn list_packages(&self, filter: PackageFilter, page: PageRequest) -> Result<Vec<PackageInfo>> {
        let names = self
            .with_conn(move |conn| {
                let mut sql = "SELECT name FROM packages WHERE 1=1".to_string();
                let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(cache) = filter.is_upstream_cache {
                    sql.push_str(" AND is_upstream_cache = ?");
                    args.push(Box::new(cache as i64));
                }
                if let Some(owner) = &filter.owner_id {
                    sql.push_str(" AND owner_id = ?");
                    args.push(Box::new(owner.clone()));
                }
                sql.push_str(" ORDER BY name LIMIT ? OFFSET ?");
                args.push(Box::new(page.limit as i64));
                args.push(Box::new(page.offset() as i64));
                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
                let rows = stmt.query_map(params.as_slice(), |r| r.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await?;
        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.get_package_info(&name).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn search_packages(&self, query: &str, page: PageRequest) -> Result<Vec<PackageInfo>> {
        let pattern = format!("%{}%", query.to_lowercase());
        let names = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM packages WHERE LOWER(name) LIKE ?1 ORDER BY name LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(
                    params![pattern, page.limit as i64, page.offset() as i64],
                    |r| r.get::<_, String>(0),
                )?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await?;
        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.get_package_info(&name).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn get_package(&self, name: &str) -> Result<Option<Package>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM packages WHERE name = ?1", params![name], package_from_row)
                .optional()
        })
        .await
    }

    async fn get_package_info(&self, name: &str) -> Result<Option<PackageInfo>> {
        let package = match self.get_package(name).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        let name = name.to_string();
        let versions = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM package_versions WHERE package = ?1 ORDER BY published_at",
                )?;
                let rows = stmt.query_map(params![name], version_from_row)?;
                rows.collect::<rusqlite::Result<Vec<PackageVersion>>>()
            })
            .await?;
        Ok(Some(PackageInfo { package, versions }))
    }

    async fn get_package_version(&self, name: &str, version: &str) -> Result<Option<PackageVersion>> {
        let (name, version) = (name.to_string(), version.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM package_versions WHERE package = ?1 AND version = ?2",
                params![name, version],
                version_from_row,
            )
            .optional()
        })
        .await
    }

    async fn upsert_package_version(
        &self,
        owner_id: &str,
        is_upstream_cache: bool,
        version: PackageVersion,
    ) -> Result<()> {
        let owner_id = owner_id.to_string();
        let manifest_json = serde_json::to_string(&version.manifest)?;
        self.with_conn_mut(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO packages (name, owner_id, is_upstream_cache, is_discontinued, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)
                 ON CONFLICT(name) DO UPDATE SET updated_at = excluded.updated_at",
                params![version.package, owner_id, is_upstream_cache as i64, now],
            )?;
            tx.execute(
                "INSERT INTO package_versions
                    (package, version, manifest_json, archive_key, archive_sha256, published_at, is_retracted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                 ON CONFLICT(package, version) DO UPDATE SET
                    manifest_json = excluded.manifest_json,
                    archive_key = excluded.archive_key,
                    archive_sha256 = excluded.archive_sha256",
                params![
                    version.package,
                    version.version,
                    manifest_json,
                    version.archive_key,
                    version.archive_sha256,
                    to_rfc3339(version.published_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_package(&self, name: &str) -> Result<u64> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM packages WHERE name = ?1", params![name])?;
            Ok(n as u64)
        })
        .await
    }

    async fn delete_package_version(&self, name: &str, version: &str) -> Result<bool> {
        let (name, version) = (name.to_string(), version.to_string());
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM package_versions WHERE package = ?1 AND version = ?2",
                params![name, version],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn retract_package_version(&self, name: &str, version: &str, message: Option<String>) -> Result<()> {
        let (name, version) = (name.to_string(), version.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE package_versions SET is_retracted = 1, retracted_at = ?3, retraction_message = ?4
                 WHERE package = ?1 AND version = ?2",
                params![name, version, Utc::now().to_rfc3339(), message],
            )?;
            Ok(())
        })
        .await
    }

    async fn unretract_package_version(&self, name: &str, version: &str) -> Result<()> {
        let (name, version) = (name.to_string(), version.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE package_versions SET is_retracted = 0, retracted_at = NULL, retraction_message = NULL
                 WHERE package = ?1 AND version = ?2",
                params![name, version],
            )?;
            Ok(())
        })
        .await
    }

    async fn transfer_package_ownership(&self, name: &str, new_owner_id: &str) -> Result<()> {
        let (name, new_owner_id) = (name.to_string(), new_owner_id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE packages SET owner_id = ?2, updated_at = ?3 WHERE name = ?1",
                params![name, new_owner_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn discontinue_package(&self, name: &str, replaced_by: Option<String>) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE packages SET is_discontinued = 1, replaced_by = ?2, updated_at = ?3 WHERE name = ?1",
                params![name, replaced_by, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn clear_upstream_cache(&self) -> Result<Vec<PackageVersion>> {
        let cleared = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT pv.* FROM package_versions pv
                     JOIN packages p ON p.name = pv.package
                     WHERE p.is_upstream_cache = 1",
                )?;
                let rows = stmt.query_map([], version_from_row)?;
                rows.collect::<rusqlite::Result<Vec<PackageVersion>>>()
            })
            .await?;
        self.with_conn(|conn| conn.execute("DELETE FROM packages WHERE is_upstream_cache = 1", []))
            .await?;
        Ok(cleared)
    }

    async fn create_user(&self, user: User) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, password_hash, name, is_active, last_login_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id,
                    user.email,
                    user.password_hash,
                    user.name,
                    user.is_active as i64,
                    user.last_login_at.map(to_rfc3339),
                    to_rfc3339(user.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], user_from_row)
                .optional()
        })
        .await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM users WHERE email = ?1", params![email], user_from_row)
                .optional()
        })
        .await
    }

    async fn touch_user_login(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE users SET last_login_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_user_name(&self, id: &str, name: Option<String>) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("UPDATE users SET name = ?2 WHERE id = ?1", params![id, name])?;
            Ok(())
        })
        .await
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn count_users(&self) -> Result<u64> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get::<_, i64>(0)))
            .await
            .map(|n| n as u64)
    }

    async fn create_user_session(&self, session: UserSession) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_sessions (session_id, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![session.session_id, session.user_id, to_rfc3339(session.expires_at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user_session(&self, session_id: &str) -> Result<Option<UserSession>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM user_sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(UserSession {
                        session_id: row.get("session_id")?,
                        user_id: row.get("user_id")?,
                        expires_at: parse_dt(&row.get::<_, String>("expires_at")?)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn delete_user_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM user_sessions WHERE session_id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }

    async fn create_admin_session(&self, session: AdminSession) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO admin_sessions (session_id, admin_id, expires_at) VALUES (?1, ?2, ?3)",
                params![session.session_id, session.admin_id, to_rfc3339(session.expires_at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_admin_session(&self, session_id: &str) -> Result<Option<AdminSession>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM admin_sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(AdminSession {
                        session_id: row.get("session_id")?,
                        admin_id: row.get("admin_id")?,
                        expires_at: parse_dt(&row.get::<_, String>("expires_at")?)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn delete_admin_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM admin_sessions WHERE session_id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }

    async fn count_admin_users(&self) -> Result<u64> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM admin_users", [], |r| r.get::<_, i64>(0)))
            .await
            .map(|n| n as u64)
    }

    async fn create_admin_user(&self, admin: AdminUser) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO admin_users (id, username, password_hash, is_active, must_change_password, last_login_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    admin.id,
                    admin.username,
                    admin.password_hash,
                    admin.is_active as i64,
                    admin.must_change_password as i64,
                    admin.last_login_at.map(to_rfc3339),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_admin_user_by_username(&self, username: &str) -> Result<Option<AdminUser>> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT * FROM admin_users WHERE username = ?1",
                params![username],
                admin_from_row,
            )
            .optional()
        })
        .await
    }

    async fn get_admin_user_by_id(&self, id: &str) -> Result<Option<AdminUser>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM admin_users WHERE id = ?1", params![id], admin_from_row)
                .optional()
        })
        .await
    }

    async fn update_admin_password(&self, id: &str, password_hash: &str) -> Result<()> {
        let (id, password_hash) = (id.to_string(), password_hash.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE admin_users SET password_hash = ?2, must_change_password = 0 WHERE id = ?1",
                params![id, password_hash],
            )?;
            Ok(())
        })
        .await
    }

    async fn touch_admin_login(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE admin_users SET last_login_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_admin_login_audit(&self, audit: AdminLoginAudit) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO admin_login_audit (id, admin_id, ip, user_agent, success, at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    audit.id,
                    audit.admin_id,
                    audit.ip,
                    audit.user_agent,
                    audit.success as i64,
                    to_rfc3339(audit.at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn create_token(&self, token: Token) -> Result<()> {
        let scopes_json = serde_json::to_string(&token.scopes)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tokens (hash, user_id, label, scopes_json, expires_at, last_used_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    token.hash,
                    token.user_id,
                    token.label,
                    scopes_json,
                    token.expires_at.map(to_rfc3339),
                    token.last_used_at.map(to_rfc3339),
                    to_rfc3339(token.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_token_by_hash(&self, hash: &str) -> Result<Option<Token>> {
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM tokens WHERE hash = ?1", params![hash], token_from_row)
                .optional()
        })
        .await
    }

    async fn list_tokens_for_user(&self, user_id: &str) -> Result<Vec<Token>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM tokens WHERE user_id = ?1 ORDER BY created_at")?;
            let rows = stmt.query_map(params![user_id], token_from_row)?;
            rows.collect::<rusqlite::Result<Vec<Token>>>()
        })
        .await
    }

    async fn delete_token(&self, user_id: &str, label: &str) -> Result<bool> {
        let (user_id, label) = (user_id.to_string(), label.to_string());
        self.with_conn(move |conn| {
            let n = conn.execute(
                "DELETE FROM tokens WHERE user_id = ?1 AND label = ?2",
                params![user_id, label],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn touch_token(&self, hash: &str) -> Result<()> {
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE tokens SET last_used_at = ?2 WHERE hash = ?1",
                params![hash, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_active_tokens(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM tokens WHERE expires_at IS NULL OR expires_at > ?1",
                params![Utc::now().to_rfc3339()],
                |r| r.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as u64)
    }

    async fn create_webhook(&self, webhook: Webhook) -> Result<()> {
        let events_json = serde_json::to_string(&webhook.events)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO webhooks (id, url, secret, events_json, is_active, failure_count, last_triggered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    webhook.id,
                    webhook.url,
                    webhook.secret,
                    events_json,
                    webhook.is_active as i64,
                    webhook.failure_count as i64,
                    webhook.last_triggered_at.map(to_rfc3339),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM webhooks WHERE id = ?1", params![id], webhook_from_row)
                .optional()
        })
        .await
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM webhooks ORDER BY id")?;
            let rows = stmt.query_map([], webhook_from_row)?;
            rows.collect::<rusqlite::Result<Vec<Webhook>>>()
        })
        .await
    }

    async fn get_webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>> {
        let all = self.list_webhooks().await?;
        Ok(all
            .into_iter()
            .filter(|w| w.is_active && w.events.contains(event))
            .collect())
    }

    async fn delete_webhook(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn.execute("DELETE FROM webhooks WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    async fn record_webhook_success(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE webhooks SET failure_count = 0, last_triggered_at = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_webhook_failure(&self, id: &str, disable: bool) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            if disable {
                conn.execute(
                    "UPDATE webhooks SET failure_count = failure_count + 1, is_active = 0, last_triggered_at = ?2 WHERE id = ?1",
                    params![id, Utc::now().to_rfc3339()],
                )?;
            } else {
                conn.execute(
                    "UPDATE webhooks SET failure_count = failure_count + 1, last_triggered_at = ?2 WHERE id = ?1",
                    params![id, Utc::now().to_rfc3339()],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn record_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO webhook_deliveries
                    (id, webhook_id, event_type, payload, status_code, success, error, duration_ms, at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    delivery.id,
                    delivery.webhook_id,
                    delivery.event_type,
                    delivery.payload,
                    delivery.status_code,
                    delivery.success as i64,
                    delivery.error,
                    delivery.duration_ms,
                    to_rfc3339(delivery.at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_activity(&self, entry: ActivityLog) -> Result<()> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO activity_log
                    (id, activity_type, actor_type, actor_id, target_type, target_id, metadata_json, ip, at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.id,
                    entry.activity_type,
                    entry.actor_type,
                    entry.actor_id,
                    entry.target_type,
                    entry.target_id,
                    metadata_json,
                    entry.ip,
                    to_rfc3339(entry.at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn record_download(&self, download: Download) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO downloads (package, version, ip, user_agent, at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    download.package,
                    download.version,
                    download.ip,
                    download.user_agent,
                    to_rfc3339(download.at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn downloads_per_hour(&self, hours: u32) -> Result<Vec<(String, u64)>> {
        self.with_conn(move |conn| {
            let since = (Utc::now() - chrono::Duration::hours(hours as i64)).to_rfc3339();
            let mut stmt = conn.prepare(
                "SELECT strftime('%Y-%m-%dT%H:00:00', at) AS bucket, COUNT(*) FROM downloads
                 WHERE at >= ?1 GROUP BY bucket ORDER BY bucket",
            )?;
            let rows = stmt.query_map(params![since], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    async fn packages_created_per_day(&self, days: u32) -> Result<Vec<(String, u64)>> {
        self.with_conn(move |conn| {
            let since = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
            let mut stmt = conn.prepare(
                "SELECT strftime('%Y-%m-%d', created_at) AS bucket, COUNT(*) FROM packages
                 WHERE created_at >= ?1 GROUP BY bucket ORDER BY bucket",
            )?;
            let rows = stmt.query_map(params![since], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    async fn get_package_download_stats(&self, name: &str, history_days: u32) -> Result<PackageDownloadStats> {
        let name2 = name.to_string();
        let total = self
            .with_conn({
                let name = name2.clone();
                move |conn| {
                    conn.query_row(
                        "SELECT COUNT(*) FROM downloads WHERE package = ?1",
                        params![name],
                        |r| r.get::<_, i64>(0),
                    )
                }
            })
            .await? as u64;
        let by_day = self
            .with_conn(move |conn| {
                let since = (Utc::now() - chrono::Duration::days(history_days as i64)).to_rfc3339();
                let mut stmt = conn.prepare(
                    "SELECT strftime('%Y-%m-%d', at) AS bucket, COUNT(*) FROM downloads
                     WHERE package = ?1 AND at >= ?2 GROUP BY bucket ORDER BY bucket",
                )?;
                let rows = stmt.query_map(params![name2, since], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        Ok(PackageDownloadStats {
            package: name.to_string(),
            total_downloads: total,
            by_day,
        })
    }

    async fn get_admin_stats(&self) -> Result<AdminStats> {
        self.with_conn(|conn| {
            let total_packages =
                conn.query_row("SELECT COUNT(*) FROM packages WHERE is_upstream_cache = 0", [], |r| {
                    r.get::<_, i64>(0)
                })? as u64;
            let total_versions = conn.query_row("SELECT COUNT(*) FROM package_versions", [], |r| r.get::<_, i64>(0))? as u64;
            let total_users = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get::<_, i64>(0))? as u64;
            let active_tokens = conn.query_row(
                "SELECT COUNT(*) FROM tokens WHERE expires_at IS NULL OR expires_at > ?1",
                params![Utc::now().to_rfc3339()],
                |r| r.get::<_, i64>(0),
            )? as u64;
            let total_downloads = conn.query_row("SELECT COUNT(*) FROM downloads", [], |r| r.get::<_, i64>(0))? as u64;
            let upstream_cache_packages =
                conn.query_row("SELECT COUNT(*) FROM packages WHERE is_upstream_cache = 1", [], |r| {
                    r.get::<_, i64>(0)
                })? as u64;
            Ok(AdminStats {
                total_packages,
                total_versions,
                total_users,
                active_tokens,
                total_downloads,
                upstream_cache_packages,
            })
        })
        .await
    }

    async fn get_total_downloads(&self) -> Result<u64> {
        self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM downloads", [], |r| r.get::<_, i64>(0)))
            .await
            .map(|n| n as u64)
    }

    async fn get_site_config(&self, name: &str) -> Result<Option<SiteConfig>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT * FROM site_config WHERE name = ?1", params![name], |row| {
                let value_type: String = row.get("value_type")?;
                Ok(SiteConfig {
                    name: row.get("name")?,
                    value: row.get("value")?,
                    value_type: match value_type.as_str() {
                        "number" => SiteConfigType::Number,
                        "boolean" => SiteConfigType::Boolean,
                        _ => SiteConfigType::String,
                    },
                    updated_at: parse_dt(&row.get::<_, String>("updated_at")?)?,
                })
            })
            .optional()
        })
        .await
    }

    async fn set_site_config(&self, config: SiteConfig) -> Result<()> {
        let value_type = match config.value_type {
            SiteConfigType::String => "string",
            SiteConfigType::Number => "number",
            SiteConfigType::Boolean => "boolean",
        };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO site_config (name, value, value_type, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value, value_type = excluded.value_type, updated_at = excluded.updated_at",
                params![config.name, config.value, value_type, to_rfc3339(config.updated_at)],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageManifest;

    fn sample_version(name: &str, version: &str) -> PackageVersion {
        PackageVersion {
            package: name.to_string(),
            version: version.to_string(),
            manifest: PackageManifest {
                name: name.to_string(),
                version: version.to_string(),
                description: None,
                homepage: None,
                repository: None,
                dependencies: Default::default(),
                environment: Default::default(),
                extra: Default::default(),
            },
            archive_key: format!("{name}/{version}-deadbeef.tar.gz"),
            archive_sha256: "deadbeef".to_string(),
            published_at: Utc::now(),
            is_retracted: false,
            retracted_at: None,
            retraction_message: None,
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        store.run_migrations().await.unwrap();
        store.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn publish_then_fetch_roundtrips() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        store
            .upsert_package_version("owner-1", false, sample_version("alpha", "1.0.0"))
            .await
            .unwrap();
        let info = store.get_package_info("alpha").await.unwrap().unwrap();
        assert_eq!(info.package.owner_id, "owner-1");
        assert_eq!(info.versions.len(), 1);
        assert_eq!(info.latest().unwrap().version, "1.0.0");
    }

    #[tokio::test]
    async fn retract_then_unretract_round_trips() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        store
            .upsert_package_version("owner-1", false, sample_version("alpha", "1.0.0"))
            .await
            .unwrap();
        store
            .retract_package_version("alpha", "1.0.0", Some("cve".to_string()))
            .await
            .unwrap();
        let v = store.get_package_version("alpha", "1.0.0").await.unwrap().unwrap();
        assert!(v.is_retracted);
        store.unretract_package_version("alpha", "1.0.0").await.unwrap();
        let v = store.get_package_version("alpha", "1.0.0").await.unwrap().unwrap();
        assert!(!v.is_retracted);
    }

    #[tokio::test]
    async fn token_lookup_by_hash() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        store
            .create_user(User {
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
        store
            .create_token(Token {
                hash: "hash1".into(),
                user_id: "u1".into(),
                label: "ci".into(),
                scopes: vec!["publish:all".into()],
                expires_at: None,
                last_used_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let token = store.get_token_by_hash("hash1").await.unwrap().unwrap();
        assert_eq!(token.user_id, "u1");
        assert_eq!(token.scopes, vec!["publish:all"]);
    }

    #[tokio::test]
    async fn webhooks_filter_by_event() {
        let store = SqliteMetadataStore::open(":memory:").await.unwrap();
        let mut events = std::collections::HashSet::new();
        events.insert("package.published".to_string());
        store
            .create_webhook(Webhook {
                id: "w1".into(),
                url: "https://example.com/hook".into(),
                secret: Some("s".into()),
                events,
                is_active: true,
                failure_count: 0,
                last_triggered_at: None,
            })
            .await
            .unwrap();
        let matched = store.get_webhooks_for_event("package.published").await.unwrap();
        assert_eq!(matched.len(), 1);
        let unmatched = store.get_webhooks_for_event("package.yanked").await.unwrap();
        assert!(unmatched.is_empty());
    }
}
</content>
