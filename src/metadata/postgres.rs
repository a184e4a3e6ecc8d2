//! Networked metadata engine, backed by `tokio-postgres` via a
//! `deadpool-postgres` connection pool. Selected when `DATABASE_URL` carries
//! a `postgres://` or `postgresql://` scheme (spec §9).
//!
//! Mirrors the logical schema of [`super::sqlite::SqliteMetadataStore`] but
//! keeps its own migration list: Postgres's native `TIMESTAMPTZ`, `JSONB`,
//! and `BOOLEAN` types make a shared migration abstraction more awkward
//! than useful across the two dialects.

use crate::error::{RegistryError, Result};
use crate::metadata::*;
use crate::package::PackageManifest;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::{NoTls, Row};

pub struct PostgresMetadataStore {
    pool: Pool,
}

impl PostgresMetadataStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(database_url.to_string());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| RegistryError::StorageError(e.to_string()))?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Constructs a store from an already-built pool, for tests that want
    /// to share a pool across stores.
    pub fn with_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn client(&self) -> Result<deadpool_postgres::Client> {
        self.pool.get().await.map_err(|e| RegistryError::StorageError(e.to_string()))
    }

    fn migration_steps() -> &'static [&'static str] {
        &[
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL)",
            "CREATE TABLE IF NOT EXISTS packages (
                name TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                is_upstream_cache BOOLEAN NOT NULL DEFAULT FALSE,
                is_discontinued BOOLEAN NOT NULL DEFAULT FALSE,
                replaced_by TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS package_versions (
                package TEXT NOT NULL REFERENCES packages(name) ON DELETE CASCADE,
                version TEXT NOT NULL,
                manifest_json JSONB NOT NULL,
                archive_key TEXT NOT NULL,
                archive_sha256 TEXT NOT NULL,
                published_at TIMESTAMPTZ NOT NULL,
                is_retracted BOOLEAN NOT NULL DEFAULT FALSE,
                retracted_at TIMESTAMPTZ,
                retraction_message TEXT,
                PRIMARY KEY (package, version)
            )",
            "CREATE INDEX IF NOT EXISTS idx_package_versions_package ON package_versions(package)",
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT,
                name TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                last_login_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS user_sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS admin_users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                must_change_password BOOLEAN NOT NULL DEFAULT FALSE,
                last_login_at TIMESTAMPTZ
            )",
            "CREATE TABLE IF NOT EXISTS admin_sessions (
                session_id TEXT PRIMARY KEY,
                admin_id TEXT NOT NULL REFERENCES admin_users(id) ON DELETE CASCADE,
                expires_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS admin_login_audit (
                id TEXT PRIMARY KEY,
                admin_id TEXT,
                ip TEXT,
                user_agent TEXT,
                success BOOLEAN NOT NULL,
                at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS tokens (
                hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                scopes_json JSONB NOT NULL,
                expires_at TIMESTAMPTZ,
                last_used_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE(user_id, label)
            )",
            "CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                secret TEXT,
                events_json JSONB NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_triggered_at TIMESTAMPTZ
            )",
            "CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                webhook_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                success BOOLEAN NOT NULL,
                error TEXT,
                duration_ms BIGINT NOT NULL,
                at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS downloads (
                id BIGSERIAL PRIMARY KEY,
                package TEXT NOT NULL,
                version TEXT NOT NULL,
                ip TEXT,
                user_agent TEXT,
                at TIMESTAMPTZ NOT NULL
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
                metadata_json JSONB NOT NULL,
                ip TEXT,
                at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS site_config (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                value_type TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        ]
    }
}

fn package_from_row(row: &Row) -> Result<Package> {
    Ok(Package {
        name: row.get("name"),
        owner_id: row.get("owner_id"),
        is_upstream_cache: row.get("is_upstream_cache"),
        is_discontinued: row.get("is_discontinued"),
        replaced_by: row.get("replaced_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn version_from_row(row: &Row) -> Result<PackageVersion> {
    let manifest_json: serde_json::Value = row.get("manifest_json");
    let manifest: PackageManifest = serde_json::from_value(manifest_json)?;
    Ok(PackageVersion {
        package: row.get("package"),
        version: row.get("version"),
        manifest,
        archive_key: row.get("archive_key"),
        archive_sha256: row.get("archive_sha256"),
        published_at: row.get("published_at"),
        is_retracted: row.get("is_retracted"),
        retracted_at: row.get("retracted_at"),
        retraction_message: row.get("retraction_message"),
    })
}

fn token_from_row(row: &Row) -> Result<Token> {
    let scopes_json: serde_json::Value = row.get("scopes_json");
    let scopes: Vec<String> = serde_json::from_value(scopes_json).unwrap_or_default();
    Ok(Token {
        hash: row.get("hash"),
        user_id: row.get("user_id"),
        label: row.get("label"),
        scopes,
        expires_at: row.get("expires_at"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
    })
}

fn webhook_from_row(row: &Row) -> Result<Webhook> {
    let events_json: serde_json::Value = row.get("events_json");
    let events: std::collections::HashSet<String> = serde_json::from_value(events_json).unwrap_or_default();
    Ok(Webhook {
        id: row.get("id"),
        url: row.get("url"),
        secret: row.get("secret"),
        events,
        is_active: row.get("is_active"),
        failure_count: row.get::<_, i32>("failure_count") as u32,
        last_triggered_at: row.get("last_triggered_at"),
    })
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        name: row.get("name"),
        is_active: row.get("is_active"),
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
    })
}

fn admin_from_row(row: &Row) -> Result<AdminUser> {
    Ok(AdminUser {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        must_change_password: row.get("must_change_password"),
        last_login_at: row.get("last_login_at"),
    })
}

macro_rules! pg_err {
    ($e:expr) => {
        $e.map_err(|e: tokio_postgres::Error| RegistryError::StorageError(e.to_string()))
    };
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn run_migrations(&self) -> Result<()> {
        let client = self.client().await?;
        for (i, step) in Self::migration_steps().iter().enumerate() {
            let version = i as i64;
            let already = pg_err!(
                client
                    .query_opt("SELECT version FROM schema_migrations WHERE version = $1", &[&version])
                    .await
            )?;
            if already.is_some() {
                continue;
            }
            pg_err!(client.batch_execute(step).await)?;
            pg_err!(
                client
                    .execute(
                        "INSERT INTO schema_migrations (version, applied_at) VALUES ($1, $2)
                         ON CONFLICT DO NOTHING",
                        &[&version, &Utc::now()],
                    )
                    .await
            )?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthReport> {
        let start = std::time::Instant::now();
        let client = self.client().await?;
        pg_err!(client.query_one("SELECT 1", &[]).await)?;
        Ok(HealthReport {
            status: "ok".to_string(),
            store_type: "postgres".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
            db_size_bytes: None,
        })
    }

    async fn list_packages(&self, filter: PackageFilter, page: PageRequest) -> Result<Vec<PackageInfo>> {
        let client = self.client().await?;
        let mut sql = "SELECT name FROM packages WHERE 1=1".to_string();
        let mut args: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
        if let Some(cache) = &filter.is_upstream_cache {
            sql.push_str(&format!(" AND is_upstream_cache = ${}", args.len() + 1));
            args.push(cache);
        }
        if let Some(owner) = &filter.owner_id {
            sql.push_str(&format!(" AND owner_id = ${}", args.len() + 1));
            args.push(owner);
        }
        let limit = page.limit as i64;
        let offset = page.offset() as i64;
        sql.push_str(&format!(" ORDER BY name LIMIT ${} OFFSET ${}", args.len() + 1, args.len() + 2));
        args.push(&limit);
        args.push(&offset);
        let rows = pg_err!(client.query(sql.as_str(), &args).await)?;
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.get_package_info(&name).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn search_packages(&self, query: &str, page: PageRequest) -> Result<Vec<PackageInfo>> {
        let client = self.client().await?;
        let pattern = format!("%{}%", query.to_lowercase());
        let limit = page.limit as i64;
        let offset = page.offset() as i64;
        let rows = pg_err!(
            client
                .query(
                    "SELECT name FROM packages WHERE LOWER(name) LIKE $1 ORDER BY name LIMIT $2 OFFSET $3",
                    &[&pattern, &limit, &offset],
                )
                .await
        )?;
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.get_package_info(&name).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn get_package(&self, name: &str) -> Result<Option<Package>> {
        let client = self.client().await?;
        let row = pg_err!(client.query_opt("SELECT * FROM packages WHERE name = $1", &[&name]).await)?;
        row.map(|r| package_from_row(&r)).transpose()
    }

    async fn get_package_info(&self, name: &str) -> Result<Option<PackageInfo>> {
        let package = match self.get_package(name).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        let client = self.client().await?;
        let rows = pg_err!(
            client
                .query(
                    "SELECT * FROM package_versions WHERE package = $1 ORDER BY published_at",
                    &[&name],
                )
                .await
        )?;
        let versions = rows.iter().map(version_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Some(PackageInfo { package, versions }))
    }

    async fn get_package_version(&self, name: &str, version: &str) -> Result<Option<PackageVersion>> {
        let client = self.client().await?;
        let row = pg_err!(
            client
                .query_opt(
                    "SELECT * FROM package_versions WHERE package = $1 AND version = $2",
                    &[&name, &version],
                )
                .await
        )?;
        row.map(|r| version_from_row(&r)).transpose()
    }

    async fn upsert_package_version(
        &self,
        owner_id: &str,
        is_upstream_cache: bool,
        version: PackageVersion,
    ) -> Result<()> {
        let mut client = self.client().await?;
        let now = Utc::now();
        let manifest_json = serde_json::to_value(&version.manifest)?;
        let tx = pg_err!(client.transaction().await)?;
        pg_err!(
            tx.execute(
                "INSERT INTO packages (name, owner_id, is_upstream_cache, is_discontinued, created_at, updated_at)
                 VALUES ($1, $2, $3, FALSE, $4, $4)
                 ON CONFLICT (name) DO UPDATE SET updated_at = EXCLUDED.updated_at",
                &[&version.package, &owner_id, &is_upstream_cache, &now],
            )
            .await
        )?;
        pg_err!(
            tx.execute(
                "INSERT INTO package_versions
                    (package, version, manifest_json, archive_key, archive_sha256, published_at, is_retracted)
                 VALUES ($1, $2, $3, $4, $5, $6, FALSE)
                 ON CONFLICT (package, version) DO UPDATE SET
                    manifest_json = EXCLUDED.manifest_json,
                    archive_key = EXCLUDED.archive_key,
                    archive_sha256 = EXCLUDED.archive_sha256",
                &[
                    &version.package,
                    &version.version,
                    &manifest_json,
                    &version.archive_key,
                    &version.archive_sha256,
                    &version.published_at,
                ],
            )
            .await
        )?;
        pg_err!(tx.commit().await)?;
        Ok(())
    }

    async fn delete_package(&self, name: &str) -> Result<u64> {
        let client = self.client().await?;
        let n = pg_err!(client.execute("DELETE FROM packages WHERE name = $1", &[&name]).await)?;
        Ok(n)
    }

    async fn delete_package_version(&self, name: &str, version: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = pg_err!(
            client
                .execute(
                    "DELETE FROM package_versions WHERE package = $1 AND version = $2",
                    &[&name, &version],
                )
                .await
        )?;
        Ok(n > 0)
    }

    async fn retract_package_version(&self, name: &str, version: &str, message: Option<String>) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "UPDATE package_versions SET is_retracted = TRUE, retracted_at = $3, retraction_message = $4
                     WHERE package = $1 AND version = $2",
                    &[&name, &version, &Utc::now(), &message],
                )
                .await
        )?;
        Ok(())
    }

    async fn unretract_package_version(&self, name: &str, version: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "UPDATE package_versions SET is_retracted = FALSE, retracted_at = NULL, retraction_message = NULL
                     WHERE package = $1 AND version = $2",
                    &[&name, &version],
                )
                .await
        )?;
        Ok(())
    }

    async fn transfer_package_ownership(&self, name: &str, new_owner_id: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "UPDATE packages SET owner_id = $2, updated_at = $3 WHERE name = $1",
                    &[&name, &new_owner_id, &Utc::now()],
                )
                .await
        )?;
        Ok(())
    }

    async fn discontinue_package(&self, name: &str, replaced_by: Option<String>) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "UPDATE packages SET is_discontinued = TRUE, replaced_by = $2, updated_at = $3 WHERE name = $1",
                    &[&name, &replaced_by, &Utc::now()],
                )
                .await
        )?;
        Ok(())
    }

    async fn clear_upstream_cache(&self) -> Result<Vec<PackageVersion>> {
        let client = self.client().await?;
        let rows = pg_err!(
            client
                .query(
                    "SELECT pv.* FROM package_versions pv
                     JOIN packages p ON p.name = pv.package
                     WHERE p.is_upstream_cache = TRUE",
                    &[],
                )
                .await
        )?;
        let cleared = rows.iter().map(version_from_row).collect::<Result<Vec<_>>>()?;
        pg_err!(
            client
                .execute("DELETE FROM packages WHERE is_upstream_cache = TRUE", &[])
                .await
        )?;
        Ok(cleared)
    }

    async fn create_user(&self, user: User) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO users (id, email, password_hash, name, is_active, last_login_at, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    &[
                        &user.id,
                        &user.email,
                        &user.password_hash,
                        &user.name,
                        &user.is_active,
                        &user.last_login_at,
                        &user.created_at,
                    ],
                )
                .await
        )?;
        Ok(())
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let client = self.client().await?;
        let row = pg_err!(client.query_opt("SELECT * FROM users WHERE id = $1", &[&id]).await)?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let client = self.client().await?;
        let row = pg_err!(client.query_opt("SELECT * FROM users WHERE email = $1", &[&email]).await)?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn touch_user_login(&self, id: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute("UPDATE users SET last_login_at = $2 WHERE id = $1", &[&id, &Utc::now()])
                .await
        )?;
        Ok(())
    }

    async fn update_user_name(&self, id: &str, name: Option<String>) -> Result<()> {
        let client = self.client().await?;
        pg_err!(client.execute("UPDATE users SET name = $2 WHERE id = $1", &[&id, &name]).await)?;
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(client.execute("DELETE FROM users WHERE id = $1", &[&id]).await)?;
        Ok(())
    }

    async fn count_users(&self) -> Result<u64> {
        let client = self.client().await?;
        let row = pg_err!(client.query_one("SELECT COUNT(*) FROM users", &[]).await)?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn create_user_session(&self, session: UserSession) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO user_sessions (session_id, user_id, expires_at) VALUES ($1, $2, $3)",
                    &[&session.session_id, &session.user_id, &session.expires_at],
                )
                .await
        )?;
        Ok(())
    }

    async fn get_user_session(&self, session_id: &str) -> Result<Option<UserSession>> {
        let client = self.client().await?;
        let row = pg_err!(
            client
                .query_opt("SELECT * FROM user_sessions WHERE session_id = $1", &[&session_id])
                .await
        )?;
        Ok(row.map(|r| UserSession {
            session_id: r.get("session_id"),
            user_id: r.get("user_id"),
            expires_at: r.get("expires_at"),
        }))
    }

    async fn delete_user_session(&self, session_id: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute("DELETE FROM user_sessions WHERE session_id = $1", &[&session_id])
                .await
        )?;
        Ok(())
    }

    async fn create_admin_session(&self, session: AdminSession) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO admin_sessions (session_id, admin_id, expires_at) VALUES ($1, $2, $3)",
                    &[&session.session_id, &session.admin_id, &session.expires_at],
                )
                .await
        )?;
        Ok(())
    }

    async fn get_admin_session(&self, session_id: &str) -> Result<Option<AdminSession>> {
        let client = self.client().await?;
        let row = pg_err!(
            client
                .query_opt("SELECT * FROM admin_sessions WHERE session_id = $1", &[&session_id])
                .await
        )?;
        Ok(row.map(|r| AdminSession {
            session_id: r.get("session_id"),
            admin_id: r.get("admin_id"),
            expires_at: r.get("expires_at"),
        }))
    }

    async fn delete_admin_session(&self, session_id: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute("DELETE FROM admin_sessions WHERE session_id = $1", &[&session_id])
                .await
        )?;
        Ok(())
    }

    async fn count_admin_users(&self) -> Result<u64> {
        let client = self.client().await?;
        let row = pg_err!(client.query_one("SELECT COUNT(*) FROM admin_users", &[]).await)?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn create_admin_user(&self, admin: AdminUser) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO admin_users (id, username, password_hash, is_active, must_change_password, last_login_at)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &admin.id,
                        &admin.username,
                        &admin.password_hash,
                        &admin.is_active,
                        &admin.must_change_password,
                        &admin.last_login_at,
                    ],
                )
                .await
        )?;
        Ok(())
    }

    async fn get_admin_user_by_username(&self, username: &str) -> Result<Option<AdminUser>> {
        let client = self.client().await?;
        let row = pg_err!(
            client
                .query_opt("SELECT * FROM admin_users WHERE username = $1", &[&username])
                .await
        )?;
        row.map(|r| admin_from_row(&r)).transpose()
    }

    async fn get_admin_user_by_id(&self, id: &str) -> Result<Option<AdminUser>> {
        let client = self.client().await?;
        let row = pg_err!(client.query_opt("SELECT * FROM admin_users WHERE id = $1", &[&id]).await)?;
        row.map(|r| admin_from_row(&r)).transpose()
    }

    async fn update_admin_password(&self, id: &str, password_hash: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "UPDATE admin_users SET password_hash = $2, must_change_password = FALSE WHERE id = $1",
                    &[&id, &password_hash],
                )
                .await
        )?;
        Ok(())
    }

    async fn touch_admin_login(&self, id: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "UPDATE admin_users SET last_login_at = $2 WHERE id = $1",
                    &[&id, &Utc::now()],
                )
                .await
        )?;
        Ok(())
    }

    async fn record_admin_login_audit(&self, audit: AdminLoginAudit) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO admin_login_audit (id, admin_id, ip, user_agent, success, at)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &audit.id,
                        &audit.admin_id,
                        &audit.ip,
                        &audit.user_agent,
                        &audit.success,
                        &audit.at,
                    ],
                )
                .await
        )?;
        Ok(())
    }

    async fn create_token(&self, token: Token) -> Result<()> {
        let client = self.client().await?;
        let scopes_json = serde_json::to_value(&token.scopes)?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO tokens (hash, user_id, label, scopes_json, expires_at, last_used_at, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    &[
                        &token.hash,
                        &token.user_id,
                        &token.label,
                        &scopes_json,
                        &token.expires_at,
                        &token.last_used_at,
                        &token.created_at,
                    ],
                )
                .await
        )?;
        Ok(())
    }

    async fn get_token_by_hash(&self, hash: &str) -> Result<Option<Token>> {
        let client = self.client().await?;
        let row = pg_err!(client.query_opt("SELECT * FROM tokens WHERE hash = $1", &[&hash]).await)?;
        row.map(|r| token_from_row(&r)).transpose()
    }

    async fn list_tokens_for_user(&self, user_id: &str) -> Result<Vec<Token>> {
        let client = self.client().await?;
        let rows = pg_err!(
            client
                .query("SELECT * FROM tokens WHERE user_id = $1 ORDER BY created_at", &[&user_id])
                .await
        )?;
        rows.iter().map(token_from_row).collect()
    }

    async fn delete_token(&self, user_id: &str, label: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = pg_err!(
            client
                .execute(
                    "DELETE FROM tokens WHERE user_id = $1 AND label = $2",
                    &[&user_id, &label],
                )
                .await
        )?;
        Ok(n > 0)
    }

    async fn touch_token(&self, hash: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute("UPDATE tokens SET last_used_at = $2 WHERE hash = $1", &[&hash, &Utc::now()])
                .await
        )?;
        Ok(())
    }

    async fn count_active_tokens(&self) -> Result<u64> {
        let client = self.client().await?;
        let row = pg_err!(
            client
                .query_one(
                    "SELECT COUNT(*) FROM tokens WHERE expires_at IS NULL OR expires_at > $1",
                    &[&Utc::now()],
                )
                .await
        )?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn create_webhook(&self, webhook: Webhook) -> Result<()> {
        let client = self.client().await?;
        let events_json = serde_json::to_value(&webhook.events)?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO webhooks (id, url, secret, events_json, is_active, failure_count, last_triggered_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    &[
                        &webhook.id,
                        &webhook.url,
                        &webhook.secret,
                        &events_json,
                        &webhook.is_active,
                        &(webhook.failure_count as i32),
                        &webhook.last_triggered_at,
                    ],
                )
                .await
        )?;
        Ok(())
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        let client = self.client().await?;
        let row = pg_err!(client.query_opt("SELECT * FROM webhooks WHERE id = $1", &[&id]).await)?;
        row.map(|r| webhook_from_row(&r)).transpose()
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let client = self.client().await?;
        let rows = pg_err!(client.query("SELECT * FROM webhooks ORDER BY id", &[]).await)?;
        rows.iter().map(webhook_from_row).collect()
    }

    async fn get_webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>> {
        let all = self.list_webhooks().await?;
        Ok(all
            .into_iter()
            .filter(|w| w.is_active && w.events.contains(event))
            .collect())
    }

    async fn delete_webhook(&self, id: &str) -> Result<bool> {
        let client = self.client().await?;
        let n = pg_err!(client.execute("DELETE FROM webhooks WHERE id = $1", &[&id]).await)?;
        Ok(n > 0)
    }

    async fn record_webhook_success(&self, id: &str) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "UPDATE webhooks SET failure_count = 0, last_triggered_at = $2 WHERE id = $1",
                    &[&id, &Utc::now()],
                )
                .await
        )?;
        Ok(())
    }

    async fn record_webhook_failure(&self, id: &str, disable: bool) -> Result<()> {
        let client = self.client().await?;
        if disable {
            pg_err!(
                client
                    .execute(
                        "UPDATE webhooks SET failure_count = failure_count + 1, is_active = FALSE, last_triggered_at = $2
                         WHERE id = $1",
                        &[&id, &Utc::now()],
                    )
                    .await
            )?;
        } else {
            pg_err!(
                client
                    .execute(
                        "UPDATE webhooks SET failure_count = failure_count + 1, last_triggered_at = $2 WHERE id = $1",
                        &[&id, &Utc::now()],
                    )
                    .await
            )?;
        }
        Ok(())
    }

    async fn record_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO webhook_deliveries
                        (id, webhook_id, event_type, payload, status_code, success, error, duration_ms, at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    &[
                        &delivery.id,
                        &delivery.webhook_id,
                        &delivery.event_type,
                        &delivery.payload,
                        &delivery.status_code,
                        &delivery.success,
                        &delivery.error,
                        &delivery.duration_ms,
                        &delivery.at,
                    ],
                )
                .await
        )?;
        Ok(())
    }

    async fn record_activity(&self, entry: ActivityLog) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO activity_log
                        (id, activity_type, actor_type, actor_id, target_type, target_id, metadata_json, ip, at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    &[
                        &entry.id,
                        &entry.activity_type,
                        &entry.actor_type,
                        &entry.actor_id,
                        &entry.target_type,
                        &entry.target_id,
                        &entry.metadata,
                        &entry.ip,
                        &entry.at,
                    ],
                )
                .await
        )?;
        Ok(())
    }

    async fn record_download(&self, download: Download) -> Result<()> {
        let client = self.client().await?;
        pg_err!(
            client
                .execute(
                    "INSERT INTO downloads (package, version, ip, user_agent, at) VALUES ($1, $2, $3, $4, $5)",
                    &[&download.package, &download.version, &download.ip, &download.user_agent, &download.at],
                )
                .await
        )?;
        Ok(())
    }

    async fn downloads_per_hour(&self, hours: u32) -> Result<Vec<(String, u64)>> {
        let client = self.client().await?;
        let since = Utc::now() - chrono::Duration::hours(hours as i64);
        let rows = pg_err!(
            client
                .query(
                    "SELECT to_char(date_trunc('hour', at), 'YYYY-MM-DD\"T\"HH24:00:00') AS bucket, COUNT(*)
                     FROM downloads WHERE at >= $1 GROUP BY bucket ORDER BY bucket",
                    &[&since],
                )
                .await
        )?;
        Ok(rows.iter().map(|r| (r.get::<_, String>(0), r.get::<_, i64>(1) as u64)).collect())
    }

    async fn packages_created_per_day(&self, days: u32) -> Result<Vec<(String, u64)>> {
        let client = self.client().await?;
        let since = Utc::now() - chrono::Duration::days(days as i64);
        let rows = pg_err!(
            client
                .query(
                    "SELECT to_char(date_trunc('day', created_at), 'YYYY-MM-DD') AS bucket, COUNT(*)
                     FROM packages WHERE created_at >= $1 GROUP BY bucket ORDER BY bucket",
                    &[&since],
                )
                .await
        )?;
        Ok(rows.iter().map(|r| (r.get::<_, String>(0), r.get::<_, i64>(1) as u64)).collect())
    }

    async fn get_package_download_stats(&self, name: &str, history_days: u32) -> Result<PackageDownloadStats> {
        let client = self.client().await?;
        let total_row = pg_err!(
            client
                .query_one("SELECT COUNT(*) FROM downloads WHERE package = $1", &[&name])
                .await
        )?;
        let since = Utc::now() - chrono::Duration::days(history_days as i64);
        let rows = pg_err!(
            client
                .query(
                    "SELECT to_char(date_trunc('day', at), 'YYYY-MM-DD') AS bucket, COUNT(*)
                     FROM downloads WHERE package = $1 AND at >= $2 GROUP BY bucket ORDER BY bucket",
                    &[&name, &since],
                )
                .await
        )?;
        Ok(PackageDownloadStats {
            package: name.to_string(),
            total_downloads: total_row.get::<_, i64>(0) as u64,
            by_day: rows.iter().map(|r| (r.get::<_, String>(0), r.get::<_, i64>(1) as u64)).collect(),
        })
    }

    async fn get_admin_stats(&self) -> Result<AdminStats> {
        let client = self.client().await?;
        let total_packages = pg_err!(
            client
                .query_one("SELECT COUNT(*) FROM packages WHERE is_upstream_cache = FALSE", &[])
                .await
        )?
        .get::<_, i64>(0) as u64;
        let total_versions = pg_err!(client.query_one("SELECT COUNT(*) FROM package_versions", &[]).await)?
            .get::<_, i64>(0) as u64;
        let total_users = pg_err!(client.query_one("SELECT COUNT(*) FROM users", &[]).await)?.get::<_, i64>(0) as u64;
        let active_tokens = pg_err!(
            client
                .query_one(
                    "SELECT COUNT(*) FROM tokens WHERE expires_at IS NULL OR expires_at > $1",
                    &[&Utc::now()],
                )
                .await
        )?
        .get::<_, i64>(0) as u64;
        let total_downloads =
            pg_err!(client.query_one("SELECT COUNT(*) FROM downloads", &[]).await)?.get::<_, i64>(0) as u64;
        let upstream_cache_packages = pg_err!(
            client
                .query_one("SELECT COUNT(*) FROM packages WHERE is_upstream_cache = TRUE", &[])
                .await
        )?
        .get::<_, i64>(0) as u64;
        Ok(AdminStats {
            total_packages,
            total_versions,
            total_users,
            active_tokens,
            total_downloads,
            upstream_cache_packages,
        })
    }

    async fn get_total_downloads(&self) -> Result<u64> {
        let client = self.client().await?;
        let row = pg_err!(client.query_one("SELECT COUNT(*) FROM downloads", &[]).await)?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn get_site_config(&self, name: &str) -> Result<Option<SiteConfig>> {
        let client = self.client().await?;
        let row = pg_err!(client.query_opt("SELECT * FROM site_config WHERE name = $1", &[&name]).await)?;
        Ok(row.map(|r| {
            let value_type: String = r.get("value_type");
            SiteConfig {
                name: r.get("name"),
                value: r.get("value"),
                value_type: match value_type.as_str() {
                    "number" => SiteConfigType::Number,
                    "boolean" => SiteConfigType::Boolean,
                    _ => SiteConfigType::String,
                },
                updated_at: r.get("updated_at"),
            }
        }))
    }

    async fn set_site_config(&self, config: SiteConfig) -> Result<()> {
        let client = self.client().await?;
        let value_type = match config.value_type {
            SiteConfigType::String => "string",
            SiteConfigType::Number => "number",
            SiteConfigType::Boolean => "boolean",
        };
        pg_err!(
            client
                .execute(
                    "INSERT INTO site_config (name, value, value_type, updated_at) VALUES ($1, $2, $3, $4)
                     ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, value_type = EXCLUDED.value_type, updated_at = EXCLUDED.updated_at",
                    &[&config.name, &config.value, &value_type, &config.updated_at],
                )
                .await
        )?;
        Ok(())
    }
}
</content>
