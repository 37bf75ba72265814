use crate::models::{AuditEntry, EnrichedAccessRecord, ShortLinkRecord};
use crate::storage::trait_def::{access_from_row, AccessRow};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL UNIQUE,
                target_url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                start_at INTEGER,
                end_at INTEGER,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                is_locked INTEGER NOT NULL DEFAULT 0,
                allowed_ips TEXT NOT NULL DEFAULT '',
                splash_page INTEGER NOT NULL DEFAULT 0,
                sensitive_warning INTEGER NOT NULL DEFAULT 0,
                stats_enabled INTEGER NOT NULL DEFAULT 1,
                owner_id INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL,
                short_code TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                ip_address TEXT NOT NULL,
                country TEXT NOT NULL DEFAULT 'Unknown',
                region TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                browser TEXT NOT NULL DEFAULT '',
                os TEXT NOT NULL DEFAULT '',
                device_type TEXT NOT NULL,
                user_agent TEXT NOT NULL DEFAULT '',
                referrer TEXT NOT NULL DEFAULT 'Direct'
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_access_link_id ON access_events(link_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER,
                action TEXT NOT NULL,
                entity_id TEXT NOT NULL DEFAULT '',
                details TEXT NOT NULL DEFAULT '',
                ip_address TEXT NOT NULL DEFAULT '',
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_user_id ON audit_log(user_id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn find_by_code(&self, short_code: &str) -> Result<Option<ShortLinkRecord>> {
        let record = sqlx::query_as::<_, ShortLinkRecord>(
            r#"
            SELECT id, short_code, target_url, created_at, expires_at, start_at, end_at,
                   is_enabled, is_locked, allowed_ips, splash_page, sensitive_warning,
                   stats_enabled, owner_id
            FROM links
            WHERE short_code = ?
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn insert_link(&self, record: &ShortLinkRecord) -> StorageResult<ShortLinkRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO links (
                short_code, target_url, created_at, expires_at, start_at, end_at,
                is_enabled, is_locked, allowed_ips, splash_page, sensitive_warning,
                stats_enabled, owner_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(&record.short_code)
        .bind(&record.target_url)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.start_at)
        .bind(record.end_at)
        .bind(record.is_enabled)
        .bind(record.is_locked)
        .bind(&record.allowed_ips)
        .bind(record.splash_page)
        .bind(record.sensitive_warning)
        .bind(record.stats_enabled)
        .bind(record.owner_id)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let mut stored = record.clone();
        stored.id = result.last_insert_rowid();
        Ok(stored)
    }

    async fn insert_access(&self, record: &EnrichedAccessRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO access_events (
                link_id, short_code, timestamp, ip_address, country, region, city,
                browser, os, device_type, user_agent, referrer
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.link_id)
        .bind(&record.short_code)
        .bind(record.timestamp)
        .bind(&record.ip_address)
        .bind(&record.country)
        .bind(&record.region)
        .bind(&record.city)
        .bind(&record.browser)
        .bind(&record.os)
        .bind(record.device_type.as_str())
        .bind(&record.user_agent)
        .bind(&record.referrer)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn recent_access(
        &self,
        short_code: &str,
        limit: i64,
    ) -> Result<Vec<EnrichedAccessRecord>> {
        let rows = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT link_id, short_code, timestamp, ip_address, country, region, city,
                   browser, os, device_type, user_agent, referrer
            FROM access_events
            WHERE short_code = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(short_code)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(access_from_row).collect())
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (user_id, action, entity_id, details, ip_address, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.entity_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(entry.timestamp)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}
