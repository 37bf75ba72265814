use crate::models::{AuditEntry, EnrichedAccessRecord, ShortLinkRecord};
use crate::storage::trait_def::{access_from_row, AccessRow};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id BIGSERIAL PRIMARY KEY,
                short_code TEXT NOT NULL UNIQUE,
                target_url TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                expires_at BIGINT,
                start_at BIGINT,
                end_at BIGINT,
                is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                is_locked BOOLEAN NOT NULL DEFAULT FALSE,
                allowed_ips TEXT NOT NULL DEFAULT '',
                splash_page BOOLEAN NOT NULL DEFAULT FALSE,
                sensitive_warning BOOLEAN NOT NULL DEFAULT FALSE,
                stats_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                owner_id BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_events (
                id BIGSERIAL PRIMARY KEY,
                link_id BIGINT NOT NULL,
                short_code TEXT NOT NULL,
                timestamp BIGINT NOT NULL,
                ip_address VARCHAR(45) NOT NULL,
                country VARCHAR(100) NOT NULL DEFAULT 'Unknown',
                region VARCHAR(100) NOT NULL DEFAULT '',
                city VARCHAR(100) NOT NULL DEFAULT '',
                browser TEXT NOT NULL DEFAULT '',
                os TEXT NOT NULL DEFAULT '',
                device_type VARCHAR(50) NOT NULL,
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
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT,
                action VARCHAR(50) NOT NULL,
                entity_id VARCHAR(50) NOT NULL DEFAULT '',
                details TEXT NOT NULL DEFAULT '',
                ip_address VARCHAR(45) NOT NULL DEFAULT '',
                timestamp BIGINT NOT NULL
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
            WHERE short_code = $1
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn insert_link(&self, record: &ShortLinkRecord) -> StorageResult<ShortLinkRecord> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO links (
                short_code, target_url, created_at, expires_at, start_at, end_at,
                is_enabled, is_locked, allowed_ips, splash_page, sensitive_warning,
                stats_enabled, owner_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (short_code) DO NOTHING
            RETURNING id
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
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        let Some(id) = id else {
            return Err(StorageError::Conflict);
        };

        let mut stored = record.clone();
        stored.id = id;
        Ok(stored)
    }

    async fn insert_access(&self, record: &EnrichedAccessRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO access_events (
                link_id, short_code, timestamp, ip_address, country, region, city,
                browser, os, device_type, user_agent, referrer
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
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
            WHERE short_code = $1
            ORDER BY timestamp DESC, id DESC
            LIMIT $2
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
            VALUES ($1, $2, $3, $4, $5, $6)
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
