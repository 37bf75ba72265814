use crate::models::{AuditEntry, DeviceClass, EnrichedAccessRecord, ShortLinkRecord};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Column order shared by the `recent_access` queries
pub(crate) type AccessRow = (
    i64,
    String,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

pub(crate) fn access_from_row(row: AccessRow) -> EnrichedAccessRecord {
    let (
        link_id,
        short_code,
        timestamp,
        ip_address,
        country,
        region,
        city,
        browser,
        os,
        device_type,
        user_agent,
        referrer,
    ) = row;

    EnrichedAccessRecord {
        link_id,
        short_code,
        timestamp,
        ip_address,
        country,
        region,
        city,
        browser,
        os,
        device_type: DeviceClass::from_label(&device_type),
        user_agent,
        referrer,
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable store port.
///
/// The durable store is the sole owner of link records; everything else in
/// the crate holds copies.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Get a link by short code
    async fn find_by_code(&self, short_code: &str) -> Result<Option<ShortLinkRecord>>;

    /// Insert a link; the returned record carries the assigned id
    async fn insert_link(&self, record: &ShortLinkRecord) -> StorageResult<ShortLinkRecord>;

    /// Append one enriched access record
    async fn insert_access(&self, record: &EnrichedAccessRecord) -> Result<()>;

    /// Most recent access records for a short code, newest first
    async fn recent_access(
        &self,
        short_code: &str,
        limit: i64,
    ) -> Result<Vec<EnrichedAccessRecord>>;

    /// Append one audit entry
    async fn insert_audit(&self, entry: &AuditEntry) -> Result<()>;
}
