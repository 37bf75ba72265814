use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{AuditEntry, EnrichedAccessRecord};
use crate::storage::Storage;

/// Terminal write step of a pipeline
#[async_trait]
pub trait Sink<T>: Send + Sync {
    async fn persist(&self, record: T) -> Result<()>;
}

/// Writes pipeline output to the durable store
#[derive(Clone)]
pub struct StorageSink {
    storage: Arc<dyn Storage>,
}

impl StorageSink {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Sink<EnrichedAccessRecord> for StorageSink {
    async fn persist(&self, record: EnrichedAccessRecord) -> Result<()> {
        self.storage.insert_access(&record).await
    }
}

#[async_trait]
impl Sink<AuditEntry> for StorageSink {
    async fn persist(&self, entry: AuditEntry) -> Result<()> {
        self.storage.insert_audit(&entry).await
    }
}
