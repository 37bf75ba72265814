//! Asynchronous telemetry pipelines
//!
//! Two instances share [`TelemetryPipeline`]: access events (enriched with
//! user-agent and geolocation data before persisting) and audit entries
//! (persisted as received). Producers never wait; when a queue is full the
//! event is dropped with a warning.

pub mod enrich;
pub mod pipeline;
pub mod sink;

pub use enrich::{classify_device, mask_ip, parse_user_agent, AccessEnricher, ParsedUserAgent};
pub use pipeline::{Enrich, Passthrough, PipelineStats, TelemetryPipeline};
pub use sink::{Sink, StorageSink};

use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::geo::GeoDirectory;
use crate::models::{AccessEvent, AuditEntry};
use crate::storage::Storage;

/// Access pipeline: enrich, then persist
pub type AccessPipeline = TelemetryPipeline<AccessEvent, AccessEnricher>;

/// Audit pipeline: persist as received
pub type AuditPipeline = TelemetryPipeline<AuditEntry, Passthrough>;

impl TelemetryPipeline<AccessEvent, AccessEnricher> {
    pub fn access(capacity: usize, geo: Arc<GeoDirectory>, storage: Arc<dyn Storage>) -> Self {
        Self::new(
            "access",
            capacity,
            AccessEnricher::new(geo),
            Arc::new(StorageSink::new(storage)),
        )
    }
}

impl TelemetryPipeline<AuditEntry, Passthrough> {
    pub fn audit(capacity: usize, storage: Arc<dyn Storage>) -> Self {
        Self::new(
            "audit",
            capacity,
            Passthrough,
            Arc::new(StorageSink::new(storage)),
        )
    }

    /// Record a state-changing action. `details` is stored as JSON text.
    pub fn log_action<D: Serialize>(
        &self,
        user_id: Option<i64>,
        action: &str,
        entity_id: &str,
        details: &D,
        ip_address: &str,
    ) -> bool {
        let details = serde_json::to_string(details).unwrap_or_else(|e| {
            warn!(action, error = %e, "Failed to serialize audit details");
            String::new()
        });

        self.submit(AuditEntry {
            user_id,
            action: action.to_string(),
            entity_id: entity_id.to_string(),
            details,
            ip_address: ip_address.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        })
    }
}
