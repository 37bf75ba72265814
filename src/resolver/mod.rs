//! Cache-aside short code resolution
//!
//! Lookups go to the fast store first (`url:<code>`), then to the durable
//! store, writing the record back with a fixed TTL. Fast store failures are
//! logged and treated as misses; only durable store failures reach the
//! caller.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{cache_key, FastStore};
use crate::models::{AccessEvent, ShortLinkRecord};
use crate::storage::Storage;
use crate::telemetry::AccessPipeline;

/// TTL for entries written back by the resolver
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("durable store lookup failed: {0}")]
    Store(#[source] anyhow::Error),
}

/// Verdict for a found record, first matching rule wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Disabled,
    Expired,
    Restricted,
    /// Show a warning/confirmation view instead of redirecting
    Interstitial { sensitive_warning: bool },
    Active,
}

impl Validity {
    /// Only outcomes that reach the visitor are recorded as accesses
    pub fn qualifies_for_telemetry(&self) -> bool {
        matches!(self, Validity::Active | Validity::Interstitial { .. })
    }
}

/// Evaluate the validity rules in order: enabled, expiry, allow-list,
/// interstitial flags.
pub fn evaluate(record: &ShortLinkRecord, client_ip: &str, now: i64) -> Validity {
    if !record.is_enabled {
        return Validity::Disabled;
    }

    if record.is_expired_at(now) {
        return Validity::Expired;
    }

    if !record.allows_address(client_ip) {
        return Validity::Restricted;
    }

    if record.needs_interstitial() {
        return Validity::Interstitial {
            sensitive_warning: record.sensitive_warning,
        };
    }

    Validity::Active
}

/// A record found by [`Resolver::lookup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub record: ShortLinkRecord,
    pub cache_hit: bool,
}

/// Per-request inputs for [`Resolver::resolve`]
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub short_code: String,
    pub client_ip: String,
    pub user_agent: String,
    pub referrer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NotFound,
    Found {
        record: ShortLinkRecord,
        validity: Validity,
        cache_hit: bool,
    },
}

pub struct Resolver {
    cache: Arc<dyn FastStore>,
    storage: Arc<dyn Storage>,
    access: Arc<AccessPipeline>,
    cache_ttl: Duration,
}

impl Resolver {
    pub fn new(
        cache: Arc<dyn FastStore>,
        storage: Arc<dyn Storage>,
        access: Arc<AccessPipeline>,
    ) -> Self {
        Self {
            cache,
            storage,
            access,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Find the record for `short_code`, fast store first.
    pub async fn lookup(&self, short_code: &str) -> Result<Option<Lookup>, ResolveError> {
        let key = cache_key(short_code);

        if let Some(record) = self.read_cache(&key).await {
            return Ok(Some(Lookup {
                record,
                cache_hit: true,
            }));
        }

        let Some(record) = self
            .storage
            .find_by_code(short_code)
            .await
            .map_err(ResolveError::Store)?
        else {
            return Ok(None);
        };

        self.write_cache(&key, &record).await;

        Ok(Some(Lookup {
            record,
            cache_hit: false,
        }))
    }

    /// Look up, evaluate validity and, for qualifying outcomes on links with
    /// telemetry enabled, hand an access event to the access pipeline.
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<Resolution, ResolveError> {
        let Some(Lookup { record, cache_hit }) = self.lookup(&request.short_code).await? else {
            return Ok(Resolution::NotFound);
        };

        let now = chrono::Utc::now().timestamp();
        let validity = evaluate(&record, &request.client_ip, now);

        if validity.qualifies_for_telemetry() && record.stats_enabled {
            self.access.submit(AccessEvent {
                link_id: record.id,
                short_code: record.short_code.clone(),
                timestamp: now,
                client_ip: request.client_ip.clone(),
                user_agent: request.user_agent.clone(),
                referrer: request.referrer.clone(),
            });
        }

        Ok(Resolution::Found {
            record,
            validity,
            cache_hit,
        })
    }

    async fn read_cache(&self, key: &str) -> Option<ShortLinkRecord> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "fast store read failed, falling back to durable store");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    async fn write_cache(&self, key: &str, record: &ShortLinkRecord) {
        let bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "failed to encode record for fast store");
                return;
            }
        };

        match self.cache.set(key, bytes, self.cache_ttl).await {
            Ok(()) => debug!(key, "cached record"),
            Err(e) => warn!(key, error = %e, "fast store write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn record() -> ShortLinkRecord {
        ShortLinkRecord::new("ABC123", "https://example.com")
    }

    #[test]
    fn test_active_by_default() {
        assert_eq!(evaluate(&record(), "203.0.113.5", NOW), Validity::Active);
    }

    #[test]
    fn test_disabled_wins_over_everything() {
        let mut r = record();
        r.is_enabled = false;
        r.expires_at = Some(NOW - 10);
        r.allowed_ips = "10.0.0.1".to_string();
        r.splash_page = true;

        assert_eq!(evaluate(&r, "203.0.113.5", NOW), Validity::Disabled);
    }

    #[test]
    fn test_expired_before_restriction() {
        let mut r = record();
        r.expires_at = Some(NOW - 1);
        r.allowed_ips = "10.0.0.1".to_string();

        assert_eq!(evaluate(&r, "203.0.113.5", NOW), Validity::Expired);
    }

    #[test]
    fn test_future_expiry_is_active() {
        let mut r = record();
        r.expires_at = Some(NOW + 60);
        assert_eq!(evaluate(&r, "203.0.113.5", NOW), Validity::Active);
    }

    #[test]
    fn test_restricted_before_interstitial() {
        let mut r = record();
        r.allowed_ips = "10.0.0.1, 10.0.0.2".to_string();
        r.sensitive_warning = true;

        assert_eq!(evaluate(&r, "203.0.113.5", NOW), Validity::Restricted);
        assert_eq!(
            evaluate(&r, "10.0.0.2", NOW),
            Validity::Interstitial {
                sensitive_warning: true
            }
        );
    }

    #[test]
    fn test_splash_page_interstitial() {
        let mut r = record();
        r.splash_page = true;

        assert_eq!(
            evaluate(&r, "203.0.113.5", NOW),
            Validity::Interstitial {
                sensitive_warning: false
            }
        );
    }

    #[test]
    fn test_telemetry_qualification() {
        assert!(Validity::Active.qualifies_for_telemetry());
        assert!(Validity::Interstitial {
            sensitive_warning: true
        }
        .qualifies_for_telemetry());
        assert!(!Validity::Disabled.qualifies_for_telemetry());
        assert!(!Validity::Expired.qualifies_for_telemetry());
        assert!(!Validity::Restricted.qualifies_for_telemetry());
    }
}
