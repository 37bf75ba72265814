use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered short code and everything the resolver needs to decide what
/// to do with a request for it.
///
/// Records are owned by the durable store. The fast store only ever holds a
/// serialized copy with a bounded TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ShortLinkRecord {
    pub id: i64,
    pub short_code: String,
    pub target_url: String,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
    pub is_enabled: bool,
    pub is_locked: bool,
    /// Comma separated client addresses; empty means unrestricted
    #[serde(default)]
    pub allowed_ips: String,
    pub splash_page: bool,
    pub sensitive_warning: bool,
    pub stats_enabled: bool,
    /// Anonymous links have no owner
    pub owner_id: Option<i64>,
}

impl ShortLinkRecord {
    /// A new enabled, unrestricted link with telemetry on.
    ///
    /// `id` is assigned by the durable store on insert.
    pub fn new(short_code: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            id: 0,
            short_code: short_code.into(),
            target_url: target_url.into(),
            created_at: chrono::Utc::now().timestamp(),
            expires_at: None,
            start_at: None,
            end_at: None,
            is_enabled: true,
            is_locked: false,
            allowed_ips: String::new(),
            splash_page: false,
            sensitive_warning: false,
            stats_enabled: true,
            owner_id: None,
        }
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Exact match against the allow-list after trimming each entry.
    /// An empty allow-list admits every address.
    pub fn allows_address(&self, client_ip: &str) -> bool {
        if self.allowed_ips.is_empty() {
            return true;
        }

        self.allowed_ips
            .split(',')
            .any(|entry| entry.trim() == client_ip)
    }

    pub fn needs_interstitial(&self) -> bool {
        self.splash_page || self.sensitive_warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_trims_entries() {
        let mut record = ShortLinkRecord::new("abc", "https://example.com");
        record.allowed_ips = " 10.0.0.1 , 192.168.1.5,172.16.0.1 ".to_string();

        assert!(record.allows_address("192.168.1.5"));
        assert!(record.allows_address("10.0.0.1"));
        assert!(record.allows_address("172.16.0.1"));
        assert!(!record.allows_address("192.168.1.6"));
    }

    #[test]
    fn test_allow_list_has_no_subnet_matching() {
        let mut record = ShortLinkRecord::new("abc", "https://example.com");
        record.allowed_ips = "10.0.0.0/8".to_string();

        assert!(!record.allows_address("10.1.2.3"));
    }

    #[test]
    fn test_empty_allow_list_is_unrestricted() {
        let record = ShortLinkRecord::new("abc", "https://example.com");
        assert!(record.allows_address("203.0.113.9"));
    }

    #[test]
    fn test_expiry_boundary() {
        let mut record = ShortLinkRecord::new("abc", "https://example.com");
        assert!(!record.is_expired_at(i64::MAX));

        record.expires_at = Some(1_000);
        assert!(!record.is_expired_at(1_000));
        assert!(record.is_expired_at(1_001));
    }

    #[test]
    fn test_cache_payload_round_trips_optional_owner() {
        let mut record = ShortLinkRecord::new("abc", "https://example.com");
        record.owner_id = Some(7);

        let json = serde_json::to_vec(&record).unwrap();
        let decoded: ShortLinkRecord = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded.owner_id, Some(7));

        record.owner_id = None;
        let json = serde_json::to_vec(&record).unwrap();
        let decoded: ShortLinkRecord = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded.owner_id, None);
    }
}
