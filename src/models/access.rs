//! Access telemetry models

use serde::{Deserialize, Serialize};
use std::fmt;

/// One qualifying resolution, as captured on the request path.
///
/// Nothing here is parsed or looked up yet; that happens on the access
/// pipeline's consumer task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub link_id: i64,
    pub short_code: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    pub client_ip: String,
    pub user_agent: String,
    pub referrer: String,
}

/// Device classification derived from the user agent.
///
/// Tablets are not distinguished: a tablet exposing a mobile signature is
/// `Mobile`, anything else falls through to `Desktop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Mobile,
    Bot,
    Desktop,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Mobile => "Mobile",
            DeviceClass::Bot => "Bot",
            DeviceClass::Desktop => "Desktop",
        }
    }

    /// Inverse of [`as_str`](Self::as_str); unrecognized labels read as Desktop
    pub fn from_label(label: &str) -> Self {
        match label {
            "Mobile" => DeviceClass::Mobile,
            "Bot" => DeviceClass::Bot,
            _ => DeviceClass::Desktop,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access event after enrichment, ready for the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedAccessRecord {
    pub link_id: i64,
    pub short_code: String,
    pub timestamp: i64,
    /// Privacy-masked client address
    pub ip_address: String,
    pub country: String,
    pub region: String,
    pub city: String,
    /// Browser name and version, e.g. "Chrome 120.0.0.0"
    pub browser: String,
    pub os: String,
    pub device_type: DeviceClass,
    pub user_agent: String,
    pub referrer: String,
}
