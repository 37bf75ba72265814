//! Access event enrichment: user agent, geolocation, address masking

use std::sync::Arc;
use woothee::parser::Parser;

use super::pipeline::Enrich;
use crate::geo::GeoDirectory;
use crate::models::{AccessEvent, DeviceClass, EnrichedAccessRecord};

const UNKNOWN: &str = "UNKNOWN";

/// Fields extracted from a raw user-agent string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub os_name: Option<String>,
    /// woothee category: "pc", "smartphone", "mobilephone", "crawler", ...
    pub category: String,
}

impl ParsedUserAgent {
    /// "Name Version", or just the name when no version was found
    pub fn browser(&self) -> String {
        match (&self.browser_name, &self.browser_version) {
            (Some(name), Some(version)) => format!("{name} {version}"),
            (Some(name), None) => name.clone(),
            _ => String::new(),
        }
    }
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == UNKNOWN {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn parse_user_agent(user_agent: &str) -> ParsedUserAgent {
    let Some(result) = Parser::new().parse(user_agent) else {
        return ParsedUserAgent {
            category: UNKNOWN.to_string(),
            ..Default::default()
        };
    };

    ParsedUserAgent {
        browser_name: known(&result.name.to_string()),
        browser_version: known(&result.version.to_string()),
        os_name: known(&result.os.to_string()),
        category: result.category.to_string(),
    }
}

/// woothee's smartphone and mobilephone categories are Mobile, crawler is
/// Bot, and every other category is Desktop.
pub fn classify_device(parsed: &ParsedUserAgent) -> DeviceClass {
    match parsed.category.as_str() {
        "smartphone" | "mobilephone" => DeviceClass::Mobile,
        "crawler" => DeviceClass::Bot,
        _ => DeviceClass::Desktop,
    }
}

/// Privacy mask for stored client addresses.
///
/// Anything containing a colon is treated as IPv6 and replaced by a label;
/// otherwise the last dotted segment becomes "0". Strings with neither
/// separator are returned unchanged.
pub fn mask_ip(ip: &str) -> String {
    if ip.contains(':') {
        return "IPv6 (Masked)".to_string();
    }

    match ip.rfind('.') {
        Some(idx) => format!("{}.0", &ip[..idx]),
        None => ip.to_string(),
    }
}

/// Enrichment step of the access pipeline
pub struct AccessEnricher {
    geo: Arc<GeoDirectory>,
}

impl AccessEnricher {
    pub fn new(geo: Arc<GeoDirectory>) -> Self {
        Self { geo }
    }
}

impl Enrich<AccessEvent> for AccessEnricher {
    type Output = EnrichedAccessRecord;

    fn enrich(&self, event: AccessEvent) -> EnrichedAccessRecord {
        let parsed = parse_user_agent(&event.user_agent);
        let device_type = classify_device(&parsed);
        let location = self.geo.lookup(&event.client_ip);

        EnrichedAccessRecord {
            link_id: event.link_id,
            short_code: event.short_code,
            timestamp: event.timestamp,
            ip_address: mask_ip(&event.client_ip),
            country: location.country,
            region: location.region,
            city: location.city,
            browser: parsed.browser(),
            os: parsed.os_name.unwrap_or_default(),
            device_type,
            user_agent: event.user_agent,
            referrer: event.referrer,
        }
    }
}
