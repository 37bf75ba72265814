//! Client address extraction from forwarding headers
//!
//! Which headers are believed depends on [`TrustedProxyMode`]; when the
//! trusted header is absent or unparseable the socket peer address is used.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::debug;

use crate::config::TrustedProxyMode;

pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    mode: TrustedProxyMode,
) -> IpAddr {
    match mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            debug!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap) -> Option<IpAddr> {
    extract_from_forwarded(headers).or_else(|| extract_from_x_forwarded_for(headers))
}

/// First `for=` node of an RFC 7239 `Forwarded` header
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.eq_ignore_ascii_case("for").then_some(value)
        })
        .find_map(parse_forwarded_node)
}

/// `192.0.2.60`, `"192.0.2.60:4711"`, `"[2001:db8::1]:4711"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        let (host, _) = rest.split_once(']')?;
        return host.parse().ok();
    }

    if let Ok(ip) = value.parse() {
        return Some(ip);
    }

    // IPv4 with port
    let (host, _) = value.rsplit_once(':')?;
    host.parse().ok()
}

/// Rightmost parseable entry, i.e. the address the nearest proxy saw
fn extract_from_x_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    xff.split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn socket() -> IpAddr {
        "192.168.1.1".parse().unwrap()
    }

    #[test]
    fn test_none_mode_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.2"));

        assert_eq!(
            extract_client_ip(&headers, socket(), TrustedProxyMode::None),
            socket()
        );
    }

    #[test]
    fn test_cloudflare_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(
            extract_client_ip(&headers, socket(), TrustedProxyMode::Cloudflare),
            "203.0.113.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            extract_client_ip(&HeaderMap::new(), socket(), TrustedProxyMode::Cloudflare),
            socket()
        );
    }

    #[test]
    fn test_x_forwarded_for_rightmost() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );

        assert_eq!(
            extract_client_ip(&headers, socket(), TrustedProxyMode::Standard),
            "198.51.100.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_forwarded_preferred_over_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=\"[2001:db8:cafe::17]:4711\";proto=https"),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));

        assert_eq!(
            extract_client_ip(&headers, socket(), TrustedProxyMode::Standard),
            "2001:db8:cafe::17".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_forwarded_node_forms() {
        assert_eq!(
            parse_forwarded_node("192.0.2.60"),
            Some("192.0.2.60".parse().unwrap())
        );
        assert_eq!(
            parse_forwarded_node("\"192.0.2.60:4711\""),
            Some("192.0.2.60".parse().unwrap())
        );
        assert_eq!(parse_forwarded_node("unknown"), None);
    }
}
