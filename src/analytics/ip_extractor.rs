//! Client address extraction from HTTP headers with trust validation
//!
//! This module implements client address extraction that:
//! - Prefers forwarding headers (X-Forwarded-For, then Forwarded) when present
//! - Skips hops that belong to trusted proxies (by count or CIDR)
//! - Supports vendor-specific headers (CF-Connecting-IP)
//! - Falls back to the socket peer address

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{ClientIpConfig, TrustedProxyMode};

/// Address recorded when neither a header nor a peer address is available
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Extract the client address for a request.
///
/// The result is textual because a forwarding header may carry a value that
/// is not an IP address at all; such values are passed through so they are
/// still recorded and rate limited, and simply resolve to no location.
pub fn extract_client_address(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    config: &ClientIpConfig,
) -> String {
    let fallback = || {
        peer.map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    };

    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => match extract_cloudflare_ip(headers) {
            Some(ip) => ip.to_string(),
            None => {
                warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
                fallback()
            }
        },
        TrustedProxyMode::Standard => {
            // Proxies append to X-Forwarded-For; Forwarded is consulted only
            // without it, and both go through the same trust walk.
            match extract_from_x_forwarded_for(headers, config)
                .or_else(|| extract_from_forwarded(headers, config))
            {
                Some(ForwardedFor::Parsed(ip)) => ip.to_string(),
                Some(ForwardedFor::Raw(raw)) => raw,
                None => fallback(),
            }
        }
        TrustedProxyMode::None => fallback(),
    }
}

enum ForwardedFor {
    Parsed(IpAddr),
    /// Header present but nothing in it parsed as an address
    Raw(String),
}

/// Extract IP from Cloudflare-specific header
fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Parse the RFC 7239 Forwarded header with right-to-left trust validation
fn extract_from_forwarded(headers: &HeaderMap, config: &ClientIpConfig) -> Option<ForwardedFor> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    // Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43, for="[2001:db8::1]:4711"
    let ips: Vec<IpAddr> = forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (name, value) = param.trim().split_once('=')?;
                if !name.trim().eq_ignore_ascii_case("for") {
                    return None;
                }
                parse_node(value.trim().trim_matches('"'))
            })
        })
        .collect();

    select_client(&ips, config).map(ForwardedFor::Parsed)
}

/// Parse a Forwarded node: `1.2.3.4`, `1.2.3.4:80`, `[::1]` or `[::1]:80`
fn parse_node(node: &str) -> Option<IpAddr> {
    if let Some(rest) = node.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    node.rsplit_once(':')
        .and_then(|(host, _port)| host.parse::<std::net::Ipv4Addr>().ok())
        .map(IpAddr::V4)
}

/// Parse X-Forwarded-For with right-to-left trust validation
fn extract_from_x_forwarded_for(headers: &HeaderMap, config: &ClientIpConfig) -> Option<ForwardedFor> {
    let raw = headers.get("x-forwarded-for")?;
    let xff = match raw.to_str() {
        Ok(s) => s.trim(),
        Err(_) => return Some(ForwardedFor::Raw(String::from_utf8_lossy(raw.as_bytes()).trim().to_string())),
    };

    if xff.is_empty() {
        return None;
    }

    let ips: Vec<IpAddr> = xff.split(',').filter_map(|s| parse_node(s.trim())).collect();

    if ips.is_empty() {
        return Some(ForwardedFor::Raw(xff.to_string()));
    }

    select_client(&ips, config).map(ForwardedFor::Parsed)
}

/// Pick the client from a hop list ordered client-first, skipping trusted
/// proxies from the right.
fn select_client(ips: &[IpAddr], config: &ClientIpConfig) -> Option<IpAddr> {
    let leftmost = *ips.first()?;

    // If num_trusted_proxies is specified, skip that many from the right
    if let Some(num_trusted) = config.num_trusted_proxies {
        // Not enough hops in the chain, take the leftmost (least trusted)
        return Some(
            ips.len()
                .checked_sub(num_trusted.saturating_add(1))
                .map_or(leftmost, |idx| ips[idx]),
        );
    }

    // Otherwise the first address from the right that is not a trusted proxy
    if !config.trusted_proxies.is_empty() {
        return Some(
            ips.iter()
                .rev()
                .find(|ip| !config.trusted_proxies.iter().any(|net| net.contains(*ip)))
                .copied()
                .unwrap_or(leftmost),
        );
    }

    // No trust configuration, take the rightmost address
    ips.last().copied()
}
