//! GeoIP resolution using a MaxMind GeoLite2/GeoIP2 City MMDB
//!
//! The reader is memory-mapped and shared behind an `Arc`, so a resolver can
//! be cloned freely and queried from any number of tasks without locking.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::analytics::models::GeoFacts;

/// Best-effort client address → location resolver
#[derive(Clone, Default)]
pub struct GeoResolver {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoResolver {
    /// Open the City database at `city_path`. With `None` every lookup
    /// resolves to empty facts.
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self { city_reader })
    }

    /// Resolver without a database.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.city_reader.is_some()
    }

    /// Resolve a textual client address.
    ///
    /// Never fails: unknown, private and malformed addresses all yield
    /// empty facts.
    pub fn resolve(&self, address: &str) -> GeoFacts {
        let Some(ip) = parse_address(address) else {
            return GeoFacts::default();
        };

        if !is_global(ip) {
            return GeoFacts::default();
        }

        self.lookup(ip)
    }

    /// Lookup an already-parsed address
    pub fn lookup(&self, ip: IpAddr) -> GeoFacts {
        let mut facts = GeoFacts::default();

        let Some(ref reader) = self.city_reader else {
            return facts;
        };

        if let Ok(result) = reader.lookup(ip) {
            if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                extract_from_city(&city, &mut facts);
            } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
                // Country-only databases still carry the country block
                extract_from_country(&country, &mut facts);
            }
        }

        facts
    }
}

fn extract_from_city(city: &geoip2::City, facts: &mut GeoFacts) {
    facts.country = city
        .country
        .iso_code
        .or(city.country.names.english)
        .unwrap_or_default()
        .to_string();

    if let Some(subdivision) = city.subdivisions.first() {
        facts.region = subdivision.names.english.unwrap_or_default().to_string();
    }

    facts.city = city.city.names.english.unwrap_or_default().to_string();
}

fn extract_from_country(country: &geoip2::Country, facts: &mut GeoFacts) {
    facts.country = country
        .country
        .iso_code
        .or(country.country.names.english)
        .unwrap_or_default()
        .to_string();
}

/// Accepts `1.2.3.4`, `1.2.3.4:5678`, `::1`, `[::1]:5678` and IPv4-mapped IPv6.
fn parse_address(address: &str) -> Option<IpAddr> {
    let address = address.trim();
    let ip = address
        .parse::<IpAddr>()
        .ok()
        .or_else(|| address.parse::<SocketAddr>().ok().map(|s| s.ip()))?;

    Some(match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    })
}

fn is_global(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique-local, fe80::/10 link-local
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_creation_invalid_path() {
        let result = GeoResolver::new(Some("/nonexistent/path.mmdb"));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolver_without_database() {
        let resolver = GeoResolver::new(None).unwrap();
        assert!(!resolver.is_enabled());
        assert!(resolver.resolve("8.8.8.8").is_empty());
    }

    #[test]
    fn test_malformed_addresses_resolve_empty() {
        let resolver = GeoResolver::disabled();
        for address in ["", "unknown", "not-an-ip", "1.2.3.4, 5.6.7.8", "999.1.1.1"] {
            assert!(resolver.resolve(address).is_empty(), "{address:?}");
        }
    }

    #[test]
    fn test_parse_address_forms() {
        let v4: IpAddr = "203.0.113.7".parse().unwrap();
        assert_eq!(parse_address("203.0.113.7"), Some(v4));
        assert_eq!(parse_address(" 203.0.113.7:8080 "), Some(v4));
        assert_eq!(parse_address("::ffff:203.0.113.7"), Some(v4));
        assert_eq!(
            parse_address("[2001:4860:4860::8888]:443"),
            Some("2001:4860:4860::8888".parse().unwrap())
        );
        assert_eq!(parse_address("example.com"), None);
    }

    #[test]
    fn test_non_global_addresses() {
        for address in ["10.1.2.3", "192.168.0.1", "127.0.0.1", "169.254.1.1", "::1", "fd00::1", "fe80::1"] {
            let ip = address.parse().unwrap();
            assert!(!is_global(ip), "{address} should not be global");
        }
        assert!(is_global("8.8.8.8".parse().unwrap()));
        assert!(is_global("2001:4860:4860::8888".parse().unwrap()));
    }
}
