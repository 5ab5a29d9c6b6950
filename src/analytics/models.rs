//! Data models for visitor analytics

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Geographic facts resolved from a client address.
///
/// Every field is empty when the address could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoFacts {
    pub city: String,
    pub region: String,
    pub country: String,
}

impl GeoFacts {
    pub fn is_empty(&self) -> bool {
        self.city.is_empty() && self.region.is_empty() && self.country.is_empty()
    }
}

/// Immutable record of one inbound request's observable facts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorEvent {
    /// Capture time, RFC 3339 UTC with millisecond precision
    pub timestamp: String,

    /// Client address as extracted (may be a proxy-forwarded value)
    pub client_address: String,

    pub city: String,
    pub region: String,
    pub country: String,

    /// HTTP verb
    pub method: String,

    /// Request path including the query string
    pub path: String,

    /// `unknown` when the header is absent
    pub user_agent: String,

    /// Set when the honeypot query parameter is present
    pub bot_trap: bool,
}

/// Placeholder recorded when the request carries no User-Agent header
pub const UNKNOWN_USER_AGENT: &str = "unknown";

impl VisitorEvent {
    /// Number of fields in the persisted row
    pub const FIELD_COUNT: usize = 9;

    /// Build an event captured at `at`.
    pub fn new(
        at: DateTime<Utc>,
        client_address: impl Into<String>,
        geo: GeoFacts,
        method: impl Into<String>,
        path: impl Into<String>,
        user_agent: Option<&str>,
        bot_trap: bool,
    ) -> Self {
        Self {
            timestamp: format_timestamp(at),
            client_address: client_address.into(),
            city: geo.city,
            region: geo.region,
            country: geo.country,
            method: method.into(),
            path: path.into(),
            user_agent: user_agent.unwrap_or(UNKNOWN_USER_AGENT).to_string(),
            bot_trap,
        }
    }

    /// Fields in persisted order.
    pub fn fields(&self) -> [&str; Self::FIELD_COUNT] {
        [
            self.timestamp.as_str(),
            self.client_address.as_str(),
            self.city.as_str(),
            self.region.as_str(),
            self.country.as_str(),
            self.method.as_str(),
            self.path.as_str(),
            self.user_agent.as_str(),
            if self.bot_trap { "true" } else { "false" },
        ]
    }

    /// Rebuild an event from decoded row fields. Returns `None` when the
    /// field count is wrong or the bot trap flag is not `true`/`false`.
    pub fn from_fields(fields: Vec<String>) -> Option<Self> {
        let [timestamp, client_address, city, region, country, method, path, user_agent, bot_trap]: [String; Self::FIELD_COUNT] =
            fields.try_into().ok()?;

        let bot_trap = match bot_trap.as_str() {
            "true" => true,
            "false" => false,
            _ => return None,
        };

        Some(Self {
            timestamp,
            client_address,
            city,
            region,
            country,
            method,
            path,
            user_agent,
            bot_trap,
        })
    }
}

/// RFC 3339 UTC with millisecond precision, e.g. `2025-01-01T12:00:00.000Z`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
