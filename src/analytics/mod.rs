//! Visitor analytics
//!
//! Builds the per-request facts that the rest of the pipeline records:
//! client address extraction, best-effort geolocation using a MaxMind
//! GeoLite2 City MMDB, and the `VisitorEvent` model itself.

pub mod geoip;
pub mod ip_extractor;
pub mod models;

pub use geoip::GeoResolver;
pub use ip_extractor::extract_client_address;
pub use models::{GeoFacts, VisitorEvent};
