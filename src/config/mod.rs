use anyhow::{bail, Context};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub event_log: EventLogConfig,
    pub rate_limit: RateLimitConfig,
    pub notify: NotifyConfig,
    pub geoip: GeoIpConfig,
    pub client_ip: ClientIpConfig,
    /// Honeypot query parameter; its presence marks the request as a bot
    pub bot_trap_param: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15,
            max_requests: 20,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook endpoint. `None` disables notifications entirely.
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub queue_capacity: usize,
    pub workers: usize,
    pub timeout_secs: u64,
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            queue_capacity: 1024,
            workers: 4,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Path to a MaxMind GeoLite2-City / GeoIP2-City .mmdb file
    #[serde(default)]
    pub city_db_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Ignore forwarding headers, use the socket peer address
    None,
    /// Forwarded / X-Forwarded-For with optional trust configuration
    Standard,
    /// CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    #[serde(default)]
    pub num_trusted_proxies: Option<usize>,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::Standard,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_var(&var, "PORT", 3000u16)?;

        let log_path = var("VISITOR_LOG_PATH").unwrap_or_else(|| "visitors.csv".to_string());

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window_secs: parse_secs(&var, "RATE_LIMIT_WINDOW_SECS", rate_defaults.window_secs)?,
            max_requests: parse_nonzero(
                &var,
                "RATE_LIMIT_MAX_REQUESTS",
                rate_defaults.max_requests,
            )?,
            sweep_interval_secs: parse_secs(
                &var,
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                rate_defaults.sweep_interval_secs,
            )?,
        };

        let notify_defaults = NotifyConfig::default();
        let notify = NotifyConfig {
            webhook_url: var("NOTIFY_WEBHOOK_URL").or_else(|| var("DISCORD_WEBHOOK")),
            queue_capacity: parse_nonzero(
                &var,
                "NOTIFY_QUEUE_CAPACITY",
                notify_defaults.queue_capacity,
            )?,
            workers: parse_nonzero(&var, "NOTIFY_WORKERS", notify_defaults.workers)?,
            timeout_secs: parse_secs(&var, "NOTIFY_TIMEOUT_SECS", notify_defaults.timeout_secs)?,
        };

        let trusted_proxy_mode = match var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|| "standard".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'standard'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::Standard
            }
        };

        let trusted_proxies = match var("TRUSTED_PROXIES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<IpNet>()
                        .with_context(|| format!("TRUSTED_PROXIES entry '{s}' is not a CIDR"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let num_trusted_proxies = match var("NUM_TRUSTED_PROXIES") {
            Some(v) => Some(
                v.trim()
                    .parse::<usize>()
                    .with_context(|| format!("NUM_TRUSTED_PROXIES must be a number, got '{v}'"))?,
            ),
            None => None,
        };

        let bot_trap_param = var("BOT_TRAP_PARAM").unwrap_or_else(|| "_trap".to_string());

        Ok(Config {
            server: ServerConfig { host, port },
            event_log: EventLogConfig { path: log_path },
            rate_limit,
            notify,
            geoip: GeoIpConfig {
                city_db_path: var("GEOIP_CITY_DB"),
            },
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
            bot_trap_param,
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn parse_nonzero<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_var(var, key, default)?;
    if value == T::default() {
        bail!("{key} must be greater than zero");
    }
    Ok(value)
}

/// Upper bound for any duration setting, one year
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

fn parse_secs<F>(var: &F, key: &str, default: u64) -> anyhow::Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_nonzero(var, key, default)?;
    if value > MAX_DURATION_SECS {
        bail!("{key} must be at most {MAX_DURATION_SECS} seconds");
    }
    Ok(value)
}

/// Convenience for tests and tooling: build a config from literal pairs.
pub fn config_from_pairs(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_vars(|key| map.get(key).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = config_from_pairs(&[]).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.event_log.path, "visitors.csv");
        assert_eq!(config.rate_limit.window_secs, 15);
        assert_eq!(config.rate_limit.max_requests, 20);
        assert!(config.notify.webhook_url.is_none());
        assert_eq!(config.client_ip.trusted_proxy_mode, TrustedProxyMode::Standard);
        assert_eq!(config.bot_trap_param, "_trap");
    }

    #[test]
    fn test_discord_webhook_alias() {
        let config =
            config_from_pairs(&[("DISCORD_WEBHOOK", "https://discord.test/api/webhooks/1")])
                .unwrap();
        assert_eq!(
            config.notify.webhook_url.as_deref(),
            Some("https://discord.test/api/webhooks/1")
        );

        // The generic name wins when both are set
        let config = config_from_pairs(&[
            ("DISCORD_WEBHOOK", "https://discord.test/a"),
            ("NOTIFY_WEBHOOK_URL", "https://hooks.test/b"),
        ])
        .unwrap();
        assert_eq!(config.notify.webhook_url.as_deref(), Some("https://hooks.test/b"));
    }

    #[test]
    fn test_empty_webhook_disables_notifications() {
        let config = config_from_pairs(&[("NOTIFY_WEBHOOK_URL", "  ")]).unwrap();
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config_from_pairs(&[("PORT", "not-a-port")]).is_err());
        assert!(config_from_pairs(&[("RATE_LIMIT_WINDOW_SECS", "0")]).is_err());
        assert!(config_from_pairs(&[("NOTIFY_WORKERS", "0")]).is_err());
        assert!(config_from_pairs(&[("TRUSTED_PROXIES", "10.0.0.0/8, bogus")]).is_err());
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let huge = u64::MAX.to_string();
        assert!(config_from_pairs(&[("RATE_LIMIT_WINDOW_SECS", &huge)]).is_err());
        assert!(config_from_pairs(&[("RATE_LIMIT_SWEEP_INTERVAL_SECS", &huge)]).is_err());
        assert!(config_from_pairs(&[("NOTIFY_TIMEOUT_SECS", &huge)]).is_err());

        let year = MAX_DURATION_SECS.to_string();
        let config = config_from_pairs(&[("RATE_LIMIT_WINDOW_SECS", &year)]).unwrap();
        assert_eq!(config.rate_limit.window_secs, MAX_DURATION_SECS);
    }

    #[test]
    fn test_trusted_proxies_and_mode() {
        let config = config_from_pairs(&[
            ("TRUSTED_PROXY_MODE", "Cloudflare"),
            ("TRUSTED_PROXIES", "10.0.0.0/8, 2001:db8::/32"),
            ("NUM_TRUSTED_PROXIES", "2"),
        ])
        .unwrap();

        assert_eq!(config.client_ip.trusted_proxy_mode, TrustedProxyMode::Cloudflare);
        assert_eq!(config.client_ip.trusted_proxies.len(), 2);
        assert_eq!(config.client_ip.num_trusted_proxies, Some(2));
    }

    #[test]
    fn test_unknown_proxy_mode_falls_back() {
        let config = config_from_pairs(&[("TRUSTED_PROXY_MODE", "bogus")]).unwrap();
        assert_eq!(config.client_ip.trusted_proxy_mode, TrustedProxyMode::Standard);
    }
}
