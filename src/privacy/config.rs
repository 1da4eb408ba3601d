//! Proxy pool configuration.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scrapers::rate_limiter::millis;

/// Default probe target.
pub const DEFAULT_PROBE_URL: &str = "https://www.douban.com";

/// Proxy pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Route direct requests through the pool.
    #[serde(default)]
    pub enabled: bool,

    /// Statically configured proxy addresses (`host:port` or full URLs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,

    /// Endpoint that returns a fresh proxy address as plain text.
    /// Set via `FILM_PROXY_POOL_URL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_url: Option<String>,

    /// URL requested through a candidate proxy to validate it.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Probe timeout.
    #[serde(
        default = "default_probe_timeout",
        rename = "probe_timeout_ms",
        with = "millis"
    )]
    pub probe_timeout: Duration,
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.to_string()
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addresses: Vec::new(),
            pool_url: None,
            probe_url: default_probe_url(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl ProxyConfig {
    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        // SOCKS_PROXY - a fixed proxy, enables the pool
        if let Ok(proxy) = env::var("SOCKS_PROXY") {
            if !proxy.is_empty() && !self.addresses.contains(&proxy) {
                self.addresses.push(proxy);
                self.enabled = true;
            }
        }

        // FILM_PROXY_POOL_URL - discovery endpoint, enables the pool
        if let Ok(url) = env::var("FILM_PROXY_POOL_URL") {
            if !url.is_empty() {
                self.pool_url = Some(url);
                self.enabled = true;
            }
        }

        self
    }

    /// Whether there is anything to route through.
    pub fn is_active(&self) -> bool {
        self.enabled && (!self.addresses.is_empty() || self.pool_url.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_inactive() {
        let config = ProxyConfig::default();
        assert!(!config.is_active());
        assert_eq!(config.probe_url, DEFAULT_PROBE_URL);
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_from_toml() {
        let config: ProxyConfig = toml::from_str(
            r#"
            enabled = true
            addresses = ["127.0.0.1:8080"]
            probe_timeout_ms = 2500
            "#,
        )
        .unwrap();
        assert!(config.is_active());
        assert_eq!(config.probe_timeout, Duration::from_millis(2500));
    }
}
