//! Browser engine configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scrapers::rate_limiter::millis;

/// CSS selector whose presence marks a Douban page as rendered: the main
/// content block, a search result item, or a raw JSON response.
pub const DEFAULT_READY_SELECTOR: &str = "#content, .item-root, pre";

/// Browser engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Allow escalation to the browser at all.
    /// Disabled via `FILM_NO_BROWSER=1`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run in headless mode (default: true).
    /// Set to false for debugging or if headless detection is an issue.
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Upper bound on waiting for the ready selector.
    #[serde(
        default = "default_ready_timeout",
        rename = "ready_timeout_ms",
        with = "millis"
    )]
    pub ready_timeout: Duration,

    /// Upper bound on launching or connecting to the browser.
    #[serde(
        default = "default_launch_timeout",
        rename = "launch_timeout_ms",
        with = "millis"
    )]
    pub launch_timeout: Duration,

    /// Wait for this CSS selector before considering page loaded.
    #[serde(default = "default_ready_selector")]
    pub wait_for_selector: String,

    /// Additional Chrome arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_launch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_ready_selector() -> String {
    DEFAULT_READY_SELECTOR.to_string()
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: true,
            proxy: None,
            ready_timeout: default_ready_timeout(),
            launch_timeout: default_launch_timeout(),
            wait_for_selector: default_ready_selector(),
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: BrowserEngineConfig = serde_yaml::from_str("headless: false\n").unwrap();
        assert!(!config.headless);
        assert!(config.enabled);
        assert_eq!(config.ready_timeout, Duration::from_secs(15));
        assert_eq!(config.wait_for_selector, DEFAULT_READY_SELECTOR);
    }
}
