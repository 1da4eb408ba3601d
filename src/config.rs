//! Configuration management for filmacquire using the prefer crate.
//!
//! A config file is discovered by `prefer` (`filmacquire.toml`,
//! `filmacquire.yaml`, ... in the usual locations) or given explicitly with
//! `--config`. Every section is optional. Environment variables override the
//! file:
//!
//! | Variable                   | Effect                                  |
//! |----------------------------|-----------------------------------------|
//! | `FILM_BASE_URL`            | `target.base_url`                       |
//! | `FILM_WORKERS`             | `crawl.workers`                         |
//! | `FILM_REQUEST_INTERVAL_MS` | `rate_limit.base_delay_ms`              |
//! | `SOCKS_PROXY`              | adds a proxy address                    |
//! | `FILM_PROXY_POOL_URL`      | `proxy.pool_url`                        |
//! | `BROWSER_URL`              | `browser.remote_url`                    |
//! | `FILM_NO_BROWSER`          | disables browser escalation             |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crawl::{CrawlConfig, TargetConfig};
use crate::privacy::ProxyConfig;
use crate::scrapers::detection::DEFAULT_CHALLENGE_HOSTS;
use crate::scrapers::{BlockDetector, BrowserEngineConfig, RateLimitConfig, RetryPolicy};

/// File name of the JSON store inside the data directory.
pub const STORE_FILENAME: &str = "store.json";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub crawl: CrawlConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub browser: BrowserEngineConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    /// User agents for direct requests. Empty uses the built-in pool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_agents: Vec<String>,

    /// Body markers that identify a block page. Empty uses the built-in list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detection_markers: Vec<String>,

    /// Where the JSON store lives.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filmacquire")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            crawl: CrawlConfig::default(),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            browser: BrowserEngineConfig::default(),
            proxy: ProxyConfig::default(),
            user_agents: Vec::new(),
            detection_markers: Vec::new(),
            data_dir: default_data_dir(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load configuration using prefer for discovery.
    /// Falls back to defaults when no file is found or it cannot be parsed.
    pub async fn load() -> Self {
        match prefer::load("filmacquire").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Ignoring config {}: {}", path.display(), e);
                        Self::default_with_env()
                    }
                },
                None => Self::default_with_env(),
            },
            Err(_) => {
                debug!("No config file found, using defaults");
                Self::default_with_env()
            }
        }
    }

    /// Defaults with environment variable overrides applied.
    pub fn default_with_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        if config.data_dir.is_relative() {
            if let Some(base) = path.parent() {
                config.data_dir = base.join(&config.data_dir);
            }
        }
        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("FILM_BASE_URL") {
            if !url.trim().is_empty() {
                self.target.base_url = url.trim().to_string();
            }
        }
        if let Some(workers) = env_number::<usize>("FILM_WORKERS") {
            self.crawl.workers = workers.max(1);
        }
        if let Some(ms) = env_number::<u64>("FILM_REQUEST_INTERVAL_MS") {
            self.rate_limit.base_delay = Duration::from_millis(ms);
        }
        if let Ok(url) = std::env::var("BROWSER_URL") {
            if !url.trim().is_empty() {
                self.browser.remote_url = Some(url.trim().to_string());
            }
        }
        if std::env::var("FILM_NO_BROWSER").is_ok_and(|v| is_truthy(&v)) {
            self.browser.enabled = false;
        }
        self.proxy = self.proxy.with_env_overrides();
        self
    }

    /// Detector built from the configured markers.
    pub fn block_detector(&self) -> BlockDetector {
        if self.detection_markers.is_empty() {
            return BlockDetector::default();
        }
        BlockDetector::new(
            self.detection_markers.clone(),
            DEFAULT_CHALLENGE_HOSTS.iter().map(|h| h.to_string()).collect(),
        )
    }

    /// Path of the JSON store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILENAME)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", name, value);
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::SearchSource;

    #[tokio::test]
    async fn test_load_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filmacquire.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "data"
detection_markers = ["访问受限"]

[target]
search_source = "page"

[crawl]
workers = 2
request_timeout_ms = 8000

[retry]
max_attempts = 5

[rate_limit]
base_delay_ms = 1500
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.target.search_source, SearchSource::Page);
        assert_eq!(config.crawl.workers, 2);
        assert_eq!(config.crawl.request_timeout, Duration::from_secs(8));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rate_limit.base_delay, Duration::from_millis(1500));
        assert_eq!(config.store_path(), dir.path().join("data").join(STORE_FILENAME));
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
        assert!(config
            .block_detector()
            .detect(None, "<p>访问受限</p>")
            .is_some());
    }

    #[tokio::test]
    async fn test_load_yaml_defaults_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filmacquire.yaml");
        std::fs::write(&path, "crawl:\n  max_search_results: 5\n").unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.crawl.max_search_results, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.target.search_source, SearchSource::Suggest);
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filmacquire.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_path(&path).await.is_err());
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" Yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
