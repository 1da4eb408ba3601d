//! Validated proxy pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Proxy};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ProxyConfig;
use crate::models::EgressProxy;

/// Checks whether a candidate proxy can reach the target.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, proxy: &EgressProxy) -> bool;
}

/// Supplies fresh candidate addresses when the pool runs dry.
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn discover(&self) -> Option<EgressProxy>;
}

/// Probe by issuing a GET to the target through the proxy.
/// Anything other than a 2xx within the timeout fails.
pub struct HttpProbe {
    probe_url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxyProbe for HttpProbe {
    async fn probe(&self, proxy: &EgressProxy) -> bool {
        let client = match Proxy::all(proxy.url())
            .and_then(|p| Client::builder().proxy(p).timeout(self.timeout).build())
        {
            Ok(client) => client,
            Err(e) => {
                debug!("Invalid proxy {}: {}", proxy.address, e);
                return false;
            }
        };

        match client.get(&self.probe_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Probe through {} failed: {}", proxy.address, e);
                false
            }
        }
    }
}

/// Discovery endpoint answering with a single `host:port` in the body.
pub struct PoolUrlSource {
    client: Client,
    url: String,
}

impl PoolUrlSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProxySource for PoolUrlSource {
    async fn discover(&self) -> Option<EgressProxy> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!("Proxy pool returned HTTP {}", r.status());
                return None;
            }
            Err(e) => {
                warn!("Failed to fetch proxy from pool: {}", e);
                return None;
            }
        };

        let body = response.text().await.ok()?;
        let address = body.trim();
        if address.is_empty() {
            return None;
        }
        Some(EgressProxy::new(address))
    }
}

/// Hands out validated proxies and permanently retires failed ones.
pub struct ProxySupplier {
    pool: Mutex<VecDeque<EgressProxy>>,
    probe: Arc<dyn ProxyProbe>,
    source: Option<Arc<dyn ProxySource>>,
}

impl ProxySupplier {
    pub fn new(
        candidates: impl IntoIterator<Item = EgressProxy>,
        probe: Arc<dyn ProxyProbe>,
        source: Option<Arc<dyn ProxySource>>,
    ) -> Self {
        Self {
            pool: Mutex::new(candidates.into_iter().collect()),
            probe,
            source,
        }
    }

    /// Build a supplier from configuration. Returns `None` when proxying is off.
    pub fn from_config(config: &ProxyConfig) -> Option<Self> {
        if !config.is_active() {
            return None;
        }
        let probe = Arc::new(HttpProbe::new(&config.probe_url, config.probe_timeout));
        let source = config.pool_url.as_ref().map(|url| {
            Arc::new(PoolUrlSource::new(url, config.probe_timeout)) as Arc<dyn ProxySource>
        });
        Some(Self::new(
            config.addresses.iter().map(EgressProxy::new),
            probe,
            source,
        ))
    }

    /// Get a validated proxy, or `None` if none can be found.
    ///
    /// Validated proxies rotate round-robin. Unvalidated candidates are probed
    /// first and discarded on failure. An empty pool falls back to discovery.
    pub async fn acquire(&self) -> Option<EgressProxy> {
        loop {
            let candidate = {
                let mut pool = self.pool.lock().await;
                match pool.pop_front() {
                    Some(proxy) if proxy.last_validated_at.is_some() => {
                        pool.push_back(proxy.clone());
                        return Some(proxy);
                    }
                    Some(proxy) => proxy,
                    None => break,
                }
            };

            if let Some(validated) = self.validate(candidate).await {
                return Some(validated);
            }
        }

        let source = self.source.as_ref()?;
        let discovered = source.discover().await?;
        self.validate(discovered).await
    }

    /// Retire a proxy after a confirmed failure.
    pub async fn release(&self, address: &str) {
        let mut pool = self.pool.lock().await;
        let before = pool.len();
        pool.retain(|p| p.address != address);
        if pool.len() < before {
            info!("Retired proxy {}", address);
        }
    }

    /// Number of proxies currently in the pool.
    pub async fn len(&self) -> usize {
        self.pool.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn validate(&self, mut proxy: EgressProxy) -> Option<EgressProxy> {
        if !self.probe.probe(&proxy).await {
            warn!("Discarding proxy {} after failed probe", proxy.address);
            return None;
        }

        proxy.last_validated_at = Some(Utc::now());
        debug!("Validated proxy {}", proxy.address);
        self.pool.lock().await.push_back(proxy.clone());
        Some(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProbe {
        good: HashSet<String>,
        calls: AtomicUsize,
    }

    impl FixedProbe {
        fn new(good: &[&str]) -> Self {
            Self {
                good: good.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProxyProbe for FixedProbe {
        async fn probe(&self, proxy: &EgressProxy) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.good.contains(&proxy.address)
        }
    }

    struct OneShotSource(Mutex<Option<String>>);

    #[async_trait]
    impl ProxySource for OneShotSource {
        async fn discover(&self) -> Option<EgressProxy> {
            self.0.lock().await.take().map(EgressProxy::new)
        }
    }

    #[tokio::test]
    async fn test_failed_probe_is_never_handed_out() {
        let probe = Arc::new(FixedProbe::new(&["10.0.0.2:8080"]));
        let supplier = ProxySupplier::new(
            [
                EgressProxy::new("10.0.0.1:8080"),
                EgressProxy::new("10.0.0.2:8080"),
            ],
            probe.clone(),
            None,
        );

        let proxy = supplier.acquire().await.unwrap();
        assert_eq!(proxy.address, "10.0.0.2:8080");
        assert!(proxy.last_validated_at.is_some());
        assert_eq!(supplier.len().await, 1);

        // Validated proxies are not re-probed.
        supplier.acquire().await.unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_removes_permanently() {
        let supplier = ProxySupplier::new(
            [EgressProxy::new("10.0.0.2:8080")],
            Arc::new(FixedProbe::new(&["10.0.0.2:8080"])),
            None,
        );

        supplier.acquire().await.unwrap();
        supplier.release("10.0.0.2:8080").await;

        assert!(supplier.is_empty().await);
        assert!(supplier.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_pool_discovers() {
        let supplier = ProxySupplier::new(
            [],
            Arc::new(FixedProbe::new(&["10.0.0.9:3128"])),
            Some(Arc::new(OneShotSource(Mutex::new(Some(
                "10.0.0.9:3128".to_string(),
            ))))),
        );

        let proxy = supplier.acquire().await.unwrap();
        assert_eq!(proxy.address, "10.0.0.9:3128");
        assert_eq!(supplier.len().await, 1);
    }
}
