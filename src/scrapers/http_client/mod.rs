//! Direct HTTP fetch strategy.

mod user_agent;

pub use user_agent::{UserAgentPool, IMPERSONATE_USER_AGENTS};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, Proxy};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::detection::{is_placeholder, BlockDetector};
use super::strategy::{FetchError, FetchStrategy, StrategyKind};
use crate::models::EgressProxy;
use crate::privacy::ProxySupplier;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE_ZH: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Stateless HTTP requests with a rotating user agent.
///
/// Block pages (detection marker in the body, or a redirect to a challenge
/// host) are reported as [`FetchError::Blocked`] so the chain can escalate.
pub struct DirectStrategy {
    clients: Mutex<HashMap<Option<String>, Client>>,
    user_agents: UserAgentPool,
    detector: BlockDetector,
    timeout: Duration,
    referer: Option<String>,
    proxies: Option<Arc<ProxySupplier>>,
}

impl DirectStrategy {
    pub fn new(timeout: Duration, user_agents: UserAgentPool, detector: BlockDetector) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            user_agents,
            detector,
            timeout,
            referer: None,
            proxies: None,
        }
    }

    /// Set the Referer header for requests.
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Route requests through validated proxies from the supplier.
    pub fn with_proxies(mut self, proxies: Arc<ProxySupplier>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// One client per egress route, so cookies stay with their address.
    async fn client_for(&self, proxy: Option<&EgressProxy>) -> Result<Client, FetchError> {
        let key = proxy.map(|p| p.url());
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true);
        if let Some(url) = &key {
            builder = builder.proxy(Proxy::all(url).map_err(|e| FetchError::Network(e.to_string()))?);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn retire(&self, proxy: Option<&EgressProxy>) {
        if let (Some(supplier), Some(proxy)) = (&self.proxies, proxy) {
            warn!("Proxy {} failed, retiring", proxy.address);
            supplier.release(&proxy.address).await;
            self.clients.lock().await.remove(&Some(proxy.url()));
        }
    }
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let proxy = match &self.proxies {
            Some(supplier) => supplier.acquire().await,
            None => None,
        };
        let client = self.client_for(proxy.as_ref()).await?;

        let mut request = client
            .get(url)
            .header(USER_AGENT, self.user_agents.pick())
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_ZH);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = FetchError::from_reqwest(&e, self.timeout);
                if matches!(err, FetchError::Network(_) | FetchError::Timeout(_)) {
                    self.retire(proxy.as_ref()).await;
                }
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        debug!("GET {} -> HTTP {} ({})", url, status, final_url);

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&e, self.timeout))?;

        // Block pages are sometimes served with 403, sometimes with 200.
        if let Some(marker) = self.detector.detect(Some(&final_url), &body) {
            return Err(FetchError::Blocked { marker });
        }
        if let Some(err) = FetchError::from_status(status) {
            return Err(err);
        }
        if is_placeholder(&body) {
            return Err(FetchError::EmptyBody);
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::ProxyProbe;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response to every connection. Returns a page URL on
    /// the listener.
    async fn serve(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/subject/1/", addr)
    }

    fn strategy() -> DirectStrategy {
        DirectStrategy::new(
            Duration::from_secs(5),
            UserAgentPool::default(),
            BlockDetector::default(),
        )
    }

    struct AcceptAll;

    #[async_trait]
    impl ProxyProbe for AcceptAll {
        async fn probe(&self, _proxy: &EgressProxy) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_ok_body_is_returned() {
        let url = serve("200 OK", "<html><body>豆瓣电影</body></html>").await;

        let body = strategy().fetch(&url).await.unwrap();

        assert!(body.contains("豆瓣电影"));
    }

    #[tokio::test]
    async fn test_block_page_with_403_is_blocked() {
        let url = serve("403 Forbidden", "<html><body>检测到有异常请求从你的 IP 发出</body></html>").await;

        let err = strategy().fetch(&url).await.unwrap_err();

        assert!(matches!(err, FetchError::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_block_page_with_200_is_blocked() {
        let url = serve("200 OK", "<html><body>检测到有异常请求从你的 IP 发出</body></html>").await;

        let err = strategy().fetch(&url).await.unwrap_err();

        assert_eq!(
            err,
            FetchError::Blocked {
                marker: "检测到有异常请求".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_plain_403_maps_status() {
        let url = serve("403 Forbidden", "<html><body>forbidden</body></html>").await;

        let err = strategy().fetch(&url).await.unwrap_err();

        assert_eq!(err, FetchError::ClientError(403));
    }

    #[tokio::test]
    async fn test_whitespace_body_is_empty() {
        let url = serve("200 OK", "  \n\t  ").await;

        let err = strategy().fetch(&url).await.unwrap_err();

        assert_eq!(err, FetchError::EmptyBody);
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_retired() {
        // Bind then drop, so nothing listens on the proxy port.
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = closed.local_addr().unwrap().to_string();
        drop(closed);

        let supplier = Arc::new(ProxySupplier::new(
            [EgressProxy::new(proxy_addr.clone())],
            Arc::new(AcceptAll),
            None,
        ));
        let strategy = strategy().with_proxies(supplier.clone());

        let err = strategy
            .fetch("http://movie.douban.com/subject/1/")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Network(_) | FetchError::Timeout(_)));
        assert!(supplier.is_empty().await);
        assert!(strategy.clients.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_client_cache_per_route() {
        let strategy = DirectStrategy::new(
            Duration::from_secs(10),
            UserAgentPool::default(),
            BlockDetector::default(),
        );

        strategy.client_for(None).await.unwrap();
        strategy.client_for(None).await.unwrap();
        strategy
            .client_for(Some(&EgressProxy::new("127.0.0.1:8080")))
            .await
            .unwrap();

        assert_eq!(strategy.clients.lock().await.len(), 2);
        assert_eq!(strategy.kind(), StrategyKind::Direct);
    }
}
