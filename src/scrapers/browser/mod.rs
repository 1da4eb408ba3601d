//! Browser-automation fetch strategy.
//!
//! The browser is launched lazily on the first fetch and lives until
//! [`FetchStrategy::shutdown`] is called. Each crawl run owns its own
//! [`BrowserStrategy`], so an instance never outlives the run that started it.

#[cfg(feature = "browser")]
mod chromium;
mod config;
#[cfg(feature = "browser")]
mod stealth;

#[cfg(feature = "browser")]
pub use chromium::ChromiumLauncher;
pub use config::{BrowserEngineConfig, DEFAULT_READY_SELECTOR};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::detection::{is_placeholder, BlockDetector};
use super::strategy::{FetchError, FetchStrategy, StrategyKind};

/// A rendered document.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: Option<String>,
    /// Whether the ready selector appeared within the bounded wait.
    pub ready: bool,
}

/// A running browser instance.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, FetchError>;

    /// Tear the instance down. Must be safe to call more than once.
    async fn close(&self);
}

/// Starts browser instances.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a browser. Failures are [`FetchError::Resource`].
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, FetchError>;
}

/// Renders pages in a lazily launched browser.
pub struct BrowserStrategy {
    launcher: Arc<dyn BrowserLauncher>,
    session: Mutex<Option<Arc<dyn BrowserSession>>>,
    detector: BlockDetector,
    ready_timeout: std::time::Duration,
}

impl BrowserStrategy {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        detector: BlockDetector,
        ready_timeout: std::time::Duration,
    ) -> Self {
        Self {
            launcher,
            session: Mutex::new(None),
            detector,
            ready_timeout,
        }
    }

    /// Whether a browser is currently running for this strategy.
    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn session(&self) -> Result<Arc<dyn BrowserSession>, FetchError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        info!("Starting browser for escalated fetches");
        let session = self.launcher.launch().await?;
        *slot = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Browser
    }

    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let session = self.session().await?;
        let page = session.render(url).await?;

        if let Some(marker) = self.detector.detect(page.final_url.as_deref(), &page.html) {
            return Err(FetchError::Blocked { marker });
        }
        if !page.ready {
            return Err(FetchError::Timeout(self.ready_timeout));
        }
        if is_placeholder(&page.html) {
            return Err(FetchError::EmptyBody);
        }

        Ok(page.html)
    }

    async fn shutdown(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            debug!("Shutting down browser");
            session.close().await;
        }
    }
}

/// Launcher used when browser support is compiled out or disabled.
pub struct UnavailableLauncher {
    reason: String,
}

impl UnavailableLauncher {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for UnavailableLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, FetchError> {
        Err(FetchError::Resource(self.reason.clone()))
    }
}

/// Launcher for the configured engine.
#[cfg(feature = "browser")]
pub fn default_launcher(
    config: &BrowserEngineConfig,
    user_agents: super::http_client::UserAgentPool,
) -> Arc<dyn BrowserLauncher> {
    Arc::new(ChromiumLauncher::new(config.clone(), user_agents))
}

#[cfg(not(feature = "browser"))]
pub fn default_launcher(
    _config: &BrowserEngineConfig,
    _user_agents: super::http_client::UserAgentPool,
) -> Arc<dyn BrowserLauncher> {
    Arc::new(UnavailableLauncher::new(
        "Browser support not compiled. Rebuild with: cargo build --features browser",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        closes: AtomicUsize,
    }

    struct FakeSession {
        counters: Arc<Counters>,
        page: RenderedPage,
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn render(&self, _url: &str) -> Result<RenderedPage, FetchError> {
            Ok(self.page.clone())
        }

        async fn close(&self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeLauncher {
        counters: Arc<Counters>,
        page: RenderedPage,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Arc<dyn BrowserSession>, FetchError> {
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeSession {
                counters: self.counters.clone(),
                page: self.page.clone(),
            }))
        }
    }

    fn strategy(page: RenderedPage) -> (BrowserStrategy, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let launcher = Arc::new(FakeLauncher {
            counters: counters.clone(),
            page,
        });
        (
            BrowserStrategy::new(launcher, BlockDetector::default(), Duration::from_secs(15)),
            counters,
        )
    }

    fn page(html: &str, ready: bool) -> RenderedPage {
        RenderedPage {
            html: html.to_string(),
            final_url: Some("https://movie.douban.com/subject/1/".to_string()),
            ready,
        }
    }

    #[tokio::test]
    async fn test_launches_once_and_closes_on_shutdown() {
        let (strategy, counters) = strategy(page("<div id=\"content\">ok</div>", true));

        strategy.fetch("https://movie.douban.com/subject/1/").await.unwrap();
        strategy.fetch("https://movie.douban.com/subject/2/").await.unwrap();
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert!(strategy.is_running().await);

        strategy.shutdown().await;
        strategy.shutdown().await;
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(!strategy.is_running().await);
    }

    #[tokio::test]
    async fn test_never_ready_is_timeout() {
        let (strategy, _) = strategy(page("<html><body></body></html>", false));
        assert_eq!(
            strategy.fetch("https://movie.douban.com/subject/1/").await,
            Err(FetchError::Timeout(Duration::from_secs(15)))
        );
    }

    #[tokio::test]
    async fn test_rendered_block_page() {
        let (strategy, _) = strategy(page("<title>禁止访问</title>", false));
        assert!(matches!(
            strategy.fetch("https://movie.douban.com/subject/1/").await,
            Err(FetchError::Blocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_launcher_is_resource_failure() {
        let strategy = BrowserStrategy::new(
            Arc::new(UnavailableLauncher::new("disabled")),
            BlockDetector::default(),
            Duration::from_secs(15),
        );
        assert_eq!(
            strategy.fetch("https://movie.douban.com/subject/1/").await,
            Err(FetchError::Resource("disabled".to_string()))
        );
        assert!(!strategy.is_running().await);
    }
}
