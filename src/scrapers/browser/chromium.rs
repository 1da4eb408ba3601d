//! Headless Chrome over CDP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::stealth::STEALTH_SCRIPTS;
use super::{BrowserEngineConfig, BrowserLauncher, BrowserSession, RenderedPage};
use crate::scrapers::http_client::UserAgentPool;
use crate::scrapers::FetchError;

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

const CHROME_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Launches a local Chrome, or connects to a remote one.
pub struct ChromiumLauncher {
    config: BrowserEngineConfig,
    user_agents: UserAgentPool,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserEngineConfig, user_agents: UserAgentPool) -> Self {
        Self {
            config,
            user_agents,
        }
    }

    fn find_chrome() -> Result<PathBuf> {
        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in CHROME_COMMANDS {
            if let Ok(path) = which::which(cmd) {
                info!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Please install it:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Or set browser.remote_url / BROWSER_URL to an existing instance"
        ))
    }

    async fn launch_local(&self) -> Result<(Browser, JoinHandle<()>)> {
        info!("Launching browser (headless={})", self.config.headless);
        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--lang=zh-CN")
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        Ok((browser, spawn_handler(handler)))
    }

    async fn connect_remote(&self, url: &str) -> Result<(Browser, JoinHandle<()>)> {
        info!("Connecting to remote browser at {}", url);

        // Get WebSocket URL from the /json/version endpoint
        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: self.config.ready_timeout,
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .context("Failed to connect to remote browser")?;

        Ok((browser, spawn_handler(handler)))
    }
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, FetchError> {
        let remote = self.config.remote_url.is_some();
        let launch = async {
            match &self.config.remote_url {
                Some(url) => self.connect_remote(url).await,
                None => self.launch_local().await,
            }
        };

        let (browser, handler) = tokio::time::timeout(self.config.launch_timeout, launch)
            .await
            .map_err(|_| {
                FetchError::Resource(format!(
                    "browser did not start within {:?}",
                    self.config.launch_timeout
                ))
            })?
            .map_err(|e| FetchError::Resource(format!("{:#}", e)))?;

        Ok(Arc::new(ChromiumSession {
            browser: RwLock::new(Some(browser)),
            handler,
            remote,
            config: self.config.clone(),
            user_agents: self.user_agents.clone(),
        }))
    }
}

/// One running browser, shared by all page fetches of a run.
pub struct ChromiumSession {
    browser: RwLock<Option<Browser>>,
    handler: JoinHandle<()>,
    remote: bool,
    config: BrowserEngineConfig,
    user_agents: UserAgentPool,
}

impl ChromiumSession {
    async fn render_page(&self, page: &Page, url: &str) -> Result<RenderedPage> {
        page.execute(SetUserAgentOverrideParams::new(
            self.user_agents.pick().to_string(),
        ))
        .await?;

        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e))?;
        page.execute(nav_params).await?;

        for script in STEALTH_SCRIPTS {
            if let Err(e) = page.evaluate(script.to_string()).await {
                debug!("Stealth script injection skipped: {}", e);
            }
        }

        let selector = self.config.wait_for_selector.as_str();
        let ready = tokio::time::timeout(self.config.ready_timeout, async {
            loop {
                if page.find_element(selector).await.is_ok() {
                    break;
                }
                tokio::time::sleep(SELECTOR_POLL).await;
            }
        })
        .await
        .is_ok();
        if !ready {
            warn!("Timeout waiting for {} on {}", selector, url);
        }

        let final_url = page.url().await?;
        let html = page.content().await?;

        Ok(RenderedPage {
            html,
            final_url,
            ready,
        })
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn render(&self, url: &str) -> Result<RenderedPage, FetchError> {
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| FetchError::Resource("browser already closed".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Resource(e.to_string()))?;

        let result = self.render_page(&page, url).await;
        // Close the page to prevent tab accumulation
        let _ = page.close().await;

        result.map_err(|e| FetchError::Network(format!("{:#}", e)))
    }

    async fn close(&self) {
        if let Some(mut browser) = self.browser.write().await.take() {
            if !self.remote {
                if let Err(e) = browser.close().await {
                    debug!("Browser close failed: {}", e);
                }
                let _ = browser.wait().await;
            }
            info!("Browser closed");
        }
        self.handler.abort();
    }
}
