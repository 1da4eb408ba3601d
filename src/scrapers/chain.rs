//! Ordered fetch strategies with sticky escalation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::strategy::{FetchError, FetchStrategy, StrategyKind};

/// A document and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub body: String,
    pub strategy: StrategyKind,
}

/// A failed fetch and the strategy that produced the failure.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{strategy} fetch failed: {error}")]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub error: FetchError,
}

/// A cheap strategy backed by an optional costlier one.
///
/// The first time the primary strategy reports [`FetchError::Blocked`], the
/// chain escalates and stays escalated: every later fetch goes straight to the
/// fallback. A chain is created per crawl run, so the flag resets between runs.
pub struct StrategyChain {
    primary: Arc<dyn FetchStrategy>,
    fallback: Option<Arc<dyn FetchStrategy>>,
    escalated: AtomicBool,
}

impl StrategyChain {
    pub fn new(primary: Arc<dyn FetchStrategy>, fallback: Option<Arc<dyn FetchStrategy>>) -> Self {
        Self {
            primary,
            fallback,
            escalated: AtomicBool::new(false),
        }
    }

    /// Whether the chain has switched to the fallback for the rest of the run.
    pub fn is_escalated(&self) -> bool {
        self.escalated.load(Ordering::SeqCst)
    }

    pub async fn fetch(&self, url: &str) -> Result<Fetched, StrategyFailure> {
        self.fetch_gated(url, || async { Ok::<(), FetchError>(()) }).await
    }

    /// Fetch with `gate` awaited before every dispatch, including the
    /// fallback dispatch that follows an escalation.
    pub async fn fetch_gated<G, Fut>(&self, url: &str, gate: G) -> Result<Fetched, StrategyFailure>
    where
        G: Fn() -> Fut,
        Fut: Future<Output = Result<(), FetchError>>,
    {
        if let Some(fallback) = self.fallback.as_ref().filter(|_| self.is_escalated()) {
            return dispatch(fallback.as_ref(), url, &gate).await;
        }

        let result = dispatch(self.primary.as_ref(), url, &gate).await;
        let Some(fallback) = &self.fallback else {
            return result;
        };

        match result {
            Err(StrategyFailure {
                error: FetchError::Blocked { marker },
                ..
            }) => {
                if !self.escalated.swap(true, Ordering::SeqCst) {
                    warn!(
                        "Detection marker {:?} on {}, switching to {} for the rest of the run",
                        marker,
                        url,
                        fallback.kind()
                    );
                }
                dispatch(fallback.as_ref(), url, &gate).await
            }
            other => other,
        }
    }

    /// Release resources held by every strategy in the chain.
    pub async fn shutdown(&self) {
        self.primary.shutdown().await;
        if let Some(fallback) = &self.fallback {
            fallback.shutdown().await;
        }
    }
}

async fn dispatch<G, Fut>(
    strategy: &dyn FetchStrategy,
    url: &str,
    gate: &G,
) -> Result<Fetched, StrategyFailure>
where
    G: Fn() -> Fut,
    Fut: Future<Output = Result<(), FetchError>>,
{
    let kind = strategy.kind();
    gate().await.map_err(|error| StrategyFailure {
        strategy: kind,
        error,
    })?;
    debug!("Fetching {} via {}", url, kind);
    strategy
        .fetch(url)
        .await
        .map(|body| Fetched {
            body,
            strategy: kind,
        })
        .map_err(|error| StrategyFailure {
            strategy: kind,
            error,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Scripted {
        kind: StrategyKind,
        blocked: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(kind: StrategyKind, blocked: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                blocked,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FetchStrategy for Scripted {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // Only the first request is blocked; later ones would succeed.
            if self.blocked && n == 0 {
                Err(FetchError::Blocked {
                    marker: "检测到有异常请求".to_string(),
                })
            } else {
                Ok(format!("{} {}", self.kind, url))
            }
        }
    }

    #[tokio::test]
    async fn test_escalation_is_sticky() {
        let direct = Scripted::new(StrategyKind::Direct, true);
        let browser = Scripted::new(StrategyKind::Browser, false);
        let chain = StrategyChain::new(direct.clone(), Some(browser.clone()));

        let first = chain.fetch("https://movie.douban.com/a").await.unwrap();
        assert_eq!(first.strategy, StrategyKind::Browser);
        assert!(chain.is_escalated());

        for url in ["https://movie.douban.com/b", "https://movie.douban.com/c"] {
            let fetched = chain.fetch(url).await.unwrap();
            assert_eq!(fetched.strategy, StrategyKind::Browser);
        }

        assert_eq!(direct.calls.load(Ordering::SeqCst), 1);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_blocked_without_fallback_surfaces() {
        let chain = StrategyChain::new(Scripted::new(StrategyKind::Direct, true), None);

        let err = chain.fetch("https://movie.douban.com/a").await.unwrap_err();
        assert_eq!(err.strategy, StrategyKind::Direct);
        assert!(matches!(err.error, FetchError::Blocked { .. }));
        assert!(!chain.is_escalated());
    }

    #[tokio::test]
    async fn test_unblocked_stays_direct() {
        let browser = Scripted::new(StrategyKind::Browser, false);
        let chain = StrategyChain::new(
            Scripted::new(StrategyKind::Direct, false),
            Some(browser.clone()),
        );

        let fetched = chain.fetch("https://movie.douban.com/a").await.unwrap();
        assert_eq!(fetched.strategy, StrategyKind::Direct);
        assert_eq!(browser.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_runs_before_each_dispatch() {
        let chain = StrategyChain::new(
            Scripted::new(StrategyKind::Direct, true),
            Some(Scripted::new(StrategyKind::Browser, false)),
        );
        let counter = AtomicUsize::new(0);
        let gated = &counter;

        let fetched = chain
            .fetch_gated("https://movie.douban.com/a", move || async move {
                gated.fetch_add(1, Ordering::SeqCst);
                Ok::<(), FetchError>(())
            })
            .await
            .unwrap();

        assert_eq!(fetched.strategy, StrategyKind::Browser);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_gate_skips_dispatch() {
        let direct = Scripted::new(StrategyKind::Direct, false);
        let chain = StrategyChain::new(direct.clone(), None);

        let err = chain
            .fetch_gated("https://movie.douban.com/a", || async {
                Err::<(), _>(FetchError::Timeout(Duration::from_secs(1)))
            })
            .await
            .unwrap_err();

        assert_eq!(err.strategy, StrategyKind::Direct);
        assert_eq!(direct.calls.load(Ordering::SeqCst), 0);
    }
}
