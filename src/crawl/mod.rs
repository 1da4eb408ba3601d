//! Crawl orchestration.
//!
//! A [`CrawlOrchestrator`] composes the acquisition pieces for one logical
//! target at a time: a search query, a detail lookup, or one movie's comment
//! pages. Each call is a *run*. A run owns a fresh [`StrategyChain`] (so
//! escalation and the browser never outlive it) and shares the orchestrator's
//! [`RateLimiter`] with every other run.
//!
//! ```text
//! page -> RateLimiter::acquire -> StrategyChain::fetch -> extract -> aggregate
//!         \_____________________ RetryPolicy::run ____________________/
//! ```

mod config;
mod error;
mod state;

pub use config::{CrawlConfig, SearchSource, TargetConfig, COMMENTS_PER_PAGE, DEFAULT_BASE_URL};
pub use error::CrawlError;
pub use state::{PageStatus, RunState, RunTracker};

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::extract::{
    extract_suggestions, parse_comment_page, parse_detail, parse_search_results, CommentPage,
    ExtractionError,
};
use crate::models::{CandidateMovie, CommentRecord, MovieRecord};
use crate::privacy::ProxySupplier;
use crate::repository::MovieStore;
use crate::scrapers::browser::default_launcher;
use crate::scrapers::{
    BlockDetector, BrowserLauncher, BrowserStrategy, DirectStrategy, FailureClass, FetchError,
    FetchStrategy, PageFailure, RateLimiter, Retried, RetryPolicy, StrategyChain, StrategyKind,
    UserAgentPool,
};

/// Builds the strategy chain for each run.
pub trait StrategyFactory: Send + Sync {
    fn new_chain(&self) -> StrategyChain;
}

/// Direct HTTP first, escalating to a browser when one is configured.
///
/// The direct strategy is shared across runs (its clients and cookie jars are
/// worth keeping). The browser strategy is created per run.
pub struct HttpStrategyFactory {
    direct: Arc<dyn FetchStrategy>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    detector: BlockDetector,
    ready_timeout: Duration,
}

impl HttpStrategyFactory {
    pub fn new(direct: Arc<dyn FetchStrategy>, detector: BlockDetector) -> Self {
        Self {
            direct,
            launcher: None,
            detector,
            ready_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_browser(mut self, launcher: Arc<dyn BrowserLauncher>, ready_timeout: Duration) -> Self {
        self.launcher = Some(launcher);
        self.ready_timeout = ready_timeout;
        self
    }
}

impl StrategyFactory for HttpStrategyFactory {
    fn new_chain(&self) -> StrategyChain {
        let fallback = self.launcher.as_ref().map(|launcher| {
            Arc::new(BrowserStrategy::new(
                launcher.clone(),
                self.detector.clone(),
                self.ready_timeout,
            )) as Arc<dyn FetchStrategy>
        });
        StrategyChain::new(self.direct.clone(), fallback)
    }
}

/// Per-run acquisition state shared by the run's workers.
struct Run {
    chain: StrategyChain,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl Run {
    /// Fetch and extract one page with retries.
    ///
    /// Extraction runs inside each attempt so a malformed document is
    /// classified like any other fetch failure.
    async fn fetch_page<T, F>(&self, url: &str, parse: F) -> Result<Retried<T>, PageFailure>
    where
        F: Fn(&str) -> Result<T, ExtractionError> + Sync,
        T: Send,
    {
        let parse = &parse;
        self.retry
            .run(url, move |_| async move {
                // Every dispatch, including an escalated re-fetch, takes a
                // governor slot.
                let gate = move || async move {
                    self.limiter
                        .acquire(url)
                        .await
                        .map(|_| ())
                        .map_err(FetchError::from)
                };

                let (strategy, outcome) = match self.chain.fetch_gated(url, gate).await {
                    Ok(fetched) => (
                        fetched.strategy,
                        parse(&fetched.body).map_err(FetchError::from),
                    ),
                    Err(failure) => (failure.strategy, Err(failure.error)),
                };

                if let Some(domain) = RateLimiter::extract_domain(url) {
                    self.limiter.report(&domain, &outcome).await;
                }
                (strategy, outcome)
            })
            .await
    }

    async fn shutdown(&self) {
        self.chain.shutdown().await;
    }
}

/// What a finished job tells the dispatcher.
enum Flow {
    Continue,
    /// Let in-flight jobs finish but start no new ones.
    StopDispatch,
    /// Stop everything and fail the run.
    Abort(CrawlError),
}

/// Run up to `jobs` jobs with at most `workers` in flight, in index order.
///
/// On cancellation or abort, outstanding jobs are aborted and awaited before
/// returning, so nothing still uses the run's strategies afterwards.
async fn drive<T, S, Fut, D>(
    jobs: usize,
    workers: usize,
    cancel: &CancellationToken,
    tracker: &mut RunTracker,
    mut start: S,
    mut finished: D,
) -> Result<(), CrawlError>
where
    T: Send + 'static,
    S: FnMut(usize) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    D: FnMut(usize, T) -> Flow,
{
    let workers = workers.max(1);
    let mut set = JoinSet::new();
    let mut next = 0;
    let mut dispatching = true;

    tracker.advance(RunState::Fetching { next_page: 0 });

    loop {
        while dispatching && next < jobs && set.len() < workers {
            let index = next;
            let job = start(index);
            set.spawn(async move { (index, job.await) });
            next += 1;
            tracker.advance(RunState::Fetching { next_page: next });
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            joined = set.join_next() => Some(joined),
        };

        match joined {
            None => {
                set.shutdown().await;
                return Err(CrawlError::Cancelled);
            }
            Some(None) => return Ok(()),
            Some(Some(Ok((index, value)))) => match finished(index, value) {
                Flow::Continue => {}
                Flow::StopDispatch => dispatching = false,
                Flow::Abort(error) => {
                    set.shutdown().await;
                    return Err(error);
                }
            },
            Some(Some(Err(e))) => warn!("Crawl worker failed: {}", e),
        }
    }
}

/// Outcome of one comment page.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    /// 0-based page index.
    pub page: usize,
    pub url: String,
    #[serde(flatten)]
    pub status: PageStatus,
    /// Attempts spent on the page.
    pub attempts: usize,
    /// Strategy that served the last attempt.
    pub strategy: Option<StrategyKind>,
}

/// Result of a comment crawl. Partial results are normal: failed pages are
/// absent from `comments` and listed in `pages`.
#[derive(Debug, Clone, Serialize)]
pub struct CommentCrawl {
    pub external_movie_id: String,
    /// Comments in page order, deduplicated within the run.
    pub comments: Vec<CommentRecord>,
    pub pages: Vec<PageReport>,
    /// A page listed no comments, so the crawl stopped there.
    pub end_reached: bool,
    /// The run switched to the browser.
    pub escalated: bool,
}

impl CommentCrawl {
    pub fn failed_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| matches!(p.status, PageStatus::Failed { .. }))
            .count()
    }
}

/// One search candidate, tagged for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub movie: CandidateMovie,
    /// The store already holds this movie.
    pub already_added: bool,
    /// Set when the detail fetch used to fill missing fields failed.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub enrichment_error: Option<CrawlError>,
}

fn serialize_error<S: Serializer>(error: &Option<CrawlError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

type PageResult = (String, Result<Retried<CommentPage>, PageFailure>);

/// Runs searches, detail lookups and comment crawls.
pub struct CrawlOrchestrator {
    target: TargetConfig,
    config: CrawlConfig,
    retry: RetryPolicy,
    limiter: RateLimiter,
    strategies: Arc<dyn StrategyFactory>,
    store: Option<Arc<dyn MovieStore>>,
}

impl CrawlOrchestrator {
    pub fn new(target: TargetConfig, config: CrawlConfig, strategies: Arc<dyn StrategyFactory>) -> Self {
        Self {
            target,
            config,
            retry: RetryPolicy::default(),
            limiter: RateLimiter::new(),
            strategies,
            store: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share a rate limiter, e.g. with another orchestrator hitting the same hosts.
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Store consulted to tag search hits as already added.
    pub fn with_store(mut self, store: Arc<dyn MovieStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the production stack: direct HTTP with optional proxies,
    /// escalating to Chromium when the browser is enabled.
    pub fn from_config(config: &Config) -> Self {
        let detector = config.block_detector();
        let user_agents = UserAgentPool::new(&config.user_agents);

        let mut direct = DirectStrategy::new(
            config.crawl.request_timeout,
            user_agents.clone(),
            detector.clone(),
        )
        .with_referer(config.target.base_url.clone());
        if let Some(supplier) = ProxySupplier::from_config(&config.proxy) {
            info!("Routing direct requests through proxies");
            direct = direct.with_proxies(Arc::new(supplier));
        }

        let mut strategies = HttpStrategyFactory::new(Arc::new(direct), detector);
        if config.browser.enabled {
            strategies = strategies.with_browser(
                default_launcher(&config.browser, user_agents),
                config.browser.ready_timeout,
            );
        }

        Self::new(
            config.target.clone(),
            config.crawl.clone(),
            Arc::new(strategies),
        )
        .with_retry(config.retry.clone())
        .with_rate_limiter(RateLimiter::with_config(config.rate_limit.clone()))
    }

    fn start_run(&self) -> Arc<Run> {
        Arc::new(Run {
            chain: self.strategies.new_chain(),
            limiter: self.limiter.clone(),
            retry: self.retry.clone(),
        })
    }

    /// Full metadata for one movie.
    pub async fn fetch_detail(&self, external_id: &str) -> Result<MovieRecord, CrawlError> {
        self.fetch_detail_with_cancel(external_id, &CancellationToken::new())
            .await
    }

    pub async fn fetch_detail_with_cancel(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<MovieRecord, CrawlError> {
        let run = self.start_run();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CrawlError::Cancelled),
            result = self.lookup_detail(&run, external_id) => result,
        };
        run.shutdown().await;
        result
    }

    async fn lookup_detail(&self, run: &Run, external_id: &str) -> Result<MovieRecord, CrawlError> {
        let url = self.target.detail_url(external_id);
        run.fetch_page(&url, |body| parse_detail(body, Some(external_id)))
            .await
            .map(|retried| retried.value)
            .map_err(|failure| CrawlError::from_page(external_id, failure))
    }

    /// Up to `max_pages` pages of short comments, stopping early at the end
    /// of the listing.
    pub async fn fetch_comments(
        &self,
        external_id: &str,
        max_pages: usize,
    ) -> Result<CommentCrawl, CrawlError> {
        self.fetch_comments_with_cancel(external_id, max_pages, &CancellationToken::new())
            .await
    }

    pub async fn fetch_comments_with_cancel(
        &self,
        external_id: &str,
        max_pages: usize,
        cancel: &CancellationToken,
    ) -> Result<CommentCrawl, CrawlError> {
        let run = self.start_run();
        let result = self
            .crawl_comments(&run, external_id, max_pages, cancel)
            .await;
        run.shutdown().await;
        result
    }

    async fn crawl_comments(
        &self,
        run: &Arc<Run>,
        external_id: &str,
        max_pages: usize,
        cancel: &CancellationToken,
    ) -> Result<CommentCrawl, CrawlError> {
        let mut tracker = RunTracker::new(format!("comments {}", external_id));
        let mut outcomes: BTreeMap<usize, PageResult> = BTreeMap::new();
        let mut end: Option<usize> = None;

        let driven = drive(
            max_pages,
            self.config.workers,
            cancel,
            &mut tracker,
            |page| {
                let run = run.clone();
                let url = self.target.comments_url(external_id, page);
                let movie_id = external_id.to_string();
                async move {
                    let result = run
                        .fetch_page(&url, |body| parse_comment_page(body, &movie_id))
                        .await;
                    (url, result)
                }
            },
            |page, (url, result): PageResult| {
                let flow = match &result {
                    Ok(retried) if retried.value.is_end_of_comments() => {
                        debug!("No comments on page {} of {}, stopping", page, external_id);
                        end = Some(end.map_or(page, |e| e.min(page)));
                        Flow::StopDispatch
                    }
                    Err(failure) if failure.class() == FailureClass::Resource => {
                        Flow::Abort(CrawlError::from_page(external_id, failure.clone()))
                    }
                    _ => Flow::Continue,
                };
                outcomes.insert(page, (url, result));
                flow
            },
        )
        .await;

        if let Err(error) = driven {
            tracker.advance(match error {
                CrawlError::Cancelled => RunState::Cancelled,
                _ => RunState::Failed,
            });
            return Err(error);
        }

        tracker.advance(RunState::Aggregating);

        let mut seen = HashSet::new();
        let mut comments = Vec::new();
        let mut pages = Vec::with_capacity(outcomes.len());

        for (page, (url, result)) in outcomes {
            let beyond_end = end.is_some_and(|e| page > e);
            let (attempts, status) = match result {
                Ok(retried) => {
                    let status = if beyond_end {
                        PageStatus::BeyondEnd
                    } else if retried.value.is_end_of_comments() {
                        PageStatus::EndOfComments
                    } else {
                        let records = retried.value.records.len();
                        for comment in retried.value.records {
                            if seen.insert(comment.key()) {
                                comments.push(comment);
                            }
                        }
                        PageStatus::Done { records }
                    };
                    (retried.attempts, status)
                }
                Err(failure) => {
                    let status = if beyond_end {
                        PageStatus::BeyondEnd
                    } else {
                        warn!("Page {} of {} contributed nothing: {}", page, external_id, failure);
                        PageStatus::Failed {
                            error: failure.error.to_string(),
                        }
                    };
                    (failure.attempts, status)
                }
            };

            pages.push(PageReport {
                page,
                url,
                status,
                attempts: attempts.len(),
                strategy: attempts.last().map(|a| a.strategy),
            });
        }

        tracker.advance(RunState::Complete);

        let crawl = CommentCrawl {
            external_movie_id: external_id.to_string(),
            comments,
            pages,
            end_reached: end.is_some(),
            escalated: run.chain.is_escalated(),
        };
        info!(
            "Crawled {} comments for {} ({} pages, {} failed)",
            crawl.comments.len(),
            external_id,
            crawl.pages.len(),
            crawl.failed_pages()
        );
        Ok(crawl)
    }

    /// Search candidates for a keyword, enriched and tagged.
    pub async fn search(&self, keyword: &str) -> Result<Vec<SearchHit>, CrawlError> {
        self.search_with_cancel(keyword, &CancellationToken::new())
            .await
    }

    pub async fn search_with_cancel(
        &self,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, CrawlError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }

        let run = self.start_run();
        let result = self.run_search(&run, keyword, cancel).await;
        run.shutdown().await;
        result
    }

    async fn run_search(
        &self,
        run: &Arc<Run>,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, CrawlError> {
        let mut tracker = RunTracker::new(format!("search {:?}", keyword));
        tracker.advance(RunState::Fetching { next_page: 0 });

        let url = self.target.search_url(keyword);
        let source = self.target.search_source;
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CrawlError::Cancelled),
            listing = run.fetch_page(&url, |body| match source {
                SearchSource::Suggest => extract_suggestions(body),
                SearchSource::Page => parse_search_results(body),
            }) => listing.map_err(CrawlError::from_search),
        };
        let mut candidates = match listing {
            Ok(retried) => retried.value,
            Err(error) => {
                tracker.advance(match error {
                    CrawlError::Cancelled => RunState::Cancelled,
                    _ => RunState::Failed,
                });
                return Err(error);
            }
        };
        candidates.truncate(self.config.max_search_results);

        let to_enrich: Vec<(usize, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.needs_enrichment())
            .map(|(i, c)| (i, c.external_id.clone()))
            .collect();
        debug!(
            "Search {:?}: {} candidates, {} need enrichment",
            keyword,
            candidates.len(),
            to_enrich.len()
        );

        let mut failures: Vec<Option<CrawlError>> = vec![None; candidates.len()];
        let driven = drive(
            to_enrich.len(),
            self.config.workers,
            cancel,
            &mut tracker,
            |job| {
                let run = run.clone();
                let (index, external_id) = to_enrich[job].clone();
                let url = self.target.detail_url(&external_id);
                async move {
                    let result = run
                        .fetch_page(&url, |body| parse_detail(body, Some(&external_id)))
                        .await
                        .map(|retried| retried.value)
                        .map_err(|failure| CrawlError::from_page(&external_id, failure));
                    (index, result)
                }
            },
            |_, (index, result): (usize, Result<MovieRecord, CrawlError>)| match result {
                Ok(detail) => {
                    candidates[index].enrich_from(&detail);
                    Flow::Continue
                }
                Err(error) if error.is_fatal() => Flow::Abort(error),
                Err(error) => {
                    warn!(
                        "Could not enrich candidate {}: {}",
                        candidates[index].external_id, error
                    );
                    failures[index] = Some(error);
                    Flow::Continue
                }
            },
        )
        .await;

        if let Err(error) = driven {
            tracker.advance(match error {
                CrawlError::Cancelled => RunState::Cancelled,
                _ => RunState::Failed,
            });
            return Err(error);
        }

        tracker.advance(RunState::Aggregating);

        let mut hits = Vec::with_capacity(candidates.len());
        for (movie, enrichment_error) in candidates.into_iter().zip(failures) {
            let already_added = self.already_added(&movie.external_id).await;
            hits.push(SearchHit {
                movie,
                already_added,
                enrichment_error,
            });
        }

        tracker.advance(RunState::Complete);
        Ok(hits)
    }

    async fn already_added(&self, external_id: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.movie_exists(external_id).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Could not check store for {}: {}", external_id, e);
                false
            }
        }
    }
}
