//! Bounded retries for a single page fetch.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::rate_limiter::millis;
use super::strategy::{FailureClass, FetchError, StrategyKind};

/// Retry policy for one logical page fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles each time.
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    /// Ceiling on any single wait.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each wait.
    #[serde(rename = "jitter_ms", with = "millis")]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    Failed(FetchError),
}

/// Record of one attempt at fetching a page.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAttempt {
    pub url: String,
    pub strategy: StrategyKind,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

/// A page that produced nothing.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{url} failed after {} attempt(s): {error}", .attempts.len())]
pub struct PageFailure {
    pub url: String,
    pub error: FetchError,
    pub attempts: Vec<FetchAttempt>,
}

impl PageFailure {
    pub fn class(&self) -> FailureClass {
        self.error.class()
    }
}

/// A successful page fetch with its attempt history.
#[derive(Debug, Clone)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: Vec<FetchAttempt>,
}

impl RetryPolicy {
    /// Wait before retrying after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .saturating_add(jitter(self.jitter))
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails non-transiently, or the attempt
    /// budget is spent. `op` receives the 1-based attempt number and reports
    /// which strategy served the attempt.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Result<Retried<T>, PageFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = (StrategyKind, Result<T, FetchError>)>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut attempt = 1;

        loop {
            let (strategy, result) = op(attempt).await;
            match result {
                Ok(value) => {
                    attempts.push(FetchAttempt {
                        url: url.to_string(),
                        strategy,
                        attempt,
                        outcome: AttemptOutcome::Success,
                    });
                    return Ok(Retried { value, attempts });
                }
                Err(error) => {
                    attempts.push(FetchAttempt {
                        url: url.to_string(),
                        strategy,
                        attempt,
                        outcome: AttemptOutcome::Failed(error.clone()),
                    });

                    if error.class() != FailureClass::Transient {
                        debug!("{} failed without retry: {}", url, error);
                        return Err(PageFailure {
                            url: url.to_string(),
                            error,
                            attempts,
                        });
                    }
                    if attempt >= max_attempts {
                        warn!("{} failed after {} attempts: {}", url, attempt, error);
                        return Err(PageFailure {
                            url: url.to_string(),
                            error,
                            attempts,
                        });
                    }

                    let wait = self.backoff(attempt);
                    debug!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        url, attempt, error, wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = max.as_millis() as u64;
    Duration::from_millis(rand::rng().random_range(0..=millis))
}
