//! Adaptive per-domain rate limiter.
//!
//! Every request to a host reserves a dispatch slot spaced at least the
//! current delay (plus jitter) after the previous reservation. Backs off on
//! 429/503, gradually recovers on success.

mod config;
mod domain_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub use config::{DomainStats, RateLimitConfig};
pub(crate) use config::millis;
use domain_state::DomainState;

use super::FetchError;

/// The slot for a host lies further out than the configured ceiling.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Rate limit wait for {domain} would be {wait:?} (ceiling {ceiling:?})")]
pub struct WaitExceeded {
    pub domain: String,
    pub wait: Duration,
    pub ceiling: Duration,
}

impl From<WaitExceeded> for FetchError {
    fn from(e: WaitExceeded) -> Self {
        FetchError::GovernorWait(e.wait)
    }
}

/// Adaptive rate limiter that tracks per-domain request timing.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    pub(crate) config: RateLimitConfig,
    pub(crate) domains: Arc<Mutex<HashMap<String, DomainState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with default config.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom config.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract domain from URL.
    pub fn extract_domain(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
    }

    /// Reserve the next dispatch slot for the URL's host and wait for it.
    ///
    /// Returns the domain on success, or `None` for URLs without a host
    /// (those are not rate limited).
    pub async fn acquire(&self, url: &str) -> Result<Option<String>, WaitExceeded> {
        let Some(domain) = Self::extract_domain(url) else {
            return Ok(None);
        };

        let slot = {
            let mut domains = self.domains.lock().await;
            let state = domains
                .entry(domain.clone())
                .or_insert_with(|| DomainState::new(self.config.base_delay));

            let now = Instant::now();
            let slot = state.next_slot(now, jitter(self.config.jitter));
            let wait = slot - now;
            if wait > self.config.max_wait {
                return Err(WaitExceeded {
                    domain,
                    wait,
                    ceiling: self.config.max_wait,
                });
            }
            state.reserve(slot);
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", domain, wait);
            tokio::time::sleep_until(slot).await;
        }

        Ok(Some(domain))
    }

    /// Report a successful request - may decrease delay.
    pub async fn report_success(&self, domain: &str) {
        let mut domains = self.domains.lock().await;
        if let Some(state) = domains.get_mut(domain) {
            state.consecutive_successes += 1;

            if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
                let new_delay = Duration::from_secs_f64(
                    state.current_delay.as_secs_f64() * self.config.recovery_multiplier,
                );
                state.current_delay = new_delay.max(self.config.base_delay);

                if state.current_delay <= self.config.base_delay {
                    state.in_backoff = false;
                    state.current_delay = self.config.base_delay;
                    info!("Domain {} recovered from rate limit backoff", domain);
                } else {
                    debug!(
                        "Domain {} delay reduced to {:?}",
                        domain, state.current_delay
                    );
                }

                state.consecutive_successes = 0;
            }
        }
    }

    /// Report a definite rate limit hit (429 or 503) - increases delay.
    pub async fn report_rate_limit(&self, domain: &str, status_code: u16) {
        let mut domains = self.domains.lock().await;
        if let Some(state) = domains.get_mut(domain) {
            state.rate_limit_hits += 1;
            state.consecutive_successes = 0;
            state.in_backoff = true;

            let new_delay = Duration::from_secs_f64(
                state.current_delay.as_secs_f64() * self.config.backoff_multiplier,
            );
            state.current_delay = new_delay.min(self.config.max_delay);

            warn!(
                "Rate limited by {} (HTTP {}), backing off to {:?}",
                domain, status_code, state.current_delay
            );
        }
    }

    /// Report a server error (5xx other than 503) - mild backoff.
    pub async fn report_server_error(&self, domain: &str) {
        let mut domains = self.domains.lock().await;
        if let Some(state) = domains.get_mut(domain) {
            state.consecutive_successes = 0;
            let new_delay = Duration::from_secs_f64(state.current_delay.as_secs_f64() * 1.5);
            state.current_delay = new_delay.min(self.config.max_delay);
            debug!(
                "Server error for {}, delay increased to {:?}",
                domain, state.current_delay
            );
        }
    }

    /// Feed a fetch outcome back into the domain's delay.
    pub async fn report<T>(&self, domain: &str, outcome: &Result<T, FetchError>) {
        match outcome {
            Ok(_) => self.report_success(domain).await,
            Err(FetchError::RateLimited(status)) => self.report_rate_limit(domain, *status).await,
            Err(FetchError::ServerError(_)) => self.report_server_error(domain).await,
            Err(_) => {}
        }
    }

    /// Get statistics for all domains.
    pub async fn get_stats(&self) -> HashMap<String, DomainStats> {
        let domains = self.domains.lock().await;
        domains
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    DomainStats {
                        current_delay: v.current_delay,
                        in_backoff: v.in_backoff,
                        total_requests: v.total_requests,
                        rate_limit_hits: v.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = max.as_millis() as u64;
    Duration::from_millis(rand::rng().random_range(0..=millis))
}
