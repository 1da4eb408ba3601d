//! Per-domain rate limiting state.

use std::time::Duration;

use tokio::time::Instant;

/// State for a single domain.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Current spacing for this domain.
    pub current_delay: Duration,
    /// Most recently reserved dispatch time. May lie in the future while a
    /// caller is still waiting for its slot.
    pub last_dispatch: Option<Instant>,
    /// Consecutive successes since last rate limit.
    pub consecutive_successes: u32,
    /// Whether currently in backoff.
    pub in_backoff: bool,
    /// Total requests made.
    pub total_requests: u64,
    /// Total rate limit hits.
    pub rate_limit_hits: u64,
}

impl DomainState {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_dispatch: None,
            consecutive_successes: 0,
            in_backoff: false,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    /// Earliest dispatch time for the next request, given `now` and a jitter
    /// sample.
    pub fn next_slot(&self, now: Instant, jitter: Duration) -> Instant {
        match self.last_dispatch {
            Some(last) => (last + self.current_delay + jitter).max(now),
            None => now,
        }
    }

    /// Record a reserved dispatch.
    pub fn reserve(&mut self, slot: Instant) {
        self.last_dispatch = Some(slot);
        self.total_requests += 1;
    }
}
