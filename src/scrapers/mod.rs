//! Page acquisition: fetch strategies, escalation, retries and rate limiting.

pub mod browser;
pub mod chain;
pub mod detection;
pub mod http_client;
pub mod rate_limiter;
pub mod retry;
pub mod strategy;

pub use browser::{BrowserEngineConfig, BrowserLauncher, BrowserSession, BrowserStrategy};
pub use chain::{Fetched, StrategyChain, StrategyFailure};
pub use detection::BlockDetector;
pub use http_client::{DirectStrategy, UserAgentPool};
pub use rate_limiter::{RateLimitConfig, RateLimiter, WaitExceeded};
pub use retry::{AttemptOutcome, FetchAttempt, PageFailure, Retried, RetryPolicy};
pub use strategy::{FailureClass, FetchError, FetchStrategy, StrategyKind};
