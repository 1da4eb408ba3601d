//! Fetch strategy capability and failure taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractionError;

/// Acquisition strategies, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Stateless HTTP request.
    Direct,
    /// Headless browser rendering.
    Browser,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::Browser => write!(f, "browser"),
        }
    }
}

/// How a failed fetch should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth retrying on the same strategy.
    Transient,
    /// The target is blocking this strategy; switch to the next one.
    Escalation,
    /// Retrying will not help; the page contributes nothing.
    Terminal,
    /// A required resource (the browser) is unavailable for the whole run.
    Resource,
    /// The caller cancelled the run.
    Cancelled,
}

/// Errors from fetching a single page.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    #[error("Rate limited: HTTP {0}")]
    RateLimited(u16),

    #[error("Empty or placeholder response")]
    EmptyBody,

    #[error("Rate limit wait of {0:?} exceeds ceiling")]
    GovernorWait(Duration),

    #[error("Blocked by anti-bot detection (marker: {marker})")]
    Blocked { marker: String },

    #[error("Not found")]
    NotFound,

    #[error("Client error: HTTP {0}")]
    ClientError(u16),

    #[error("Malformed document: {0}")]
    Malformed(#[from] ExtractionError),

    #[error("Browser unavailable: {0}")]
    Resource(String),

    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    /// Classify this failure for retry and escalation decisions.
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Timeout(_)
            | FetchError::Network(_)
            | FetchError::ServerError(_)
            | FetchError::RateLimited(_)
            | FetchError::EmptyBody
            | FetchError::GovernorWait(_) => FailureClass::Transient,
            FetchError::Blocked { .. } => FailureClass::Escalation,
            FetchError::NotFound | FetchError::ClientError(_) | FetchError::Malformed(_) => {
                FailureClass::Terminal
            }
            FetchError::Resource(_) => FailureClass::Resource,
            FetchError::Cancelled => FailureClass::Cancelled,
        }
    }

    /// Map an HTTP status to a failure, if it is one.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            404 | 410 => Some(FetchError::NotFound),
            429 => Some(FetchError::RateLimited(status)),
            400..=499 => Some(FetchError::ClientError(status)),
            503 => Some(FetchError::RateLimited(status)),
            _ => Some(FetchError::ServerError(status)),
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else if let Some(status) = err.status() {
            FetchError::from_status(status.as_u16())
                .unwrap_or_else(|| FetchError::Network(err.to_string()))
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// A way of turning a URL into a document.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Fetch the document at `url`.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Release any resources held by the strategy.
    async fn shutdown(&self) {}
}
