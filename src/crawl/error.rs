//! Errors surfaced by crawl operations.

use thiserror::Error;

use crate::extract::ExtractionError;
use crate::scrapers::{FetchError, PageFailure};

/// Run-level or lookup-level failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CrawlError {
    #[error("Movie {0} not found")]
    NotFound(String),

    #[error("Could not extract {external_id}: {source}")]
    ExtractionFailed {
        external_id: String,
        source: ExtractionError,
    },

    #[error("{0}")]
    Fetch(PageFailure),

    /// The browser could not be started after the run escalated.
    #[error("Browser unavailable: {0}")]
    Resource(String),

    #[error("Crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Classify a failed lookup of `external_id`.
    pub fn from_page(external_id: &str, failure: PageFailure) -> Self {
        match &failure.error {
            FetchError::NotFound => CrawlError::NotFound(external_id.to_string()),
            FetchError::Malformed(source) => CrawlError::ExtractionFailed {
                external_id: external_id.to_string(),
                source: source.clone(),
            },
            FetchError::Resource(reason) => CrawlError::Resource(reason.clone()),
            FetchError::Cancelled => CrawlError::Cancelled,
            _ => CrawlError::Fetch(failure),
        }
    }

    /// Classify a failed search listing fetch.
    pub fn from_search(failure: PageFailure) -> Self {
        match &failure.error {
            FetchError::Resource(reason) => CrawlError::Resource(reason.clone()),
            FetchError::Cancelled => CrawlError::Cancelled,
            _ => CrawlError::Fetch(failure),
        }
    }

    /// Whether the whole run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::Resource(_) | CrawlError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(error: FetchError) -> PageFailure {
        PageFailure {
            url: "https://movie.douban.com/subject/1/".to_string(),
            error,
            attempts: Vec::new(),
        }
    }

    #[test]
    fn test_lookup_failures_are_typed() {
        assert_eq!(
            CrawlError::from_page("1", failure(FetchError::NotFound)),
            CrawlError::NotFound("1".to_string())
        );
        assert!(matches!(
            CrawlError::from_page(
                "1",
                failure(ExtractionError::MissingField("title").into())
            ),
            CrawlError::ExtractionFailed { .. }
        ));
        assert!(matches!(
            CrawlError::from_page("1", failure(FetchError::ServerError(502))),
            CrawlError::Fetch(_)
        ));
    }

    #[test]
    fn test_only_resource_and_cancel_are_fatal() {
        let resource = CrawlError::from_search(failure(FetchError::Resource("no chrome".into())));
        assert!(resource.is_fatal());
        assert!(!CrawlError::from_search(failure(FetchError::NotFound)).is_fatal());
    }
}
