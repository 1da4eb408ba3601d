//! Crawl target and tuning configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scrapers::rate_limiter::millis;

/// Default Douban movie site.
pub const DEFAULT_BASE_URL: &str = "https://movie.douban.com";

/// Douban serves 20 short comments per page.
pub const COMMENTS_PER_PAGE: usize = 20;

/// Where search candidates come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// The JSON suggest endpoint.
    #[default]
    Suggest,
    /// The rendered search results page.
    Page,
}

/// URLs of the target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Movie site root, e.g. `https://movie.douban.com`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Search results page; `{query}` is replaced with the encoded keyword.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default)]
    pub search_source: SearchSource,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_search_url() -> String {
    "https://search.douban.com/movie/subject_search?search_text={query}&cat=1002".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_url: default_search_url(),
            search_source: SearchSource::default(),
        }
    }
}

impl TargetConfig {
    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn detail_url(&self, external_id: &str) -> String {
        format!("{}/subject/{}/", self.base(), external_id)
    }

    /// Comment page `page` (0-based), newest-score order, watched only.
    pub fn comments_url(&self, external_id: &str, page: usize) -> String {
        format!(
            "{}/subject/{}/comments?start={}&limit={}&status=P&sort=new_score",
            self.base(),
            external_id,
            page * COMMENTS_PER_PAGE,
            COMMENTS_PER_PAGE
        )
    }

    pub fn search_url(&self, keyword: &str) -> String {
        let query = urlencoding::encode(keyword);
        match self.search_source {
            SearchSource::Suggest => format!("{}/j/subject_suggest?q={}", self.base(), query),
            SearchSource::Page => self.search_url.replace("{query}", &query),
        }
    }
}

/// Crawl tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Pages fetched in parallel within one run.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-request timeout for direct fetches.
    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        with = "millis"
    )]
    pub request_timeout: Duration,

    /// Candidates returned by one search.
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,

    /// Comment pages fetched when the caller does not say.
    #[serde(default = "default_comment_pages")]
    pub default_comment_pages: usize,
}

fn default_workers() -> usize {
    4
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_search_results() -> usize {
    10
}

fn default_comment_pages() -> usize {
    5
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            request_timeout: default_request_timeout(),
            max_search_results: default_max_search_results(),
            default_comment_pages: default_comment_pages(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_urls_page_by_twenty() {
        let target = TargetConfig::default();
        assert_eq!(
            target.comments_url("35267208", 2),
            "https://movie.douban.com/subject/35267208/comments?start=40&limit=20&status=P&sort=new_score"
        );
    }

    #[test]
    fn test_search_urls_encode_keyword() {
        let mut target = TargetConfig {
            base_url: "https://movie.douban.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            target.search_url("深渊"),
            "https://movie.douban.com/j/subject_suggest?q=%E6%B7%B1%E6%B8%8A"
        );

        target.search_source = SearchSource::Page;
        assert!(target
            .search_url("the abyss")
            .ends_with("search_text=the%20abyss&cat=1002"));
        assert_eq!(target.detail_url("1"), "https://movie.douban.com/subject/1/");
    }
}
