//! filmacquire - movie metadata and review acquisition.
//!
//! Fetches movie details and short comments from Douban, which actively
//! resists automated access. The acquisition layer combines a per-host rate
//! limiter, a direct HTTP strategy that escalates to a headless browser when
//! blocked, bounded retries, and fail-closed HTML extraction.

pub mod cli;
pub mod config;
pub mod crawl;
pub mod extract;
pub mod models;
pub mod privacy;
pub mod repository;
pub mod scrapers;
