//! Search, detail, comment and add commands.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::crawl::{CrawlOrchestrator, PageReport};
use crate::repository::{MemoryStore, MovieStore, StoredMovie};

use super::helpers::{cancel_on_ctrl_c, print_json, spinner, truncate};

async fn open_store(config: &Config) -> anyhow::Result<Arc<MemoryStore>> {
    let path = config.store_path();
    let store = MemoryStore::open(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store {}: {}", path.display(), e))?;
    Ok(Arc::new(store))
}

/// Search for movies by keyword.
pub async fn cmd_search(config: &Config, keyword: &str) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let orchestrator = CrawlOrchestrator::from_config(config).with_store(store);
    let cancel = cancel_on_ctrl_c();

    let pb = spinner(format!("Searching {}", truncate(keyword, 40)))?;
    let result = orchestrator.search_with_cancel(keyword, &cancel).await;
    pb.finish_and_clear();

    let hits = result?;
    if hits.is_empty() {
        eprintln!("No results for {:?}", keyword);
    }
    print_json(&hits)
}

/// Fetch full metadata for one movie.
pub async fn cmd_detail(config: &Config, id: &str) -> anyhow::Result<()> {
    let orchestrator = CrawlOrchestrator::from_config(config);
    let cancel = cancel_on_ctrl_c();

    let pb = spinner(format!("Fetching movie {}", id))?;
    let result = orchestrator.fetch_detail_with_cancel(id, &cancel).await;
    pb.finish_and_clear();

    print_json(&result?)
}

/// Crawl short comments for one movie.
pub async fn cmd_comments(config: &Config, id: &str, pages: Option<usize>) -> anyhow::Result<()> {
    let orchestrator = CrawlOrchestrator::from_config(config);
    let pages = pages.unwrap_or(config.crawl.default_comment_pages);
    let cancel = cancel_on_ctrl_c();

    let pb = spinner(format!("Crawling {} comment pages for {}", pages, id))?;
    let result = orchestrator
        .fetch_comments_with_cancel(id, pages, &cancel)
        .await;
    pb.finish_and_clear();

    let crawl = result?;
    if crawl.failed_pages() > 0 {
        eprintln!(
            "{} of {} pages failed; returning partial results",
            crawl.failed_pages(),
            crawl.pages.len()
        );
    }
    print_json(&crawl)
}

#[derive(Serialize)]
struct AddSummary {
    movie: StoredMovie,
    comments_crawled: usize,
    comments_added: usize,
    pages: Vec<PageReport>,
}

/// Fetch a movie and its comments and save both to the store.
pub async fn cmd_add(config: &Config, id: &str, pages: Option<usize>) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let orchestrator = CrawlOrchestrator::from_config(config);
    let pages = pages.unwrap_or(config.crawl.default_comment_pages);
    let cancel = cancel_on_ctrl_c();

    let pb = spinner(format!("Fetching movie {}", id))?;
    let detail = orchestrator.fetch_detail_with_cancel(id, &cancel).await;
    let detail = match detail {
        Ok(detail) => detail,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e.into());
        }
    };

    pb.set_message(format!(
        "Crawling comments for {}",
        truncate(&detail.title, 30)
    ));
    let crawl = orchestrator
        .fetch_comments_with_cancel(id, pages, &cancel)
        .await;
    pb.finish_and_clear();
    let crawl = crawl?;

    let movie = store.save_movie(detail).await?;
    let comments_added = store.save_comments(&crawl.comments, id).await?;
    info!(
        "Saved {} ({} new comments) to {}",
        movie.record.title,
        comments_added,
        config.store_path().display()
    );

    print_json(&AddSummary {
        movie,
        comments_crawled: crawl.comments.len(),
        comments_added,
        pages: crawl.pages,
    })
}
