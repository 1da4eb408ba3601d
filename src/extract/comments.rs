//! Comment page extraction.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::text::{parse_comment_timestamp, stars_from_class};
use super::{element_text, first_text, selector, ExtractionError};
use crate::models::CommentRecord;

static COMMENTS_CONTAINER: LazyLock<Selector> = LazyLock::new(|| selector("#comments"));
static COMMENT_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("div.comment-item"));
static AUTHOR: LazyLock<Selector> = LazyLock::new(|| selector("span.comment-info > a"));
static SHORT_TEXT: LazyLock<Selector> = LazyLock::new(|| selector("span.short"));
static COMMENT_TIME: LazyLock<Selector> = LazyLock::new(|| selector("span.comment-time"));
static STAR_RATING: LazyLock<Selector> = LazyLock::new(|| selector("span.comment-info span.rating"));

/// Comments extracted from one page, with per-item accounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentPage {
    pub records: Vec<CommentRecord>,
    /// Comment item blocks present on the page.
    pub items_found: usize,
    /// Items dropped because their text was empty.
    pub dropped_empty: usize,
    /// Items skipped because a required field could not be resolved.
    pub failed_items: usize,
}

impl CommentPage {
    /// The page structure was present but listed no comments.
    pub fn is_end_of_comments(&self) -> bool {
        self.items_found == 0
    }
}

/// Extract every comment on a comment page.
///
/// A missing comments container means the document is not a comment page at
/// all. Individual items that cannot be resolved are skipped.
pub fn extract_comment_page(
    document: &Html,
    external_movie_id: &str,
) -> Result<CommentPage, ExtractionError> {
    let container = document
        .select(&COMMENTS_CONTAINER)
        .next()
        .ok_or(ExtractionError::MissingStructure("#comments"))?;

    let mut page = CommentPage::default();

    for item in container.select(&COMMENT_ITEM) {
        page.items_found += 1;
        match extract_comment_item(item, external_movie_id) {
            Ok(Some(record)) => page.records.push(record),
            Ok(None) => page.dropped_empty += 1,
            Err(e) => {
                debug!("Skipping comment item on movie {}: {}", external_movie_id, e);
                page.failed_items += 1;
            }
        }
    }

    Ok(page)
}

/// Extract a single comment item.
///
/// Returns `Ok(None)` when the comment text is empty: such items are dropped,
/// not treated as failures.
pub fn extract_comment_item(
    item: ElementRef<'_>,
    external_movie_id: &str,
) -> Result<Option<CommentRecord>, ExtractionError> {
    let author = first_text(item, &AUTHOR).ok_or(ExtractionError::MissingField("author"))?;

    let text_el = item
        .select(&SHORT_TEXT)
        .next()
        .ok_or(ExtractionError::MissingField("text"))?;
    let Some(text) = element_text(text_el) else {
        return Ok(None);
    };

    let timestamp = item.select(&COMMENT_TIME).next().and_then(|el| {
        el.value()
            .attr("title")
            .and_then(parse_comment_timestamp)
            .or_else(|| element_text(el).and_then(|t| parse_comment_timestamp(&t)))
    });

    let stars = item
        .select(&STAR_RATING)
        .next()
        .and_then(|el| el.value().classes().find_map(stars_from_class));

    Ok(Some(CommentRecord {
        external_movie_id: external_movie_id.to_string(),
        author,
        text,
        timestamp,
        stars,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parse_comment_page;

    fn item(author: &str, text: &str, time: &str) -> String {
        format!(
            r#"<div class="comment-item">
                 <div class="comment"><h3>
                   <span class="comment-info">
                     <a href="https://www.douban.com/people/{author}/">{author}</a>
                     <span class="allstar40 rating" title="推荐"></span>
                     <span class="comment-time " title="{time}">{time}</span>
                   </span></h3>
                   <p class="comment-content"><span class="short">{text}</span></p>
                 </div>
               </div>"#
        )
    }

    fn page(items: &[String]) -> String {
        format!(
            r#"<html><body><div id="comments">{}</div></body></html>"#,
            items.join("\n")
        )
    }

    #[test]
    fn test_empty_text_item_is_dropped() {
        let html = page(&[
            item("a", "很好看", "2023-05-01 10:00:00"),
            item("b", "节奏拖沓", "2023-05-01 11:00:00"),
            item("c", "   ", "2023-05-01 12:00:00"),
            item("d", "配乐出色", "2023-05-02"),
            item("e", "一般", "2023-05-03 09:15"),
        ]);

        let page = parse_comment_page(&html, "35267208").unwrap();

        assert_eq!(page.items_found, 5);
        assert_eq!(page.records.len(), 4);
        assert_eq!(page.dropped_empty, 1);
        assert!(page.records.iter().all(|c| !c.text.trim().is_empty()));
        assert!(page.records.iter().all(|c| c.external_movie_id == "35267208"));
    }

    #[test]
    fn test_item_fields() {
        let html = page(&[item("影迷", "值得一看", "2023-05-03 09:15")]);
        let page = parse_comment_page(&html, "1").unwrap();
        let comment = &page.records[0];

        assert_eq!(comment.author, "影迷");
        assert_eq!(comment.text, "值得一看");
        assert_eq!(comment.stars, Some(4));
        assert_eq!(
            comment.timestamp.map(|t| t.to_string()).as_deref(),
            Some("2023-05-03 00:00:00")
        );
    }

    #[test]
    fn test_item_without_author_is_skipped() {
        let broken = r#"<div class="comment-item"><span class="short">孤儿评论</span></div>"#;
        let html = page(&[broken.to_string(), item("a", "好", "2023-01-01")]);
        let page = parse_comment_page(&html, "1").unwrap();

        assert_eq!(page.items_found, 2);
        assert_eq!(page.failed_items, 1);
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn test_empty_container_is_end_of_comments() {
        let page = parse_comment_page(&page(&[]), "1").unwrap();
        assert!(page.is_end_of_comments());
    }

    #[test]
    fn test_missing_container_fails() {
        let result = parse_comment_page("<html><body><p>登录</p></body></html>", "1");
        assert_eq!(result, Err(ExtractionError::MissingStructure("#comments")));
    }
}
