//! HTML extraction for detail pages, comment pages and search results.
//!
//! Everything here is pure: a parsed document goes in, a record or an
//! [`ExtractionError`] comes out. The target's markup is unversioned and
//! adversarial, so extraction fails closed. A record is never emitted with an
//! unresolved id or title, and comments never carry empty text.
//!
//! `scraper::Html` is not `Send`, so async callers should use the `parse_*`
//! helpers which parse and extract in one synchronous call.

mod comments;
mod detail;
mod search;
pub mod text;

pub use comments::{extract_comment_item, extract_comment_page, CommentPage};
pub use detail::extract_detail;
pub use search::{extract_search_item, extract_search_results, extract_suggestions};

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::models::{CandidateMovie, MovieRecord};

/// Errors that can occur while extracting a record from a document.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("Required field not found: {0}")]
    MissingField(&'static str),

    #[error("Page structure not found: {0}")]
    MissingStructure(&'static str),

    #[error("Malformed document: {0}")]
    Malformed(String),
}

/// Which kind of record to extract from a document.
#[derive(Debug, Clone, Copy)]
pub enum RecordKind<'a> {
    /// A movie detail page. The hint is used when the page itself does not
    /// reveal its id.
    Detail { external_id_hint: Option<&'a str> },
    /// One page of short comments for a movie.
    CommentPage { external_movie_id: &'a str },
    /// A rendered search results page.
    SearchResults,
}

/// A structured record extracted from a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Movie(MovieRecord),
    Comments(CommentPage),
    Candidates(Vec<CandidateMovie>),
}

/// Extract a record of the given kind from a parsed document.
pub fn extract(document: &Html, kind: RecordKind<'_>) -> Result<Record, ExtractionError> {
    match kind {
        RecordKind::Detail { external_id_hint } => {
            extract_detail(document, external_id_hint).map(Record::Movie)
        }
        RecordKind::CommentPage { external_movie_id } => {
            extract_comment_page(document, external_movie_id).map(Record::Comments)
        }
        RecordKind::SearchResults => extract_search_results(document).map(Record::Candidates),
    }
}

/// Parse HTML and extract a movie detail record.
pub fn parse_detail(html: &str, external_id_hint: Option<&str>) -> Result<MovieRecord, ExtractionError> {
    extract_detail(&Html::parse_document(html), external_id_hint)
}

/// Parse HTML and extract one page of comments.
pub fn parse_comment_page(html: &str, external_movie_id: &str) -> Result<CommentPage, ExtractionError> {
    extract_comment_page(&Html::parse_document(html), external_movie_id)
}

/// Parse HTML and extract search result candidates.
pub fn parse_search_results(html: &str) -> Result<Vec<CandidateMovie>, ExtractionError> {
    extract_search_results(&Html::parse_document(html))
}

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

/// Trimmed, whitespace-collapsed text of an element. `None` if empty.
pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = text::squash_whitespace(&element.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Text of the first match of `sel` under `root`.
pub(crate) fn first_text(root: ElementRef<'_>, sel: &Selector) -> Option<String> {
    root.select(sel).next().and_then(element_text)
}

/// Non-empty attribute of the first match of `sel` under `root`.
pub(crate) fn first_attr(root: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    root.select(sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_dispatches_on_kind() {
        let detail = Html::parse_document(
            r#"<html><head><link rel="canonical" href="https://movie.douban.com/subject/35267208/" /></head>
               <body><h1><span property="v:itemreviewed">深渊</span></h1></body></html>"#,
        );
        match extract(&detail, RecordKind::Detail { external_id_hint: None }) {
            Ok(Record::Movie(movie)) => {
                assert_eq!(movie.external_id, "35267208");
                assert_eq!(movie.title, "深渊");
            }
            other => panic!("expected a movie, got {:?}", other),
        }

        let comments = Html::parse_document(
            r#"<html><body><div id="comments">
                 <div class="comment-item">
                   <span class="comment-info"><a href="https://www.douban.com/people/a/">甲</a></span>
                   <p class="comment-content"><span class="short">好看</span></p>
                 </div>
               </div></body></html>"#,
        );
        match extract(&comments, RecordKind::CommentPage { external_movie_id: "35267208" }) {
            Ok(Record::Comments(page)) => {
                assert_eq!(page.items_found, 1);
                assert_eq!(page.records[0].text, "好看");
            }
            other => panic!("expected comments, got {:?}", other),
        }

        let results = Html::parse_document(
            r#"<html><body><div class="item-root">
                 <div class="title"><a href="https://movie.douban.com/subject/1292052/" class="title-text">肖申克的救赎 (1994)</a></div>
               </div></body></html>"#,
        );
        match extract(&results, RecordKind::SearchResults) {
            Ok(Record::Candidates(candidates)) => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].external_id, "1292052");
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_fails_closed_on_wrong_document() {
        let unrelated = Html::parse_document("<html><body><p>登录</p></body></html>");

        assert_eq!(
            extract(&unrelated, RecordKind::CommentPage { external_movie_id: "1" }),
            Err(ExtractionError::MissingStructure("#comments"))
        );
        assert_eq!(
            extract(&unrelated, RecordKind::Detail { external_id_hint: None }),
            Err(ExtractionError::MissingField("external_id"))
        );
    }
}
