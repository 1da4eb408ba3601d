//! Search result extraction.
//!
//! Two candidate sources are understood: the rendered search results page and
//! the JSON suggest endpoint.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;

use super::text::{numeric_id_from_href, parse_rating, split_title_year, upgrade_poster_url};
use super::{first_attr, first_text, selector, ExtractionError};
use crate::models::CandidateMovie;

static RESULT_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("div.item-root"));
static SUBJECT_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href*="/subject/"]"#));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector(".title-text, .title a, .title"));
static COVER: LazyLock<Selector> = LazyLock::new(|| selector("img"));
static RATING: LazyLock<Selector> = LazyLock::new(|| selector(".rating_nums"));
static JSON_PAYLOAD: LazyLock<Selector> = LazyLock::new(|| selector("pre"));

/// Extract all movie candidates from a rendered search results page, in page
/// order. Items that are not movies or lack an id or title are skipped.
pub fn extract_search_results(document: &Html) -> Result<Vec<CandidateMovie>, ExtractionError> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for item in document.select(&RESULT_ITEM) {
        match extract_search_item(item) {
            Ok(candidate) => {
                if seen.insert(candidate.external_id.clone()) {
                    candidates.push(candidate);
                }
            }
            Err(e) => debug!("Skipping search result item: {}", e),
        }
    }

    Ok(candidates)
}

/// Extract one search result item.
pub fn extract_search_item(item: ElementRef<'_>) -> Result<CandidateMovie, ExtractionError> {
    let external_id = first_attr(item, &SUBJECT_LINK, "href")
        .and_then(|href| numeric_id_from_href(&href))
        .ok_or(ExtractionError::MissingField("external_id"))?;

    let raw_title = first_text(item, &TITLE).ok_or(ExtractionError::MissingField("title"))?;
    let (title, year) = split_title_year(&raw_title);
    if title.is_empty() {
        return Err(ExtractionError::MissingField("title"));
    }

    let poster_url = first_attr(item, &COVER, "src").map(|url| upgrade_poster_url(&url));
    let rating = first_text(item, &RATING).and_then(|t| parse_rating(&t));

    Ok(CandidateMovie {
        external_id,
        title,
        year,
        subtitle: None,
        poster_url,
        director: None,
        rating,
    })
}

#[derive(Debug, Deserialize)]
struct SuggestEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sub_title: Option<String>,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    img: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Extract movie candidates from the JSON suggest endpoint.
///
/// Entries that are not movies (TV series, celebrities) are ignored. A browser
/// shows JSON wrapped in a `<pre>`, which is unwrapped first.
pub fn extract_suggestions(body: &str) -> Result<Vec<CandidateMovie>, ExtractionError> {
    let payload = if body.trim_start().starts_with('<') {
        Html::parse_document(body)
            .select(&JSON_PAYLOAD)
            .next()
            .map(|pre| pre.text().collect::<String>())
            .ok_or_else(|| ExtractionError::Malformed("no JSON payload in page".to_string()))?
    } else {
        body.to_string()
    };

    let entries: Vec<SuggestEntry> =
        serde_json::from_str(&payload).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

    let mut seen = HashSet::new();
    let candidates = entries
        .into_iter()
        .filter(|e| e.kind.as_deref() == Some("movie"))
        .filter_map(|entry| {
            let external_id = entry
                .id
                .filter(|id| !id.is_empty())
                .or_else(|| entry.url.as_deref().and_then(numeric_id_from_href))?;
            let (title, title_year) = split_title_year(entry.title.as_deref().unwrap_or(""));
            if title.is_empty() {
                return None;
            }
            Some(CandidateMovie {
                external_id,
                title,
                year: entry.year.filter(|y| !y.is_empty()).or(title_year),
                subtitle: entry.sub_title.filter(|s| !s.is_empty()),
                poster_url: entry.img.as_deref().map(upgrade_poster_url),
                director: None,
                rating: None,
            })
        })
        .filter(|c| seen.insert(c.external_id.clone()))
        .collect();

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parse_search_results;

    fn result_item(href: &str, title: &str, rating: &str) -> String {
        format!(
            r#"<div class="item-root">
                 <a href="{href}" class="cover-link"><img src="https://img2.doubanio.com/view/photo/s_ratio_poster/public/p1.jpg" class="cover"></a>
                 <div class="detail">
                   <div class="title"><a href="{href}" class="title-text">{title}</a></div>
                   <div class="rating"><span class="rating_nums">{rating}</span></div>
                 </div>
               </div>"#
        )
    }

    #[test]
    fn test_extract_search_results() {
        let html = format!(
            "<html><body>{}{}{}</body></html>",
            result_item(
                "https://movie.douban.com/subject/1292052/",
                "肖申克的救赎 The Shawshank Redemption (1994)",
                "9.7"
            ),
            result_item("https://movie.douban.com/subject/35267208/", "深渊 (2023)", ""),
            result_item("https://movie.douban.com/celebrity/1054521/", "蒂姆·罗宾斯", "")
        );

        let candidates = parse_search_results(&html).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].external_id, "1292052");
        assert_eq!(candidates[0].title, "肖申克的救赎 The Shawshank Redemption");
        assert_eq!(candidates[0].year.as_deref(), Some("1994"));
        assert_eq!(candidates[0].rating, Some(9.7));
        assert_eq!(
            candidates[0].poster_url.as_deref(),
            Some("https://img9.doubanio.com/view/photo/l_ratio_poster/public/p1.jpg")
        );
        assert_eq!(candidates[1].title, "深渊");
        assert_eq!(candidates[1].rating, None);
    }

    #[test]
    fn test_malformed_rating_is_missing_not_error() {
        let html = format!(
            "<html><body>{}</body></html>",
            result_item("/subject/42/", "片名", "7.x")
        );
        let candidates = parse_search_results(&html).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].rating.is_none());
    }

    #[test]
    fn test_extract_suggestions() {
        let body = r#"[
            {"episode":"","img":"https://img1.doubanio.com/view/photo/s_ratio_poster/public/p480747492.jpg","title":"肖申克的救赎","url":"https://movie.douban.com/subject/1292052/?suggest=%E8%82%96","type":"movie","year":"1994","sub_title":"The Shawshank Redemption","id":"1292052"},
            {"episode":"10","img":"","title":"肖申克的救赎 剧版","url":"https://movie.douban.com/subject/99/","type":"tv","year":"2020","sub_title":"","id":"99"},
            {"title":"无id条目","url":"https://movie.douban.com/subject/77/","type":"movie"}
        ]"#;

        let candidates = extract_suggestions(body).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].external_id, "1292052");
        assert_eq!(candidates[0].subtitle.as_deref(), Some("The Shawshank Redemption"));
        assert_eq!(
            candidates[0].poster_url.as_deref(),
            Some("https://img9.doubanio.com/view/photo/l_ratio_poster/public/p480747492.jpg")
        );
        assert_eq!(candidates[1].external_id, "77");
    }

    #[test]
    fn test_suggestions_rendered_by_browser() {
        let body = r#"<html><head></head><body><pre>[{"title":"深渊","url":"https://movie.douban.com/subject/35267208/","type":"movie","year":"2023","id":"35267208"}]</pre></body></html>"#;
        let candidates = extract_suggestions(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].year.as_deref(), Some("2023"));
    }

    #[test]
    fn test_suggestions_reject_non_json() {
        assert!(matches!(
            extract_suggestions("<html>blocked</html>"),
            Err(ExtractionError::Malformed(_))
        ));
    }
}
