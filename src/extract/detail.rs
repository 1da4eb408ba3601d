//! Movie detail page extraction.

use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::text::{
    dedup_by_position, find_year, numeric_id_from_href, parse_rating, parse_release_date,
    split_title_year, squash_whitespace, upgrade_poster_url,
};
use super::{element_text, first_attr, first_text, selector, ExtractionError};
use crate::models::MovieRecord;

/// Leading performers kept from the credits.
const MAX_ACTORS: usize = 3;

static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:title"]"#));
static OG_IMAGE: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:image"]"#));
static OG_URL: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:url"]"#));
static CANONICAL: LazyLock<Selector> = LazyLock::new(|| selector(r#"link[rel="canonical"]"#));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("#content h1"));
static ITEM_REVIEWED: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"span[property="v:itemreviewed"]"#));
static MAIN_PIC: LazyLock<Selector> = LazyLock::new(|| selector("#mainpic img"));
static DIRECTOR: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[rel="v:directedBy"]"#));
static RATING: LazyLock<Selector> = LazyLock::new(|| selector("#interest_sectl strong.rating_num"));
static STARRING: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[rel="v:starring"]"#));
static GENRE: LazyLock<Selector> = LazyLock::new(|| selector(r#"span[property="v:genre"]"#));
static RELEASE_DATE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"span[property="v:initialReleaseDate"]"#));

/// Extract a movie record from a detail page.
pub fn extract_detail(
    document: &Html,
    external_id_hint: Option<&str>,
) -> Result<MovieRecord, ExtractionError> {
    let root = document.root_element();

    let external_id = first_attr(root, &CANONICAL, "href")
        .or_else(|| first_attr(root, &OG_URL, "content"))
        .and_then(|href| numeric_id_from_href(&href))
        .or_else(|| external_id_hint.map(|s| s.trim().to_string()))
        .filter(|id| !id.is_empty())
        .ok_or(ExtractionError::MissingField("external_id"))?;

    let heading = first_text(root, &HEADING);
    let reviewed = first_text(root, &ITEM_REVIEWED);

    let raw_title = first_attr(root, &OG_TITLE, "content")
        .or_else(|| reviewed.clone())
        .or_else(|| heading.clone())
        .ok_or(ExtractionError::MissingField("title"))?;

    let (title, title_year) = split_title_year(&raw_title);
    if title.is_empty() {
        return Err(ExtractionError::MissingField("title"));
    }
    let year = heading.as_deref().and_then(find_year).or(title_year);

    let subtitle = reviewed
        .as_deref()
        .map(|full| split_title_year(full).0)
        .and_then(|full| full.strip_prefix(title.as_str()).map(squash_whitespace))
        .filter(|s| !s.is_empty());

    let poster_url = first_attr(root, &OG_IMAGE, "content")
        .or_else(|| first_attr(root, &MAIN_PIC, "src"))
        .map(|url| upgrade_poster_url(&url));

    let director = first_text(root, &DIRECTOR);

    let rating = first_text(root, &RATING).and_then(|t| parse_rating(&t));

    let actors: Vec<String> = document
        .select(&STARRING)
        .filter_map(element_text)
        .take(MAX_ACTORS)
        .collect();

    let genres = dedup_by_position(document.select(&GENRE).filter_map(element_text));

    let release_date = first_text(root, &RELEASE_DATE).and_then(|t| parse_release_date(&t));

    Ok(MovieRecord {
        external_id,
        title,
        year,
        subtitle,
        director,
        actors,
        genres,
        rating,
        release_date,
        poster_url,
    })
}
