//! Field normalization shared by the page extractors.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use url::Url;

static YEAR_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\((\d{4})\)\s*").unwrap());

static STAR_CLASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^allstar(\d)0$").unwrap());

/// Substitutions that turn a thumbnail poster URL into the full-size one on
/// the canonical image host.
const POSTER_REWRITES: &[(&str, &str)] = &[
    ("s_ratio", "l_ratio"),
    ("img1.doubanio.com", "img9.doubanio.com"),
    ("img2.doubanio.com", "img9.doubanio.com"),
    ("img3.doubanio.com", "img9.doubanio.com"),
];

/// Collapse runs of whitespace (including newlines from nested markup).
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find a parenthesized four-digit year like `(2023)`.
pub fn find_year(s: &str) -> Option<String> {
    YEAR_SUFFIX
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Split `"深渊 (2023)"` into `("深渊", Some("2023"))`.
pub fn split_title_year(raw: &str) -> (String, Option<String>) {
    let year = find_year(raw);
    let title = YEAR_SUFFIX.replace_all(raw, " ");
    (squash_whitespace(&title), year)
}

/// Upgrade a poster URL to full resolution on the canonical CDN host.
pub fn upgrade_poster_url(url: &str) -> String {
    POSTER_REWRITES
        .iter()
        .fold(url.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Parse a rating only if the text is a well-formed number.
pub fn parse_rating(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|r| r.is_finite())
}

/// Parse a release date such as `2023-12-01(中国大陆)`.
/// Everything from the first `(` is region annotation.
pub fn parse_release_date(text: &str) -> Option<NaiveDate> {
    let date_part = text.split('(').next().unwrap_or("").trim();
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Parse a comment timestamp.
///
/// Tries a full date and time, then a bare date, then the leading date token
/// once any trailing time fragment is discarded.
pub fn parse_comment_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();

    if let Ok(ts) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(ts);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    let date_token = text.split_whitespace().next()?;
    NaiveDate::parse_from_str(date_token, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Star count from a class like `allstar40`.
pub fn stars_from_class(class: &str) -> Option<u8> {
    STAR_CLASS
        .captures(class)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|s| (1..=5).contains(s))
}

/// Resolve the numeric id segment from a subject link such as
/// `https://movie.douban.com/subject/1292052/`.
pub fn numeric_id_from_href(href: &str) -> Option<String> {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.split(['?', '#']).next().unwrap_or("").to_string(),
    };

    path.split('/')
        .find(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.to_string())
}

/// Keep the first occurrence of each value, in order.
pub fn dedup_by_position(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_title_year() {
        assert_eq!(
            split_title_year("深渊 (2023)"),
            ("深渊".to_string(), Some("2023".to_string()))
        );
        assert_eq!(split_title_year("深渊"), ("深渊".to_string(), None));
        assert_eq!(
            split_title_year("Heat (1995) Remastered"),
            ("Heat Remastered".to_string(), Some("1995".to_string()))
        );
    }

    #[test]
    fn test_upgrade_poster_url() {
        assert_eq!(
            upgrade_poster_url("https://img2.doubanio.com/view/photo/s_ratio_poster/public/p1.jpg"),
            "https://img9.doubanio.com/view/photo/l_ratio_poster/public/p1.jpg"
        );
        assert_eq!(
            upgrade_poster_url("https://img9.doubanio.com/view/photo/l_ratio_poster/public/p1.jpg"),
            "https://img9.doubanio.com/view/photo/l_ratio_poster/public/p1.jpg"
        );
    }

    #[test]
    fn test_parse_rating_rejects_malformed() {
        assert_eq!(parse_rating(" 7.5 "), Some(7.5));
        assert_eq!(parse_rating(""), None);
        assert_eq!(parse_rating("暂无评分"), None);
        assert_eq!(parse_rating("NaN"), None);
    }

    #[test]
    fn test_parse_release_date_strips_region() {
        assert_eq!(
            parse_release_date("2023-12-01(中国大陆)"),
            NaiveDate::from_ymd_opt(2023, 12, 1)
        );
        assert_eq!(
            parse_release_date("1994-09-10(多伦多电影节) "),
            NaiveDate::from_ymd_opt(1994, 9, 10)
        );
        assert_eq!(parse_release_date("(美国)"), None);
    }

    #[test]
    fn test_parse_comment_timestamp_forms() {
        let full = parse_comment_timestamp("2023-05-01 12:30:45").unwrap();
        assert_eq!(full.to_string(), "2023-05-01 12:30:45");

        let date_only = parse_comment_timestamp("2023-05-01").unwrap();
        assert_eq!(date_only.to_string(), "2023-05-01 00:00:00");

        let truncated = parse_comment_timestamp("2023-05-01 12:30").unwrap();
        assert_eq!(truncated.to_string(), "2023-05-01 00:00:00");

        assert!(parse_comment_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_numeric_id_from_href() {
        assert_eq!(
            numeric_id_from_href("https://movie.douban.com/subject/1292052/"),
            Some("1292052".to_string())
        );
        assert_eq!(
            numeric_id_from_href("/subject/35267208/?from=showing"),
            Some("35267208".to_string())
        );
        assert_eq!(numeric_id_from_href("https://movie.douban.com/chart"), None);
    }

    #[test]
    fn test_stars_from_class() {
        assert_eq!(stars_from_class("allstar40"), Some(4));
        assert_eq!(stars_from_class("allstar00"), None);
        assert_eq!(stars_from_class("rating"), None);
    }

    #[test]
    fn test_dedup_by_position() {
        let genres = dedup_by_position(
            ["剧情", "惊悚", "剧情"].iter().map(|s| s.to_string()),
        );
        assert_eq!(genres, vec!["剧情", "惊悚"]);
    }
}
